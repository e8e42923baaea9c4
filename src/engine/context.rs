// SPDX-License-Identifier: MIT

//! Run context: artifacts plus typed failure flags
//!
//! A context is owned by exactly one branch at a time. Branches receive their
//! own copy through [`Context::fork`] and give ownership back at a join through
//! [`Context::merge`].

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::EngineError;

/// Record of a step failure that was caught and converted into data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaughtFailure {
    /// Step whose body failed
    pub step: String,
    /// Rendered error message
    pub cause: String,
    pub at: DateTime<Utc>,
}

impl CaughtFailure {
    pub fn new(step: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            cause: cause.into(),
            at: Utc::now(),
        }
    }
}

/// Set of context mutations produced by a successful step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay {
    entries: Vec<(String, Value)>,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, builder style
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

/// Forkable, mergeable key/value store of run artifacts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Context {
    artifacts: BTreeMap<String, Value>,
    flags: BTreeMap<String, CaughtFailure>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get an artifact, failing with `MissingArtifact` if it was never set
    pub fn get(&self, key: &str) -> Result<&Value, EngineError> {
        self.artifacts
            .get(key)
            .ok_or_else(|| EngineError::missing(key))
    }

    /// Get an artifact and deserialize it into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, crate::error::StepError> {
        let value = self.get(key)?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Insert or overwrite an artifact
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.artifacts.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.artifacts.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.artifacts.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.artifacts.keys()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty() && self.flags.is_empty()
    }

    /// Apply the entries of a step overlay, later entries winning
    pub fn apply(&mut self, overlay: Overlay) {
        for (key, value) in overlay.entries {
            self.artifacts.insert(key, value);
        }
    }

    /// Mark a catch flag as raised
    pub fn raise_flag(&mut self, flag: impl Into<String>, failure: CaughtFailure) {
        self.flags.insert(flag.into(), failure);
    }

    /// Whether the given catch flag has been raised upstream
    pub fn is_flagged(&self, flag: &str) -> bool {
        self.flags.contains_key(flag)
    }

    pub fn flag(&self, flag: &str) -> Option<&CaughtFailure> {
        self.flags.get(flag)
    }

    /// All raised flags, keyed by flag name
    pub fn failures(&self) -> &BTreeMap<String, CaughtFailure> {
        &self.flags
    }

    /// Produce `n` independent copies of this context
    pub fn fork(&self, n: usize) -> Vec<Context> {
        (0..n).map(|_| self.clone()).collect()
    }

    /// Merge branch contexts into one.
    ///
    /// A key found in several inputs must carry the same value everywhere,
    /// otherwise the merge fails with `MergeConflict`. Keys listed in
    /// `excluded` skip that check and the last context in `contexts` wins.
    /// Flags are unioned, last context winning.
    pub fn merge(contexts: Vec<Context>, excluded: &[String]) -> Result<Context, EngineError> {
        let mut merged = Context::new();

        for ctx in contexts {
            for (key, value) in ctx.artifacts {
                let differs = merged
                    .artifacts
                    .get(&key)
                    .is_some_and(|existing| *existing != value);
                if differs && !excluded.contains(&key) {
                    return Err(EngineError::conflict(key));
                }
                merged.artifacts.insert(key, value);
            }
            merged.flags.extend(ctx.flags);
        }

        Ok(merged)
    }

    /// Convert artifacts to a JSON object
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.artifacts
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}
