// SPDX-License-Identifier: MIT

//! YAML schema types for flow definitions

use serde::{Deserialize, Serialize};

/// A flow: steps wired into a graph plus the flags to report on
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct FlowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    /// Flags watched by the failure reporter; all declared catch flags when absent
    pub report: Option<ReportDefinition>,
}

/// A step in the flow graph
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepDefinition {
    /// Unique step name
    pub name: String,
    /// Registered body to run; defaults to the step name
    pub body: Option<String>,
    /// Flag raised when the body fails; the run aborts on failure when absent
    pub catch: Option<String>,
    /// Successor steps
    #[serde(default)]
    pub next: Successors,
    /// Wait for every predecessor and merge their contexts
    #[serde(default)]
    pub join: bool,
    /// Keys that must not raise merge conflicts at this join
    #[serde(default)]
    pub merge_exclude: Vec<String>,
}

impl StepDefinition {
    pub fn body_name(&self) -> &str {
        self.body.as_deref().unwrap_or(&self.name)
    }
}

/// Successors of a step (none, a single name, or a list)
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(untagged)]
pub enum Successors {
    /// Terminal step
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl Successors {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Successors::None => vec![],
            Successors::Single(s) => vec![s.clone()],
            Successors::Multiple(v) => v.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Successors::None => true,
            Successors::Single(_) => false,
            Successors::Multiple(v) => v.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ReportDefinition {
    #[serde(default)]
    pub flags: Vec<String>,
}
