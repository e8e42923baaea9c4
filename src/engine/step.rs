// SPDX-License-Identifier: MIT

//! Steps: a named body plus its catch policy and successor edges

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use super::context::{Context, Overlay};
use crate::error::StepError;

/// Work performed by a step.
///
/// A body receives its branch's context read-only and returns the mutations
/// to apply. A body that runs after an upstream step may have failed must
/// check that step's catch flag with [`Context::is_flagged`] and return an
/// empty overlay instead of reading artifacts the failed step never wrote.
#[async_trait]
pub trait StepBody: Send + Sync {
    async fn run(&self, ctx: &Context) -> Result<Overlay, StepError>;
}

/// Adapter that turns a synchronous closure into a step body
pub struct FnBody<F>(pub F);

#[async_trait]
impl<F> StepBody for FnBody<F>
where
    F: Fn(&Context) -> Result<Overlay, StepError> + Send + Sync,
{
    async fn run(&self, ctx: &Context) -> Result<Overlay, StepError> {
        (self.0)(ctx)
    }
}

/// Body that does nothing, used for structural steps such as start/join/end
pub struct NoopBody;

#[async_trait]
impl StepBody for NoopBody {
    async fn run(&self, _ctx: &Context) -> Result<Overlay, StepError> {
        Ok(Overlay::new())
    }
}

/// Body that always fails, used to exercise the catch and abort paths
pub struct SimulatedFailure {
    step: String,
}

impl SimulatedFailure {
    pub fn new(step: impl Into<String>) -> Self {
        Self { step: step.into() }
    }
}

#[async_trait]
impl StepBody for SimulatedFailure {
    async fn run(&self, _ctx: &Context) -> Result<Overlay, StepError> {
        Err(StepError::Simulated(self.step.clone()))
    }
}

/// One node of the step graph
#[derive(Clone)]
pub struct Step {
    name: String,
    body: Arc<dyn StepBody>,
    catch: Option<String>,
    next: Vec<String>,
    join: bool,
    merge_exclude: Vec<String>,
}

impl Step {
    pub fn new(name: impl Into<String>, body: Arc<dyn StepBody>) -> Self {
        Self {
            name: name.into(),
            body,
            catch: None,
            next: Vec::new(),
            join: false,
            merge_exclude: Vec::new(),
        }
    }

    /// Create a step from a closure
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Context) -> Result<Overlay, StepError> + Send + Sync + 'static,
    {
        Self::new(name, Arc::new(FnBody(f)))
    }

    /// Create a step whose body does nothing
    pub fn noop(name: impl Into<String>) -> Self {
        Self::new(name, Arc::new(NoopBody))
    }

    /// Catch failures of this step under the given flag name
    pub fn catch(mut self, flag: impl Into<String>) -> Self {
        self.catch = Some(flag.into());
        self
    }

    /// Add a successor
    pub fn then(mut self, next: impl Into<String>) -> Self {
        self.next.push(next.into());
        self
    }

    /// Add several successors, forking the context between them
    pub fn fan_out<I, S>(mut self, next: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.next.extend(next.into_iter().map(Into::into));
        self
    }

    /// Mark this step as a join that waits for every predecessor
    pub fn join(mut self) -> Self {
        self.join = true;
        self
    }

    /// Exclude a key from merge conflict detection at this join
    pub fn exclude(mut self, key: impl Into<String>) -> Self {
        self.merge_exclude.push(key.into());
        self
    }

    /// Replace the body, keeping name, policy and edges
    pub fn with_body(mut self, body: Arc<dyn StepBody>) -> Self {
        self.body = body;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &Arc<dyn StepBody> {
        &self.body
    }

    pub fn catch_flag(&self) -> Option<&str> {
        self.catch.as_deref()
    }

    pub fn successors(&self) -> &[String] {
        &self.next
    }

    pub fn is_join(&self) -> bool {
        self.join
    }

    pub fn merge_exclude(&self) -> &[String] {
        &self.merge_exclude
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("catch", &self.catch)
            .field("next", &self.next)
            .field("join", &self.join)
            .field("merge_exclude", &self.merge_exclude)
            .finish_non_exhaustive()
    }
}
