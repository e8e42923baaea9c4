// SPDX-License-Identifier: MIT

//! Typed error handling for stepflow
//!
//! Engine errors terminate a run and reach the caller. Step errors stay inside
//! the executor: they either become a failure flag on the context or are
//! wrapped into [`EngineError::FatalStepFailure`].

use thiserror::Error;

use crate::capability::{DataSourceError, PersistenceError};

/// Errors that terminate a run or reject a graph
#[derive(Debug, Error)]
pub enum EngineError {
    /// A step read a context key that was never set upstream
    #[error("Missing artifact '{key}'")]
    MissingArtifact { key: String },

    /// Two merging branches both set a non-excluded key to different values
    #[error("Merge conflict on artifact '{key}'")]
    MergeConflict { key: String },

    /// Structural problem detected at graph construction
    #[error("Invalid graph: {0}")]
    InvalidGraph(#[from] GraphViolation),

    /// A step without a catch flag failed, aborting the run
    #[error("Step '{step}' failed: {source}")]
    FatalStepFailure {
        step: String,
        #[source]
        source: Box<StepError>,
    },

    /// The run was cancelled by its caller
    #[error("Run cancelled")]
    Cancelled,

    /// A branch task panicked or was aborted by the runtime
    #[error("Branch task failed: {0}")]
    TaskFailed(String),

    /// Every branch finished but the terminal step was never reached
    #[error("Run ended before reaching the terminal step (waiting joins: {waiting:?})")]
    Unfinished { waiting: Vec<String> },
}

impl EngineError {
    pub fn missing(key: impl Into<String>) -> Self {
        Self::MissingArtifact { key: key.into() }
    }

    pub fn conflict(key: impl Into<String>) -> Self {
        Self::MergeConflict { key: key.into() }
    }

    pub fn fatal(step: impl Into<String>, source: StepError) -> Self {
        Self::FatalStepFailure {
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Name of the step that aborted the run, if any
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            Self::FatalStepFailure { step, .. } => Some(step),
            _ => None,
        }
    }
}

/// A specific structural violation found while validating a graph
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphViolation {
    #[error("graph has no steps")]
    Empty,

    #[error("no start step (every step has a predecessor)")]
    NoStart,

    #[error("multiple start steps: {0:?}")]
    MultipleStarts(Vec<String>),

    #[error("no end step (every step has a successor)")]
    NoEnd,

    #[error("multiple end steps: {0:?}")]
    MultipleEnds(Vec<String>),

    #[error("duplicate step name '{0}'")]
    DuplicateStep(String),

    #[error("step '{from}' lists successor '{to}' more than once")]
    DuplicateEdge { from: String, to: String },

    #[error("step '{from}' points at unknown step '{to}'")]
    DanglingEdge { from: String, to: String },

    #[error("step '{0}' is not reachable from the start step")]
    Unreachable(String),

    #[error("step '{0}' has several predecessors but is not marked as a join")]
    UnmarkedJoin(String),

    #[error("cycle detected between steps {0:?}")]
    Cycle(Vec<String>),
}

/// Failure raised by a step body
#[derive(Debug, Error)]
pub enum StepError {
    /// Engine-level problem surfaced inside the step (usually a missing artifact)
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    DataSource(#[from] DataSourceError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Failure injected on purpose to exercise the catch/abort paths
    #[error("Simulated failure in step '{0}'")]
    Simulated(String),

    #[error("{0}")]
    Other(String),
}

impl StepError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<&str> for StepError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for StepError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for StepError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(err.to_string())
    }
}

/// Errors raised while loading or compiling a flow definition
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Flow definition error: {0}")]
    Definition(String),

    /// A step refers to a body that was never registered
    #[error("No step body registered under '{0}'")]
    UnknownStepBody(String),

    /// A step name given on the command line does not exist in the flow
    #[error("Flow has no step named '{0}'")]
    UnknownStep(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl FlowError {
    pub fn definition(message: impl Into<String>) -> Self {
        Self::Definition(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
