// SPDX-License-Identifier: MIT

//! A single invocation of a graph

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::context::Context;
use super::executor::Executor;
use super::graph::Graph;
use super::reporter::{FailureReporter, FailureSummary};
use crate::error::EngineError;

/// How a step finished
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum StepOutcome {
    Succeeded,
    /// Body failed and the failure was recorded under `flag`
    Caught { flag: String, cause: String },
}

/// Per-step entry of a run report
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: String,
    #[serde(flatten)]
    pub outcome: StepOutcome,
    pub duration_ms: u128,
}

/// Result of a run that reached its terminal step
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Steps grouped by branch, in the order branches handed back to the
    /// coordinator; within a branch, in execution order
    pub steps: Vec<StepRecord>,
    pub failures: FailureSummary,
    pub context: Context,
}

impl RunReport {
    pub fn record(&self, step: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|r| r.step == step)
    }

    pub fn ran(&self, step: &str) -> bool {
        self.record(step).is_some()
    }
}

/// One execution of a graph: owns the graph, the root context and run options
pub struct Run {
    pub(crate) id: String,
    pub(crate) graph: Arc<Graph>,
    pub(crate) context: Context,
    pub(crate) reporter: Option<FailureReporter>,
    pub(crate) cancel: CancellationToken,
}

impl Run {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            graph,
            context: Context::new(),
            reporter: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Seed the root context with an input parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.set(key, value);
        self
    }

    /// Replace the root context
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_reporter(mut self, reporter: FailureReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Cancel the run when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Execute with a default executor
    pub async fn execute(self) -> Result<RunReport, EngineError> {
        Executor::new().execute(self).await
    }
}
