// SPDX-License-Identifier: MIT

//! Step-graph execution engine
//!
//! This module provides:
//! - `Context` - forkable/mergeable artifact store with typed failure flags
//! - `Step` / `StepBody` - named units of work and their catch policy
//! - `Graph` - the validated static DAG of steps
//! - `Executor` / `Run` - concurrent traversal with fan-out and joins
//! - `FailureReporter` - end-of-run alerting on caught failures

mod context;
mod executor;
mod graph;
mod reporter;
mod run;
mod step;

pub use context::{CaughtFailure, Context, Overlay};
pub use executor::Executor;
pub use graph::{Graph, GraphBuilder};
pub use reporter::{AlertStatus, FailedStep, FailureReporter, FailureSummary};
pub use run::{Run, RunReport, StepOutcome, StepRecord};
pub use step::{FnBody, NoopBody, SimulatedFailure, Step, StepBody};
