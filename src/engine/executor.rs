// SPDX-License-Identifier: MIT

//! Graph executor
//!
//! One coordinator drives each run. Every branch is a tokio task that runs a
//! sequential chain of steps and hands control back to the coordinator when
//! it forks, reaches a join, finishes at the terminal step or fails fatally.
//! The coordinator buffers contexts arriving at a join until every
//! predecessor has delivered one, merges them and spawns the join's branch.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::context::{CaughtFailure, Context};
use super::graph::Graph;
use super::reporter::FailureSummary;
use super::run::{Run, RunReport, StepOutcome, StepRecord};
use super::step::Step;
use crate::error::EngineError;

/// Why a branch handed control back to the coordinator
enum BranchEnd {
    /// The next step is a join; `ctx` waits there for the other branches
    Arrived {
        join: String,
        from: String,
        ctx: Context,
    },
    /// `from` has several successors, each gets its own copy of the context
    Forked {
        from: String,
        branches: Vec<(String, Context)>,
    },
    /// The terminal step completed
    Finished(Context),
    Fatal(EngineError),
    /// The run was cancelled before the next step started
    Stopped,
}

struct BranchResult {
    records: Vec<StepRecord>,
    end: BranchEnd,
}

impl BranchResult {
    fn new(records: Vec<StepRecord>, end: BranchEnd) -> Self {
        Self { records, end }
    }
}

/// Runs graphs
#[derive(Debug, Default, Clone)]
pub struct Executor;

impl Executor {
    pub fn new() -> Self {
        Self
    }

    /// Execute a run to completion.
    ///
    /// Returns the report once the terminal step has run and the failure
    /// reporter has inspected the final context. An uncaught step failure or a
    /// merge conflict stops scheduling: running branches finish their current
    /// step, nothing new starts, and the error is returned.
    pub async fn execute(&self, run: Run) -> Result<RunReport, EngineError> {
        let Run {
            id,
            graph,
            context,
            reporter,
            cancel,
        } = run;

        let started_at = Utc::now();
        log::info!(
            "[{}] starting run at '{}' ({} steps)",
            id,
            graph.start(),
            graph.len()
        );

        let mut coordinator = Coordinator {
            run_id: id.clone(),
            graph: Arc::clone(&graph),
            token: cancel.child_token(),
            branches: JoinSet::new(),
            waiting: HashMap::new(),
            fatal: None,
        };

        coordinator.spawn(graph.start().to_string(), context);
        let (records, finished) = coordinator.drive().await;

        if let Some(err) = coordinator.fatal {
            log::error!("[{}] run aborted: {}", id, err);
            return Err(err);
        }

        let ctx = match finished {
            Some(ctx) => ctx,
            None if cancel.is_cancelled() => {
                log::warn!("[{}] run cancelled", id);
                return Err(EngineError::Cancelled);
            }
            None => {
                let mut waiting: Vec<String> = coordinator.waiting.into_keys().collect();
                waiting.sort();
                return Err(EngineError::Unfinished { waiting });
            }
        };

        let failures = match &reporter {
            Some(reporter) => reporter.report(&id, &ctx).await,
            None => FailureSummary::collect(&ctx, &graph.catch_flags()),
        };

        log::info!(
            "[{}] run completed: {} step(s) executed, {} caught failure(s)",
            id,
            records.len(),
            failures.failed.len()
        );

        Ok(RunReport {
            run_id: id,
            started_at,
            finished_at: Utc::now(),
            steps: records,
            failures,
            context: ctx,
        })
    }
}

struct Coordinator {
    run_id: String,
    graph: Arc<Graph>,
    token: CancellationToken,
    branches: JoinSet<BranchResult>,
    /// Contexts delivered to each join, keyed by predecessor
    waiting: HashMap<String, HashMap<String, Context>>,
    fatal: Option<EngineError>,
}

impl Coordinator {
    /// Wait for branches until none are left
    async fn drive(&mut self) -> (Vec<StepRecord>, Option<Context>) {
        let mut records = Vec::new();
        let mut finished = None;

        while let Some(joined) = self.branches.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    log::error!("[{}] branch task failed: {}", self.run_id, e);
                    self.abort(EngineError::TaskFailed(e.to_string()));
                    continue;
                }
            };
            records.extend(result.records);

            match result.end {
                BranchEnd::Finished(ctx) => finished = Some(ctx),
                BranchEnd::Stopped => {}
                BranchEnd::Fatal(e) => self.abort(e),
                BranchEnd::Forked { from, branches } => {
                    for (next, ctx) in branches {
                        self.route(&from, next, ctx);
                    }
                }
                BranchEnd::Arrived { join, from, ctx } => self.arrive(join, from, ctx),
            }
        }

        (records, finished)
    }

    fn spawn(&mut self, step: String, ctx: Context) {
        if self.token.is_cancelled() {
            return;
        }
        let graph = Arc::clone(&self.graph);
        let run_id = self.run_id.clone();
        let token = self.token.clone();
        self.branches.spawn(run_branch(graph, run_id, token, step, ctx));
    }

    fn route(&mut self, from: &str, next: String, ctx: Context) {
        if self.graph.is_join(&next) {
            self.arrive(next, from.to_string(), ctx);
        } else {
            self.spawn(next, ctx);
        }
    }

    fn arrive(&mut self, join: String, from: String, ctx: Context) {
        if self.token.is_cancelled() {
            return;
        }

        let expected = self.graph.predecessors(&join).len();
        let arrived = self.waiting.entry(join.clone()).or_default();
        arrived.insert(from.clone(), ctx);
        log::debug!(
            "[{}] '{}' reached join '{}' ({}/{})",
            self.run_id,
            from,
            join,
            arrived.len(),
            expected
        );
        if arrived.len() < expected {
            return;
        }

        let mut arrived = self.waiting.remove(&join).unwrap_or_default();
        let contexts: Vec<Context> = self
            .graph
            .predecessors(&join)
            .iter()
            .filter_map(|pred| arrived.remove(pred))
            .collect();
        let excluded = self
            .graph
            .step(&join)
            .map(|s| s.merge_exclude().to_vec())
            .unwrap_or_default();

        match Context::merge(contexts, &excluded) {
            Ok(merged) => {
                log::info!(
                    "[{}] merged {} branch(es) at join '{}'",
                    self.run_id,
                    expected,
                    join
                );
                self.spawn(join, merged);
            }
            Err(e) => {
                log::error!("[{}] cannot merge at join '{}': {}", self.run_id, join, e);
                self.abort(e);
            }
        }
    }

    /// Record the first fatal error and stop scheduling
    fn abort(&mut self, err: EngineError) {
        if self.fatal.is_none() {
            self.fatal = Some(err);
        } else {
            log::debug!("[{}] further failure after abort: {}", self.run_id, err);
        }
        self.token.cancel();
    }
}

/// Run steps sequentially from `first` until the branch forks, joins or ends
async fn run_branch(
    graph: Arc<Graph>,
    run_id: String,
    token: CancellationToken,
    first: String,
    mut ctx: Context,
) -> BranchResult {
    let mut records = Vec::new();
    let mut current = first;

    loop {
        if token.is_cancelled() {
            log::info!("[{}] branch stopped before '{}'", run_id, current);
            return BranchResult::new(records, BranchEnd::Stopped);
        }

        let Some(step) = graph.step(&current) else {
            let err = EngineError::TaskFailed(format!("step '{}' vanished from graph", current));
            return BranchResult::new(records, BranchEnd::Fatal(err));
        };

        match run_step(&run_id, step, &mut ctx).await {
            Ok(record) => records.push(record),
            Err(e) => return BranchResult::new(records, BranchEnd::Fatal(e)),
        }

        match step.successors() {
            [] => return BranchResult::new(records, BranchEnd::Finished(ctx)),
            [next] if graph.is_join(next) => {
                let end = BranchEnd::Arrived {
                    join: next.clone(),
                    from: current,
                    ctx,
                };
                return BranchResult::new(records, end);
            }
            [next] => current = next.clone(),
            many => {
                log::info!("[{}] '{}' forks into {:?}", run_id, current, many);
                let forks = ctx.fork(many.len());
                let end = BranchEnd::Forked {
                    from: current,
                    branches: many.iter().cloned().zip(forks).collect(),
                };
                return BranchResult::new(records, end);
            }
        }
    }
}

/// Run one step body and apply the catch policy
async fn run_step(run_id: &str, step: &Step, ctx: &mut Context) -> Result<StepRecord, EngineError> {
    log::info!("[{}] running step '{}'", run_id, step.name());
    let started = Instant::now();

    let outcome = match step.body().run(ctx).await {
        Ok(overlay) => {
            log::debug!(
                "[{}] step '{}' produced {:?}",
                run_id,
                step.name(),
                overlay.keys().collect::<Vec<_>>()
            );
            ctx.apply(overlay);
            StepOutcome::Succeeded
        }
        Err(err) => match step.catch_flag() {
            Some(flag) => {
                log::warn!(
                    "[{}] step '{}' failed, raising '{}': {}",
                    run_id,
                    step.name(),
                    flag,
                    err
                );
                let cause = err.to_string();
                ctx.raise_flag(flag, CaughtFailure::new(step.name(), cause.clone()));
                StepOutcome::Caught {
                    flag: flag.to_string(),
                    cause,
                }
            }
            None => {
                log::error!("[{}] step '{}' failed: {}", run_id, step.name(), err);
                return Err(EngineError::fatal(step.name(), err));
            }
        },
    };

    Ok(StepRecord {
        step: step.name().to_string(),
        outcome,
        duration_ms: started.elapsed().as_millis(),
    })
}
