// SPDX-License-Identifier: MIT

//! End-of-run failure reporting

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::context::Context;
use crate::capability::Alerter;

/// A watched catch flag that was raised during the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedStep {
    pub flag: String,
    pub step: String,
    pub cause: String,
}

/// What happened to the consolidated alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "detail")]
pub enum AlertStatus {
    /// No watched flag was raised
    NotNeeded,
    Sent,
    /// The alert channel failed; the run still completes
    Failed(String),
}

/// Caught failures observed in the final context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub failed: Vec<FailedStep>,
    pub alert: AlertStatus,
}

impl FailureSummary {
    /// Collect the raised flags among `flags`, keeping the order of `flags`
    pub fn collect(ctx: &Context, flags: &[String]) -> Self {
        let failed = flags
            .iter()
            .filter_map(|flag| {
                ctx.flag(flag).map(|f| FailedStep {
                    flag: flag.clone(),
                    step: f.step.clone(),
                    cause: f.cause.clone(),
                })
            })
            .collect();

        Self {
            failed,
            alert: AlertStatus::NotNeeded,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Names of the steps whose failures were caught
    pub fn steps(&self) -> Vec<&str> {
        self.failed.iter().map(|f| f.step.as_str()).collect()
    }

    /// Human-readable one-message summary
    pub fn message(&self, run_id: &str) -> String {
        let details: Vec<String> = self
            .failed
            .iter()
            .map(|f| format!("{} ({})", f.step, f.cause))
            .collect();
        format!(
            "Run {} completed with {} failed step(s): {}",
            run_id,
            self.failed.len(),
            details.join(", ")
        )
    }
}

/// Upper bound on a single alert attempt
pub const DEFAULT_ALERT_TIMEOUT: Duration = Duration::from_secs(30);

/// Inspects a fixed list of catch flags and sends one alert per run
#[derive(Clone)]
pub struct FailureReporter {
    flags: Vec<String>,
    alerter: Arc<dyn Alerter>,
    timeout: Duration,
}

impl FailureReporter {
    pub fn new(flags: Vec<String>, alerter: Arc<dyn Alerter>) -> Self {
        Self {
            flags,
            alerter,
            timeout: DEFAULT_ALERT_TIMEOUT,
        }
    }

    /// Give up on the alert after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Summarize the watched flags and notify the alerter if any were raised.
    /// Alert failures and timeouts are logged and recorded in the summary,
    /// never returned.
    pub async fn report(&self, run_id: &str, ctx: &Context) -> FailureSummary {
        let mut summary = FailureSummary::collect(ctx, &self.flags);
        if summary.is_clean() {
            log::info!("[{}] no caught failures to report", run_id);
            return summary;
        }

        let message = summary.message(run_id);
        log::warn!("[{}] {}", run_id, message);

        let attempt = tokio::time::timeout(self.timeout, self.alerter.notify(&message));
        summary.alert = match attempt.await {
            Ok(Ok(())) => {
                log::info!("[{}] failure alert sent", run_id);
                AlertStatus::Sent
            }
            Ok(Err(e)) => {
                log::warn!("[{}] failure alert could not be sent: {}", run_id, e);
                AlertStatus::Failed(e.to_string())
            }
            Err(_) => {
                log::warn!(
                    "[{}] failure alert timed out after {:?}",
                    run_id,
                    self.timeout
                );
                AlertStatus::Failed(format!("timed out after {:?}", self.timeout))
            }
        };

        summary
    }
}
