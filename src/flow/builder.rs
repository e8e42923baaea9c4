// SPDX-License-Identifier: MIT

//! Flow builder - compiles flow definitions into validated graphs
//!
//! Step bodies are resolved from a `StepRegistry`. A single step can be
//! swapped for a `SimulatedFailure` to exercise the failure policy.

use crate::capability::Alerter;
use crate::engine::{FailureReporter, Graph, SimulatedFailure, Step, StepBody};
use crate::error::FlowError;
use crate::flow::definition::FlowDefinition;
use crate::flow::loader::FlowLoader;
use crate::flow::registry::StepRegistry;

use std::path::Path;
use std::sync::Arc;

/// A compiled flow, ready to run
#[derive(Debug, Clone)]
pub struct Flow {
    pub name: String,
    pub graph: Arc<Graph>,
    /// Catch flags the failure reporter watches
    pub report_flags: Vec<String>,
}

impl Flow {
    pub fn reporter(&self, alerter: Arc<dyn Alerter>) -> FailureReporter {
        FailureReporter::new(self.report_flags.clone(), alerter)
    }
}

pub struct FlowBuilder {
    loader: FlowLoader,
    registry: StepRegistry,
    simulate: Option<String>,
}

impl FlowBuilder {
    pub fn new(registry: StepRegistry) -> Self {
        Self {
            loader: FlowLoader::new(),
            registry,
            simulate: None,
        }
    }

    /// Replace the body of `step` with one that always fails
    pub fn simulate_failure(mut self, step: Option<impl Into<String>>) -> Self {
        self.simulate = step.map(Into::into);
        self
    }

    /// Build a flow from a YAML file path
    pub async fn build_file(&self, path: impl AsRef<Path>) -> Result<Flow, FlowError> {
        let def = self.loader.load_flow(path)?;
        self.build(&def).await
    }

    /// Build a flow from a parsed definition
    pub async fn build(&self, def: &FlowDefinition) -> Result<Flow, FlowError> {
        if let Some(target) = &self.simulate {
            if !def.steps.iter().any(|s| &s.name == target) {
                return Err(FlowError::UnknownStep(target.clone()));
            }
        }

        let mut steps = Vec::with_capacity(def.steps.len());
        for step_def in &def.steps {
            let registered = self
                .registry
                .get(step_def.body_name())
                .await
                .ok_or_else(|| FlowError::UnknownStepBody(step_def.body_name().to_string()))?;

            let body: Arc<dyn StepBody> = match &self.simulate {
                Some(target) if target == &step_def.name => {
                    log::warn!("Step '{}' will fail with a simulated error", target);
                    Arc::new(SimulatedFailure::new(target.clone()))
                }
                _ => registered,
            };

            let mut step = Step::new(&step_def.name, body).fan_out(step_def.next.to_vec());
            if let Some(flag) = &step_def.catch {
                step = step.catch(flag);
            }
            if step_def.join {
                step = step.join();
            }
            for key in &step_def.merge_exclude {
                step = step.exclude(key);
            }
            steps.push(step);
        }

        let graph = Graph::new(steps)?;

        let declared = graph.catch_flags();
        let report_flags = match &def.report {
            Some(report) => {
                if let Some(unknown) = report.flags.iter().find(|f| !declared.contains(f)) {
                    return Err(FlowError::definition(format!(
                        "report flag '{}' is not raised by any step",
                        unknown
                    )));
                }
                report.flags.clone()
            }
            None => declared,
        };

        log::info!(
            "Built flow '{}' with {} steps, reporting on {:?}",
            def.name,
            graph.len(),
            report_flags
        );

        Ok(Flow {
            name: def.name.clone(),
            graph: Arc::new(graph),
            report_flags,
        })
    }
}
