// SPDX-License-Identifier: MIT

//! Built-in transactions flow
//!
//! `read` loads transactions, then two branches run concurrently: one tags
//! each transaction from its wording, the other annotates it from its amount.
//! Each branch publishes its results, and the branches meet at `join`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::capability::{DataSource, Persistence, Record};
use crate::engine::{Context, NoopBody, Overlay, StepBody};
use crate::error::{FlowError, StepError};
use crate::flow::definition::FlowDefinition;
use crate::flow::loader::FlowLoader;
use crate::flow::registry::StepRegistry;

const DEFINITION: &str = include_str!("transactions.yaml");

/// Run parameter naming the records to load (a path or inline content)
pub const INPUT_SOURCE: &str = "input_source";

pub const TRANSACTIONS: &str = "transactions";
pub const TAGS: &str = "tags";
pub const ANNOTATIONS: &str = "annotations";

pub const TAG_FAILED: &str = "tag_failed";
pub const ANNOTATE_FAILED: &str = "annotate_failed";

pub const PRIMARY_KEY: &str = "transaction_id";

pub const POTENTIAL_TAGS: [&str; 4] = ["TATA", "TOTO", "TUTU", "TAXI"];

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub wording: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Tag {
    pub transaction_id: i64,
    pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Annotation {
    pub transaction_id: i64,
    pub annotation: String,
}

/// The tag whose name appears in `wording`, when exactly one does
pub fn tag_for(wording: &str) -> Option<&'static str> {
    let mut matches = POTENTIAL_TAGS
        .iter()
        .copied()
        .filter(|tag| wording.contains(tag));
    match (matches.next(), matches.next()) {
        (Some(tag), None) => Some(tag),
        _ => None,
    }
}

/// Classify an amount; zero amounts get no annotation
pub fn annotation_for(amount: f64) -> Option<&'static str> {
    if amount == 0.0 {
        None
    } else if amount > 300.0 {
        Some("LARGE SALE")
    } else if amount > 0.0 {
        Some("SALE")
    } else if amount < -200.0 {
        Some("EXPENSE")
    } else {
        Some("SMALL EXPENSE")
    }
}

pub struct ReadTransactions {
    source: Arc<dyn DataSource>,
}

#[async_trait]
impl StepBody for ReadTransactions {
    async fn run(&self, ctx: &Context) -> Result<Overlay, StepError> {
        let input: String = ctx.get_as(INPUT_SOURCE)?;
        let records = self.source.load_records(&input).await?;

        let transactions = records
            .into_iter()
            .map(|record| serde_json::from_value::<Transaction>(Value::Object(record)))
            .collect::<Result<Vec<_>, _>>()?;

        log::info!("Loaded {} transactions", transactions.len());
        Ok(Overlay::new().with(TRANSACTIONS, serde_json::to_value(&transactions)?))
    }
}

pub struct TagTransactions;

#[async_trait]
impl StepBody for TagTransactions {
    async fn run(&self, ctx: &Context) -> Result<Overlay, StepError> {
        let transactions: Vec<Transaction> = ctx.get_as(TRANSACTIONS)?;
        let tags: Vec<Tag> = transactions
            .iter()
            .map(|t| Tag {
                transaction_id: t.id,
                tag: tag_for(&t.wording).map(str::to_string),
            })
            .collect();

        log::debug!(
            "Tagged {} of {} transactions",
            tags.iter().filter(|t| t.tag.is_some()).count(),
            tags.len()
        );
        Ok(Overlay::new().with(TAGS, serde_json::to_value(&tags)?))
    }
}

pub struct AnnotateTransactions;

#[async_trait]
impl StepBody for AnnotateTransactions {
    async fn run(&self, ctx: &Context) -> Result<Overlay, StepError> {
        let transactions: Vec<Transaction> = ctx.get_as(TRANSACTIONS)?;
        let annotations: Vec<Annotation> = transactions
            .iter()
            .filter_map(|t| {
                annotation_for(t.amount).map(|annotation| Annotation {
                    transaction_id: t.id,
                    annotation: annotation.to_string(),
                })
            })
            .collect();

        log::debug!("Annotated {} transactions", annotations.len());
        Ok(Overlay::new().with(ANNOTATIONS, serde_json::to_value(&annotations)?))
    }
}

/// Upserts a list artifact into a collection of the same name, unless the
/// step that produces it failed
pub struct Publish {
    artifact: &'static str,
    upstream_flag: &'static str,
    store: Arc<dyn Persistence>,
}

impl Publish {
    pub fn new(
        artifact: &'static str,
        upstream_flag: &'static str,
        store: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            artifact,
            upstream_flag,
            store,
        }
    }
}

#[async_trait]
impl StepBody for Publish {
    async fn run(&self, ctx: &Context) -> Result<Overlay, StepError> {
        if ctx.is_flagged(self.upstream_flag) {
            log::warn!(
                "Skipping publication of '{}': {} is set",
                self.artifact,
                self.upstream_flag
            );
            return Ok(Overlay::new());
        }

        let records: Vec<Record> = ctx.get_as(self.artifact)?;
        let written = self
            .store
            .upsert(self.artifact, &records, PRIMARY_KEY)
            .await?;

        log::info!("Published {} records to '{}'", written, self.artifact);
        Ok(Overlay::new().with(format!("{}_published", self.artifact), written))
    }
}

/// Register every body the transactions flow refers to
pub async fn register_steps(
    registry: &StepRegistry,
    source: Arc<dyn DataSource>,
    store: Arc<dyn Persistence>,
) {
    registry.register("noop", Arc::new(NoopBody)).await;
    registry
        .register("read_transactions", Arc::new(ReadTransactions { source }))
        .await;
    registry
        .register("tag_transactions", Arc::new(TagTransactions))
        .await;
    registry
        .register("annotate_transactions", Arc::new(AnnotateTransactions))
        .await;
    registry
        .register(
            "publish_tags",
            Arc::new(Publish::new(TAGS, TAG_FAILED, store.clone())),
        )
        .await;
    registry
        .register(
            "publish_annotations",
            Arc::new(Publish::new(ANNOTATIONS, ANNOTATE_FAILED, store)),
        )
        .await;
}

/// The embedded transactions flow definition
pub fn definition() -> Result<FlowDefinition, FlowError> {
    FlowLoader::parse_yaml(DEFINITION)
}
