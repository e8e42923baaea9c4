// SPDX-License-Identifier: MIT

//! External collaborators called from step bodies
//!
//! - `DataSource` - loads input records
//! - `Persistence` - idempotent insert-or-replace keyed by a primary key
//! - `Alerter` - best-effort out-of-band notification

mod memory;
mod sms;
mod source;
mod sqlite;

pub use memory::MemoryStore;
pub use sms::{NullAlerter, TwilioAlerter};
pub use source::FileSource;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// One input or output row
pub type Record = Map<String, Value>;

/// Loads the records a run starts from
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn load_records(&self, source: &str) -> Result<Vec<Record>, DataSourceError>;
}

/// Keyed record storage
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Insert or replace `records` in `collection`, keyed by `primary_key`.
    /// Returns the number of records written.
    async fn upsert(
        &self,
        collection: &str,
        records: &[Record],
        primary_key: &str,
    ) -> Result<usize, PersistenceError>;

    /// All records currently stored in `collection`
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Record>, PersistenceError>;
}

/// Out-of-band notification channel
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), AlertError>;
}

#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("Cannot read records from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse records: {0}")]
    Parse(String),

    /// The document parsed but is not a list
    #[error("Expected a list of records, found {0}")]
    NotAList(String),

    #[error("Record {index} is not an object")]
    NotARecord { index: usize },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(String),

    /// The key is absent or `null`
    #[error("Record {index} in '{collection}' has no value for primary key '{key}'")]
    MissingPrimaryKey {
        collection: String,
        key: String,
        index: usize,
    },

    #[error("Invalid identifier '{0}'")]
    InvalidIdentifier(String),
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("Cannot send alert: no alert configuration")]
    NotConfigured,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Alert rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Check that each record carries a non-null primary key
pub(crate) fn check_primary_key(
    collection: &str,
    records: &[Record],
    primary_key: &str,
) -> Result<(), PersistenceError> {
    let missing = records
        .iter()
        .position(|r| !r.get(primary_key).is_some_and(|v| !v.is_null()));
    match missing {
        Some(index) => Err(PersistenceError::MissingPrimaryKey {
            collection: collection.to_string(),
            key: primary_key.to_string(),
            index,
        }),
        None => Ok(()),
    }
}
