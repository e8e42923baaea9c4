// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{check_primary_key, Persistence, PersistenceError, Record};

/// In-process persistence, shared between clones
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, BTreeMap<String, Record>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, collection: &str) -> usize {
        let collections = self.collections.read().await;
        collections.get(collection).map_or(0, |c| c.len())
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn upsert(
        &self,
        collection: &str,
        records: &[Record],
        primary_key: &str,
    ) -> Result<usize, PersistenceError> {
        check_primary_key(collection, records, primary_key)?;

        let mut collections = self.collections.write().await;
        let rows = collections.entry(collection.to_string()).or_default();
        for record in records {
            let key = record
                .get(primary_key)
                .map(|v| v.to_string())
                .unwrap_or_default();
            rows.insert(key, record.clone());
        }
        Ok(records.len())
    }

    async fn fetch_all(&self, collection: &str) -> Result<Vec<Record>, PersistenceError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }
}
