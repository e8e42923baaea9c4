// SPDX-License-Identifier: MIT

use crate::engine::StepBody;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Step bodies available to flow definitions, looked up by name
#[derive(Clone)]
pub struct StepRegistry {
    bodies: Arc<RwLock<HashMap<String, Arc<dyn StepBody>>>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            bodies: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn register(&self, name: impl Into<String>, body: Arc<dyn StepBody>) {
        let mut bodies = self.bodies.write().await;
        bodies.insert(name.into(), body);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn StepBody>> {
        let bodies = self.bodies.read().await;
        bodies.get(name).cloned()
    }

    /// Registered names, sorted
    pub async fn names(&self) -> Vec<String> {
        let bodies = self.bodies.read().await;
        let mut names: Vec<String> = bodies.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}
