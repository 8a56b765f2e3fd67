//! Storage - where definitions live between runs.
//!
//! The runtime only needs load and save; versioning policy belongs to the store.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::definition::TreeDefinition;
use crate::error::{Result, RuntimeError};

#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Load a definition; `None` selects the latest version.
    async fn load(&self, id: &str, version: Option<u64>) -> Result<TreeDefinition>;

    /// Save a new version and return its number.
    async fn save(&self, id: &str, definition: &TreeDefinition) -> Result<u64>;

    /// Stored versions, oldest first.
    async fn versions(&self, id: &str) -> Result<Vec<u64>>;
}

/// Process-local store with monotonically increasing versions starting at 1.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    definitions: RwLock<HashMap<String, BTreeMap<u64, TreeDefinition>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionStore for InMemoryStore {
    async fn load(&self, id: &str, version: Option<u64>) -> Result<TreeDefinition> {
        let definitions = self.definitions.read().await;
        let versions = definitions.get(id);
        let found = match version {
            Some(v) => versions.and_then(|vs| vs.get(&v)),
            None => versions.and_then(|vs| vs.values().next_back()),
        };
        found.cloned().ok_or_else(|| RuntimeError::DefinitionNotFound {
            id: id.to_string(),
            version,
        })
    }

    async fn save(&self, id: &str, definition: &TreeDefinition) -> Result<u64> {
        if id.trim().is_empty() {
            return Err(RuntimeError::Storage("definition id must not be empty".to_string()));
        }
        let mut definitions = self.definitions.write().await;
        let versions = definitions.entry(id.to_string()).or_default();
        let version = versions.keys().next_back().map_or(1, |last| last + 1);
        versions.insert(version, definition.clone());
        tracing::debug!(definition = id, version, "definition saved");
        Ok(version)
    }

    async fn versions(&self, id: &str) -> Result<Vec<u64>> {
        Ok(self
            .definitions
            .read()
            .await
            .get(id)
            .map(|vs| vs.keys().copied().collect())
            .unwrap_or_default())
    }
}
