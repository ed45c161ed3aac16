//! Mapping cache contract.
//!
//! The persistent cache is owned externally (SQL-backed in production);
//! this module defines the seam the orchestrator consumes plus an
//! in-memory implementation for tests and single-process runs. Upserts
//! are idempotent and keyed by `(source_id, source_type, target_type)`
//! so concurrent or repeated pipeline runs cannot corrupt the store.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use biomapper_common::{MatchMethod, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMapping {
    pub source_id: String,
    pub source_type: String,
    pub target_type: String,
    pub target_id: String,
    pub target_name: String,
    pub confidence: f64,
    pub method: MatchMethod,
    pub stage: u8,
}

impl CachedMapping {
    fn key(&self) -> (String, String, String) {
        (
            self.source_id.clone(),
            self.source_type.clone(),
            self.target_type.clone(),
        )
    }
}

#[async_trait]
pub trait MappingCache: Send + Sync {
    async fn get(
        &self,
        source_id: &str,
        source_type: &str,
        target_type: &str,
    ) -> Result<Option<CachedMapping>>;

    /// Idempotent: repeating the same upsert leaves the store unchanged.
    async fn upsert(&self, mapping: &CachedMapping) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryMappingCache {
    inner: RwLock<HashMap<(String, String, String), CachedMapping>>,
}

impl InMemoryMappingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl MappingCache for InMemoryMappingCache {
    async fn get(
        &self,
        source_id: &str,
        source_type: &str,
        target_type: &str,
    ) -> Result<Option<CachedMapping>> {
        let key = (
            source_id.to_string(),
            source_type.to_string(),
            target_type.to_string(),
        );
        Ok(self.inner.read().await.get(&key).cloned())
    }

    async fn upsert(&self, mapping: &CachedMapping) -> Result<()> {
        self.inner
            .write()
            .await
            .insert(mapping.key(), mapping.clone());
        Ok(())
    }
}
