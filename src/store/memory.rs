// src/store/memory.rs
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{KvStore, KvWrite};
use crate::error::StoreError;

/// Process-local tables. Tests and single-instance deployments.
#[derive(Debug, Default)]
pub struct MemoryKv {
    tables: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.lock().get(table).map_or(0, HashMap::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, HashMap<String, Value>>> {
        self.tables.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn upsert(&self, table: &str, key: &str, record: Value) -> Result<KvWrite, StoreError> {
        let mut tables = self.lock();
        let rows = tables.entry(table.to_string()).or_default();
        if let Some(existing) = rows.get(key) {
            return Ok(KvWrite::Existing(existing.clone()));
        }
        rows.insert(key.to_string(), record);
        Ok(KvWrite::Inserted)
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.lock().get(table).and_then(|rows| rows.get(key)).cloned())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
