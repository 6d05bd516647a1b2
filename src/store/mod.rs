// src/store/mod.rs
//! Alert persistence.
//!
//! [`AlertStore`] writes one record per message id through a [`KvStore`] whose `upsert`
//! is insert-if-absent. Duplicate deliveries collapse onto the first record and get its id back.
//! No in-process locking; the backend's keyed write is the only arbiter.

pub mod file;
pub mod memory;
pub mod record;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::StoreError;

pub use file::FileKv;
pub use memory::MemoryKv;
pub use record::{bound_payload, AlertRecord};

/// Result of an insert-if-absent write.
#[derive(Debug, Clone, PartialEq)]
pub enum KvWrite {
    Inserted,
    /// A record already existed under the key; it is returned unchanged.
    Existing(Value),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Insert `record` under `key` unless the key already exists.
    async fn upsert(&self, table: &str, key: &str, record: Value) -> Result<KvWrite, StoreError>;
    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError>;
    fn name(&self) -> &'static str;
}

pub type DynKvStore = Arc<dyn KvStore>;

/// Outcome of [`AlertStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredAlert {
    /// The authoritative (first-written) record id.
    pub id: Uuid,
    pub created: bool,
}

#[derive(Clone)]
pub struct AlertStore {
    kv: DynKvStore,
    table: String,
}

impl AlertStore {
    pub fn new(kv: DynKvStore, table: impl Into<String>) -> Self {
        Self {
            kv,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn backend(&self) -> &'static str {
        self.kv.name()
    }

    pub async fn upsert(&self, record: &AlertRecord) -> Result<StoredAlert, StoreError> {
        let value = serde_json::to_value(record)
            .map_err(|e| StoreError::Corrupt(format!("serializing record: {e}")))?;
        match self.kv.upsert(&self.table, &record.message_id, value).await? {
            KvWrite::Inserted => Ok(StoredAlert {
                id: record.id,
                created: true,
            }),
            KvWrite::Existing(existing) => {
                let id = existing
                    .get("id")
                    .and_then(Value::as_str)
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .ok_or_else(|| {
                        StoreError::Corrupt(format!(
                            "record for message {} has no valid id",
                            record.message_id
                        ))
                    })?;
                Ok(StoredAlert { id, created: false })
            }
        }
    }

    pub async fn get(&self, message_id: &str) -> Result<Option<AlertRecord>, StoreError> {
        match self.kv.get(&self.table, message_id).await? {
            None => Ok(None),
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(format!("record for message {message_id}: {e}"))),
        }
    }
}
