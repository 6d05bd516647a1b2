// src/store/file.rs
//! One JSON file per record: `<root>/<table>/<sha256(key)>.json`.
//!
//! Writes go to a temp file that is then hard-linked into place. Linking fails with
//! `AlreadyExists` when another writer got there first, which makes the write
//! create-if-absent across processes sharing the directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{KvStore, KvWrite};
use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct FileKv {
    root: PathBuf,
}

impl FileKv {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, table: &str) -> Result<PathBuf, StoreError> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::Unavailable(format!("invalid table name `{table}`")));
        }
        Ok(self.root.join(table))
    }

    /// Keys are hashed so any message id maps to a safe file name.
    pub fn record_path(&self, table: &str, key: &str) -> Result<PathBuf, StoreError> {
        let digest = Sha256::digest(key.as_bytes());
        let name: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Ok(self.table_dir(table)?.join(format!("{name}.json")))
    }
}

async fn read_record(path: &Path) -> Result<Value, StoreError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| StoreError::Unavailable(format!("reading {}: {e}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
}

#[async_trait]
impl KvStore for FileKv {
    async fn upsert(&self, table: &str, key: &str, record: Value) -> Result<KvWrite, StoreError> {
        let path = self.record_path(table, key)?;
        let dir = self.table_dir(table)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Unavailable(format!("creating {}: {e}", dir.display())))?;

        let present = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))?;
        if present {
            return read_record(&path).await.map(KvWrite::Existing);
        }

        let bytes = serde_json::to_vec_pretty(&record)
            .map_err(|e| StoreError::Corrupt(format!("serializing record: {e}")))?;
        let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StoreError::Unavailable(format!("writing {}: {e}", tmp.display())))?;

        let linked = tokio::fs::hard_link(&tmp, &path).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => Ok(KvWrite::Inserted),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                read_record(&path).await.map(KvWrite::Existing)
            }
            Err(e) => Err(StoreError::Unavailable(format!(
                "publishing {}: {e}",
                path.display()
            ))),
        }
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.record_path(table, key)?;
        match tokio::fs::try_exists(&path).await {
            Ok(true) => read_record(&path).await.map(Some),
            Ok(false) => Ok(None),
            Err(e) => Err(StoreError::Unavailable(format!("{}: {e}", path.display()))),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
