//! Persisted mirror of the queue: one JSON document, loaded wholesale at
//! startup and rewritten wholesale after every mutation.
//!
//! Mutators here touch memory only; [`QueueStore::persist`] does the rewrite
//! (temp file + rename, so a crash mid-write never truncates the live
//! document). The delivery layer pairs every mutation with a persist.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::item::{ItemStatus, QueueItem, QueueStatus};

/// Bump when the on-disk document shape changes.
const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unsupported schema version {found}, expected {expected}")]
    SchemaVersion { found: u32, expected: u32 },
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    schema: u32,
    items: Vec<QueueItem>,
}

/// Owns the queue collection and its file. The in-memory list is the single
/// source of truth once loaded.
#[derive(Debug)]
pub struct QueueStore {
    path: PathBuf,
    items: Vec<QueueItem>,
}

impl QueueStore {
    /// Open or create the store at `path`.
    ///
    /// InFlight items found on disk are recovered to Pending before anything
    /// else can observe them: a crash mid-delivery leaves no way to know
    /// whether the attempt landed, so it counts as not yet delivered.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if !path.exists() {
            let store = Self {
                path,
                items: Vec::new(),
            };
            store.persist()?;
            return Ok(store);
        }

        let raw = fs::read_to_string(&path)?;
        let doc: StoreDocument = serde_json::from_str(&raw)?;
        if doc.schema != SCHEMA_VERSION {
            return Err(StoreError::SchemaVersion {
                found: doc.schema,
                expected: SCHEMA_VERSION,
            });
        }

        let mut items = doc.items;
        let mut recovered = 0;
        for item in items.iter_mut() {
            if item.status == ItemStatus::InFlight {
                item.status = ItemStatus::Pending;
                recovered += 1;
            }
        }

        let store = Self { path, items };
        if recovered > 0 {
            info!(recovered, "recovered interrupted deliveries to pending");
            store.persist()?;
        }
        Ok(store)
    }

    /// Rewrite the whole document.
    pub fn persist(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let doc = StoreDocument {
            schema: SCHEMA_VERSION,
            items: self.items.clone(),
        };
        let json = serde_json::to_string_pretty(&doc)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn counts(&self) -> QueueStatus {
        QueueStatus::tally(&self.items)
    }

    pub fn push(&mut self, item: QueueItem) {
        self.items.push(item);
    }

    /// Oldest Pending item still under the retry limit. Insertion order is
    /// creation order, so the first match is the oldest.
    pub fn next_pending(&self, max_retries: u32) -> Option<QueueItem> {
        self.items
            .iter()
            .find(|i| i.status == ItemStatus::Pending && i.retry_count < max_retries)
            .cloned()
    }

    /// Returns false when no item carries `id`.
    pub fn set_status(&mut self, id: &str, status: ItemStatus) -> bool {
        match self.items.iter_mut().find(|i| i.id == id) {
            Some(item) => {
                item.status = status;
                true
            }
            None => {
                warn!(id, "status update for unknown queue item");
                false
            }
        }
    }

    /// Account one failed attempt: bump the retry count, then park the item
    /// as Pending or, once the limit is reached, as Failed. Returns the
    /// resulting status.
    pub fn record_failure(&mut self, id: &str, max_retries: u32) -> Option<ItemStatus> {
        let item = self.items.iter_mut().find(|i| i.id == id)?;
        item.retry_count += 1;
        item.status = if item.retry_count >= max_retries {
            ItemStatus::Failed
        } else {
            ItemStatus::Pending
        };
        Some(item.status)
    }

    /// Every Failed item becomes Pending again with a fresh retry budget.
    pub fn reset_failed(&mut self) -> usize {
        let mut reset = 0;
        for item in self.items.iter_mut() {
            if item.status == ItemStatus::Failed {
                item.status = ItemStatus::Pending;
                item.retry_count = 0;
                reset += 1;
            }
        }
        reset
    }

    /// Drop Completed items, returning how many were removed.
    pub fn remove_completed(&mut self) -> usize {
        let before = self.items.len();
        self.items.retain(|i| i.status != ItemStatus::Completed);
        before - self.items.len()
    }

    /// Drop terminal items older than `retention_secs`, returning their
    /// artifact paths for best-effort deletion by the caller.
    pub fn remove_expired(&mut self, retention_secs: u64, now: u64) -> Vec<PathBuf> {
        let mut artifacts = Vec::new();
        self.items.retain(|item| {
            let expired = item.status.is_terminal()
                && item.created_at.saturating_add(retention_secs) <= now;
            if expired {
                artifacts.push(item.artifact_path.clone());
            }
            !expired
        });
        artifacts
    }
}
