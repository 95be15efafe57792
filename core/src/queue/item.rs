//! Durable delivery obligations.

use std::fmt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Lifecycle of one delivery obligation. Completed and Failed are terminal:
/// no automatic transition leaves them without explicit intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Pending => write!(f, "pending"),
            ItemStatus::InFlight => write!(f, "in-flight"),
            ItemStatus::Completed => write!(f, "completed"),
            ItemStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One recording awaiting delivery. Identity, artifact reference, and
/// annotations are fixed at enqueue time; only `retry_count` and `status`
/// change afterwards, and only inside the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub artifact_path: PathBuf,
    /// Bookmark offsets in seconds, in the order they were set.
    pub bookmarks: Vec<f64>,
    /// Importance bit supplied by the gesture that ended the recording.
    pub flagged: bool,
    pub retry_count: u32,
    /// Unix seconds.
    pub created_at: u64,
    pub status: ItemStatus,
}

impl QueueItem {
    pub fn new(artifact_path: PathBuf, bookmarks: Vec<f64>, flagged: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            artifact_path,
            bookmarks,
            flagged,
            retry_count: 0,
            created_at: now_secs(),
            status: ItemStatus::Pending,
        }
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Per-status counts reported by `DeliveryQueue::status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl QueueStatus {
    pub(crate) fn tally(items: &[QueueItem]) -> Self {
        let mut counts = Self::default();
        for item in items {
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::InFlight => counts.in_flight += 1,
                ItemStatus::Completed => counts.completed += 1,
                ItemStatus::Failed => counts.failed += 1,
            }
            counts.total += 1;
        }
        counts
    }
}
