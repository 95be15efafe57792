//! Single-flight delivery loop with bounded exponential backoff.
//!
//! `enqueue` is synchronous: it persists the new item and wakes the loop.
//! The loop claims the oldest eligible Pending item, marks it InFlight,
//! verifies the artifact, and attempts delivery under a fixed timeout. A
//! failed attempt parks the item as Pending (or Failed once the retry limit
//! is reached) and sleeps the computed backoff in place, so a second loop
//! can never start while one is backing off.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::endpoint::{DeliveryEndpoint, DeliveryError};
use super::item::{now_secs, ItemStatus, QueueItem, QueueStatus};
use super::store::QueueStore;

/// Exponent clamp; beyond this the cap decides anyway.
const BACKOFF_EXPONENT_CAP: u32 = 16;

/// Delivery behavior knobs. Replaced wholesale, never field-by-field.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Failed attempts allowed before an item parks as Failed.
    pub max_retries: u32,
    /// Base of the exponential backoff.
    pub retry_delay: Duration,
    /// Hard ceiling on any computed backoff.
    pub max_retry_delay: Duration,
    /// Upper bound of the uniform jitter added to each backoff.
    pub jitter_ceiling: Duration,
    /// Bound on one delivery attempt.
    pub delivery_timeout: Duration,
    /// Age past which terminal items are cleaned up.
    pub retention_period: Duration,
    pub cleanup_interval: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(2),
            max_retry_delay: Duration::from_secs(300),
            jitter_ceiling: Duration::from_secs(1),
            delivery_timeout: Duration::from_secs(30),
            retention_period: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl DeliveryConfig {
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_retries == 0 {
            return Err(QueueError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if self.retry_delay.is_zero()
            || self.delivery_timeout.is_zero()
            || self.cleanup_interval.is_zero()
        {
            return Err(QueueError::InvalidConfig(
                "delivery intervals must be non-zero".to_string(),
            ));
        }
        if self.max_retry_delay < self.retry_delay {
            return Err(QueueError::InvalidConfig(
                "max_retry_delay must not undercut retry_delay".to_string(),
            ));
        }
        Ok(())
    }

    /// `min(retry_delay * 2^retry_count + uniform(0, jitter_ceiling), max_retry_delay)`
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let base_ms = self.retry_delay.as_millis() as u64;
        let factor = 2u64.saturating_pow(retry_count.min(BACKOFF_EXPONENT_CAP));
        let exponential_ms = base_ms.saturating_mul(factor);
        let jitter_ms = rand::thread_rng().gen_range(0..=self.jitter_ceiling.as_millis() as u64);
        let cap_ms = self.max_retry_delay.as_millis() as u64;
        Duration::from_millis(exponential_ms.saturating_add(jitter_ms).min(cap_ms))
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Persisted, ordered delivery queue. One instance owns the item collection
/// and its mirror; the processing loop is single-flight.
pub struct DeliveryQueue {
    config: DeliveryConfig,
    endpoint: Arc<dyn DeliveryEndpoint>,
    store: Mutex<QueueStore>,
    loop_active: AtomicBool,
    started: AtomicBool,
}

impl DeliveryQueue {
    /// Wrap an opened store. Nothing runs until [`Self::start`] or the first
    /// [`Self::enqueue`].
    pub fn new(
        store: QueueStore,
        endpoint: Arc<dyn DeliveryEndpoint>,
        config: DeliveryConfig,
    ) -> Result<Arc<Self>, QueueError> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            endpoint,
            store: Mutex::new(store),
            loop_active: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }))
    }

    /// Wake the loop for anything recovered at startup and begin periodic
    /// cleanup. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.kick();

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(queue.config.cleanup_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                queue.cleanup_expired().await;
            }
        });
    }

    /// Create a Pending item, persist it, wake the loop. Never blocks on
    /// network I/O. Returns the new item's id.
    pub fn enqueue(
        self: &Arc<Self>,
        artifact_path: impl Into<PathBuf>,
        bookmarks: Vec<f64>,
        flagged: bool,
    ) -> String {
        let item = QueueItem::new(artifact_path.into(), bookmarks, flagged);
        let id = item.id.clone();
        info!(id = %id, path = %item.artifact_path.display(), flagged, "queued for delivery");
        self.mutate(|store| store.push(item));
        self.kick();
        id
    }

    /// Reset every Failed item to Pending with a fresh retry budget and
    /// restart the loop. Returns how many items were reset.
    pub fn retry_failed(self: &Arc<Self>) -> usize {
        let reset = self.mutate(|store| store.reset_failed());
        if reset > 0 {
            info!(reset, "failed items queued for another attempt");
            self.kick();
        }
        reset
    }

    /// Remove every Completed item. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let removed = self.mutate(|store| store.remove_completed());
        if removed > 0 {
            info!(removed, "completed items cleared");
        }
        removed
    }

    /// Per-status counts plus total. Read-only.
    pub fn status(&self) -> QueueStatus {
        self.store.lock().counts()
    }

    /// Snapshot of the collection, oldest first.
    pub fn items(&self) -> Vec<QueueItem> {
        self.store.lock().items().to_vec()
    }

    /// Apply one mutation and rewrite the mirror before anything else
    /// proceeds. A failed rewrite is logged; memory stays authoritative.
    fn mutate<T>(&self, apply: impl FnOnce(&mut QueueStore) -> T) -> T {
        let mut store = self.store.lock();
        let result = apply(&mut store);
        if let Err(e) = store.persist() {
            error!(error = %e, "queue persist failed; in-memory state remains authoritative");
        }
        result
    }

    /// Start the loop unless one is already running.
    fn kick(self: &Arc<Self>) {
        if self
            .loop_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.run_loop().await });
        }
    }

    /// Claim the oldest eligible item: mark InFlight and persist, under one
    /// lock acquisition so no second claimant can interleave.
    fn claim_next(&self) -> Option<QueueItem> {
        let mut store = self.store.lock();
        let item = store.next_pending(self.config.max_retries)?;
        store.set_status(&item.id, ItemStatus::InFlight);
        if let Err(e) = store.persist() {
            error!(error = %e, "queue persist failed; in-memory state remains authoritative");
        }
        Some(item)
    }

    async fn run_loop(self: Arc<Self>) {
        debug!("delivery loop started");
        while let Some(item) = self.claim_next() {
            self.process(item).await;
        }
        self.loop_active.store(false, Ordering::SeqCst);
        // An enqueue may have observed the active flag just before it
        // cleared; re-check so its item is not stranded.
        let eligible = self
            .store
            .lock()
            .next_pending(self.config.max_retries)
            .is_some();
        if eligible {
            self.kick();
        }
        debug!("delivery loop idle");
    }

    async fn process(&self, item: QueueItem) {
        // A missing local file is not a transient condition: no retry.
        if !item.artifact_path.exists() {
            warn!(
                id = %item.id,
                path = %item.artifact_path.display(),
                "artifact missing, failing permanently"
            );
            self.mutate(|store| store.set_status(&item.id, ItemStatus::Failed));
            return;
        }

        debug!(id = %item.id, attempt = item.retry_count + 1, "delivery attempt");
        let outcome = match tokio::time::timeout(
            self.config.delivery_timeout,
            self.endpoint.submit(&item),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.config.delivery_timeout)),
        };

        match outcome {
            Ok(()) => {
                info!(id = %item.id, "delivered");
                self.mutate(|store| store.set_status(&item.id, ItemStatus::Completed));
            }
            Err(e) => {
                let status =
                    self.mutate(|store| store.record_failure(&item.id, self.config.max_retries));
                match status {
                    Some(ItemStatus::Failed) => {
                        warn!(
                            id = %item.id,
                            error = %e,
                            retries = self.config.max_retries,
                            "delivery failed permanently"
                        );
                    }
                    Some(_) => {
                        let delay = self.config.backoff_delay(item.retry_count + 1);
                        warn!(
                            id = %item.id,
                            error = %e,
                            retry = item.retry_count + 1,
                            delay_ms = delay.as_millis() as u64,
                            "delivery failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => warn!(id = %item.id, "failed item vanished from the queue"),
                }
            }
        }
    }

    /// Drop terminal items past the retention period and best-effort delete
    /// their artifacts. Deletion failures are logged and swallowed: stale
    /// files are an acceptable cost, a blocked cleanup loop is not.
    async fn cleanup_expired(&self) {
        let retention = self.config.retention_period.as_secs();
        let artifacts = self.mutate(|store| store.remove_expired(retention, now_secs()));
        if artifacts.is_empty() {
            return;
        }
        info!(removed = artifacts.len(), "expired queue items removed");
        for path in artifacts {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                debug!(path = %path.display(), error = %e, "artifact cleanup skipped");
            }
        }
    }
}
