//! Pipeline coordinator: classified gestures in, queue items out.
//!
//! `RecorderService` consumes the [`ButtonEvent`] stream produced by the
//! connection manager, drives the capture backend, hands finished artifacts
//! to the delivery queue, and fans events out to registered observers. It
//! owns no hardware and no network: both arrive as injected capabilities.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::button::classifier::GestureEvent;
use crate::button::ButtonEvent;
use crate::capture::AudioCapture;
use crate::queue::DeliveryQueue;
use crate::transcribe::{TranscribeError, Transcriber};

/// Host-side hooks for surfacing pipeline activity (UI badges, haptics).
/// Callbacks run on the pipeline task and must return quickly.
pub trait RecorderObserver: Send + Sync {
    fn on_single_click(&self);
    fn on_double_click(&self);
    fn on_hold(&self);
    fn on_connectivity_changed(&self, connected: bool);
}

/// Handle for unregistering an observer. Removal is by token, not object
/// identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(u64);

/// Pipeline counters since process start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub recordings_started: u64,
    pub recordings_enqueued: u64,
    pub bookmarks_marked: u64,
    /// Gestures that arrived with no recording to act on.
    pub gestures_ignored: u64,
    pub connectivity_changes: u64,
}

pub struct RecorderService {
    capture: Arc<dyn AudioCapture>,
    transcriber: Arc<dyn Transcriber>,
    queue: Arc<DeliveryQueue>,
    observers: RwLock<Vec<(u64, Arc<dyn RecorderObserver>)>>,
    next_token: AtomicU64,
    stats: RwLock<PipelineStats>,
}

impl RecorderService {
    pub fn new(
        queue: Arc<DeliveryQueue>,
        capture: Arc<dyn AudioCapture>,
        transcriber: Arc<dyn Transcriber>,
    ) -> Arc<Self> {
        Arc::new(Self {
            capture,
            transcriber,
            queue,
            observers: RwLock::new(Vec::new()),
            next_token: AtomicU64::new(1),
            stats: RwLock::new(PipelineStats::default()),
        })
    }

    pub fn add_observer(&self, observer: Arc<dyn RecorderObserver>) -> ObserverToken {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.observers.write().push((token, observer));
        ObserverToken(token)
    }

    /// Returns false when the token was already removed or never issued.
    pub fn remove_observer(&self, token: ObserverToken) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(id, _)| *id != token.0);
        observers.len() != before
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.read().clone()
    }

    /// Consume button events until the channel closes. Runs as the single
    /// pipeline task; gesture handling is strictly sequential.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ButtonEvent>) {
        info!("recorder pipeline started");
        while let Some(event) = events.recv().await {
            match event {
                ButtonEvent::Gesture(gesture) => self.handle_gesture(gesture).await,
                ButtonEvent::Connectivity(connected) => self.handle_connectivity(connected),
            }
        }
        info!("recorder pipeline stopped");
    }

    async fn handle_gesture(&self, gesture: GestureEvent) {
        debug!(%gesture, "gesture received");
        match gesture {
            GestureEvent::SingleClick => {
                self.notify(|obs| obs.on_single_click());
                if self.capture.is_active().await {
                    self.finish_capture(false).await;
                } else if self.capture.start().await {
                    info!("recording started");
                    self.stats.write().recordings_started += 1;
                } else {
                    warn!("capture backend declined to start");
                }
            }
            GestureEvent::DoubleClick => {
                self.notify(|obs| obs.on_double_click());
                if self.capture.mark().await {
                    debug!("bookmark added");
                    self.stats.write().bookmarks_marked += 1;
                } else {
                    debug!("bookmark ignored, no active recording");
                    self.stats.write().gestures_ignored += 1;
                }
            }
            GestureEvent::Hold => {
                self.notify(|obs| obs.on_hold());
                if self.capture.is_active().await {
                    self.finish_capture(true).await;
                } else {
                    debug!("hold ignored, no active recording");
                    self.stats.write().gestures_ignored += 1;
                }
            }
        }
    }

    fn handle_connectivity(&self, connected: bool) {
        info!(connected, "button connectivity changed");
        self.stats.write().connectivity_changes += 1;
        self.notify(|obs| obs.on_connectivity_changed(connected));
    }

    /// Stop the active recording, enqueue its artifact, and kick off
    /// transcription in the background. Transcription never gates delivery.
    async fn finish_capture(&self, flagged: bool) {
        let Some(result) = self.capture.stop().await else {
            debug!("stop requested but capture had nothing to return");
            self.stats.write().gestures_ignored += 1;
            return;
        };

        let id = self
            .queue
            .enqueue(result.artifact_path.clone(), result.bookmarks, flagged);
        info!(id = %id, flagged, "recording finished");
        self.stats.write().recordings_enqueued += 1;

        let transcriber = Arc::clone(&self.transcriber);
        let path = result.artifact_path;
        tokio::spawn(async move {
            match transcriber.submit(&path).await {
                Ok(text) => info!(chars = text.len(), "transcript ready"),
                Err(TranscribeError::Unavailable) => {
                    debug!("transcription backend unavailable")
                }
                Err(e) => warn!(error = %e, "transcription failed"),
            }
        });
    }

    /// Snapshot the observer list before invoking so a callback may
    /// re-enter add/remove without deadlocking.
    fn notify(&self, call: impl Fn(&dyn RecorderObserver)) {
        let observers: Vec<Arc<dyn RecorderObserver>> = self
            .observers
            .read()
            .iter()
            .map(|(_, obs)| Arc::clone(obs))
            .collect();
        for observer in observers {
            call(observer.as_ref());
        }
    }
}
