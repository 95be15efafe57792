// Spool capture backend for the TapTape CLI
//
// Desktop builds have no microphone pipeline yet, so a session records
// nothing but its own timeline: start opens it, mark stores the elapsed
// offset, stop writes a stub artifact into the spool directory. Everything
// downstream (queue, delivery, transcription) treats the result like a
// real recording.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use taptape_core::{AudioCapture, CaptureResult};
use tokio::time::Instant;
use tracing::warn;

/// One in-progress recording.
struct Session {
    started: Instant,
    bookmarks: Vec<f64>,
}

/// Capture backend that spools placeholder artifacts to disk.
pub struct SpoolCapture {
    spool_dir: PathBuf,
    session: Mutex<Option<Session>>,
}

impl SpoolCapture {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Result<Self> {
        let spool_dir = spool_dir.into();
        std::fs::create_dir_all(&spool_dir)
            .context("Failed to create spool directory")?;
        Ok(Self {
            spool_dir,
            session: Mutex::new(None),
        })
    }
}

#[async_trait]
impl AudioCapture for SpoolCapture {
    async fn start(&self) -> bool {
        let mut session = self.session.lock();
        if session.is_some() {
            return false;
        }
        *session = Some(Session {
            started: Instant::now(),
            bookmarks: Vec::new(),
        });
        true
    }

    async fn stop(&self) -> Option<CaptureResult> {
        let finished = self.session.lock().take()?;
        let artifact_path = self.spool_dir.join(format!("{}.m4a", uuid::Uuid::new_v4()));
        let body = format!(
            "taptape spool artifact\nduration_secs: {:.3}\nbookmarks: {:?}\n",
            finished.started.elapsed().as_secs_f64(),
            finished.bookmarks,
        );
        if let Err(e) = std::fs::write(&artifact_path, body) {
            warn!("Failed to write spool artifact: {}", e);
            return None;
        }
        Some(CaptureResult {
            artifact_path,
            bookmarks: finished.bookmarks,
        })
    }

    async fn mark(&self) -> bool {
        let mut session = self.session.lock();
        match session.as_mut() {
            Some(active) => {
                active.bookmarks.push(active.started.elapsed().as_secs_f64());
                true
            }
            None => false,
        }
    }

    async fn is_active(&self) -> bool {
        self.session.lock().is_some()
    }
}
