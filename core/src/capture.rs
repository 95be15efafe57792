//! Audio capture capability boundary.
//!
//! The pipeline coordinator drives recording through this trait and never
//! touches an audio API directly. Hosts supply the real implementation; the
//! crate ships [`NullCapture`] for builds with no recording backend.

use std::path::PathBuf;

use async_trait::async_trait;

/// What a finished recording hands back: the artifact on disk and the
/// bookmark offsets (seconds from recording start) collected along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureResult {
    pub artifact_path: PathBuf,
    pub bookmarks: Vec<f64>,
}

#[async_trait]
pub trait AudioCapture: Send + Sync {
    /// Begin a recording session. Returns false when the backend cannot
    /// record (busy, unavailable, or already recording).
    async fn start(&self) -> bool;

    /// End the session and return its artifact, or `None` when nothing was
    /// recording.
    async fn stop(&self) -> Option<CaptureResult>;

    /// Drop a bookmark at the current offset. Returns false when no session
    /// is active.
    async fn mark(&self) -> bool;

    async fn is_active(&self) -> bool;
}

/// Capture backend for hosts without one: never records.
pub struct NullCapture;

#[async_trait]
impl AudioCapture for NullCapture {
    async fn start(&self) -> bool {
        false
    }

    async fn stop(&self) -> Option<CaptureResult> {
        None
    }

    async fn mark(&self) -> bool {
        false
    }

    async fn is_active(&self) -> bool {
        false
    }
}
