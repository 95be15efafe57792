//! Transcription capability boundary.
//!
//! Invoked by the coordinator after a recording stops, fire-and-forget; the
//! delivery queue never touches it. The crate ships [`NullTranscriber`] for
//! hosts without a transcription backend.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("no transcription backend available")]
    Unavailable,
    #[error("transcription failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Produce a transcript for the artifact at `path`.
    async fn submit(&self, path: &Path) -> Result<String, TranscribeError>;
}

/// Transcription backend for hosts without one: always unavailable.
pub struct NullTranscriber;

#[async_trait]
impl Transcriber for NullTranscriber {
    async fn submit(&self, _path: &Path) -> Result<String, TranscribeError> {
        Err(TranscribeError::Unavailable)
    }
}
