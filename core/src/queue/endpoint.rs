//! Delivery endpoint boundary and the multipart HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use super::item::QueueItem;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("artifact unreadable: {0}")]
    Artifact(#[from] std::io::Error),

    #[error("metadata encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("endpoint returned status {0}")]
    Status(u16),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid endpoint: {0}")]
    Config(String),
}

/// Abstract "submit artifact" capability. The queue neither knows nor cares
/// what protocol sits behind it.
#[async_trait]
pub trait DeliveryEndpoint: Send + Sync {
    async fn submit(&self, item: &QueueItem) -> Result<(), DeliveryError>;
}

/// Metadata record accompanying the artifact bytes, camelCase on the wire.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemMetadata<'a> {
    id: &'a str,
    bookmarks: &'a [f64],
    flagged: bool,
    created_at: u64,
}

impl<'a> From<&'a QueueItem> for ItemMetadata<'a> {
    fn from(item: &'a QueueItem) -> Self {
        Self {
            id: &item.id,
            bookmarks: &item.bookmarks,
            flagged: item.flagged,
            created_at: item.created_at,
        }
    }
}

/// Multipart POST: the artifact bytes in a `file` part plus a JSON
/// `metadata` part. Any 2xx response is success; everything else, transport
/// failures included, is a retryable delivery failure.
pub struct HttpEndpoint {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpEndpoint {
    pub fn new(url: &str) -> Result<Self, DeliveryError> {
        let url = reqwest::Url::parse(url).map_err(|e| DeliveryError::Config(e.to_string()))?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| DeliveryError::Config(e.to_string()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl DeliveryEndpoint for HttpEndpoint {
    async fn submit(&self, item: &QueueItem) -> Result<(), DeliveryError> {
        let bytes = tokio::fs::read(&item.artifact_path).await?;
        let metadata = serde_json::to_string(&ItemMetadata::from(item))?;

        let file_name = item
            .artifact_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.bin", item.id));
        let file_part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/octet-stream")
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("metadata", metadata);

        let response = self
            .client
            .post(self.url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(status.as_u16()))
        }
    }
}
