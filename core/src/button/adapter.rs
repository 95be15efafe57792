//! Hardware capability boundary for the wireless button.
//!
//! The radio is injected once at startup as a [`ButtonAdapter`]: either the
//! real `btleplug` driver (behind the `btle` feature) or [`NullAdapter`] for
//! hosts without usable Bluetooth. Nothing else in the pipeline branches on
//! hardware availability.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::policy::DeviceFilter;

/// Opaque notification payload pushed by the peripheral. Not retained beyond
/// classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub payload: Vec<u8>,
}

/// A peripheral seen during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Adapter-scoped identifier (address or platform handle).
    pub device_id: String,
    /// Advertised local name, when the advertisement carried one.
    pub name: Option<String>,
}

/// An established subscription to the button's notification characteristic.
///
/// Dropping the link releases the peripheral. The notification channel
/// closing signals a spontaneous disconnection.
pub struct ButtonLink {
    /// UUID of the characteristic the adapter subscribed to.
    pub characteristic: String,
    /// Asynchronous notifications from the peripheral.
    pub notifications: mpsc::Receiver<RawNotification>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("bluetooth unavailable: {0}")]
    Unavailable(String),

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("no notifiable characteristic on {0}")]
    NoCharacteristic(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),
}

/// Capability interface over the BLE radio.
#[async_trait]
pub trait ButtonAdapter: Send + Sync {
    /// Whether the radio is present and permitted. Checked before the first
    /// scan; a false return means scanning must not start.
    async fn ready(&self) -> bool;

    /// Scan for up to `window`, returning the first peripheral accepted by
    /// `filter`, or `None` when the window expires without a match.
    async fn discover(
        &self,
        filter: &DeviceFilter,
        window: Duration,
    ) -> Result<Option<DiscoveredDevice>, AdapterError>;

    /// Connect to `device` within `timeout` and subscribe to its notification
    /// characteristic, preferring `preferred` and falling back to the first
    /// notifiable characteristic when it is absent.
    async fn attach(
        &self,
        device: &DiscoveredDevice,
        preferred: Option<&str>,
        timeout: Duration,
    ) -> Result<ButtonLink, AdapterError>;
}

/// Driver for hosts without a radio: reports unavailable on every call.
pub struct NullAdapter;

#[async_trait]
impl ButtonAdapter for NullAdapter {
    async fn ready(&self) -> bool {
        false
    }

    async fn discover(
        &self,
        _filter: &DeviceFilter,
        _window: Duration,
    ) -> Result<Option<DiscoveredDevice>, AdapterError> {
        Err(AdapterError::Unavailable("no bluetooth driver".into()))
    }

    async fn attach(
        &self,
        _device: &DiscoveredDevice,
        _preferred: Option<&str>,
        _timeout: Duration,
    ) -> Result<ButtonLink, AdapterError> {
        Err(AdapterError::Unavailable("no bluetooth driver".into()))
    }
}
