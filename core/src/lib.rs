//! TapTape core: press a button, keep the recording.
//!
//! One pipeline: raw BLE notifications become classified gestures, gestures
//! drive capture start/stop/mark, and finished artifacts enter a durable
//! delivery queue. The library owns the connection state machine, the
//! gesture classifier, and the persisted queue; hosts inject the hardware
//! adapter, the capture backend, and the transcriber.

pub mod button;
pub mod capture;
pub mod queue;
pub mod service;
pub mod transcribe;

pub use button::adapter::{
    AdapterError, ButtonAdapter, ButtonLink, DiscoveredDevice, NullAdapter, RawNotification,
};
#[cfg(feature = "btle")]
pub use button::btle::BtleAdapter;
pub use button::classifier::{GestureEvent, GestureTiming, UnknownSignalPolicy};
pub use button::manager::{ConnectConfig, ConnectionManager, ConnectionState};
pub use button::policy::DeviceFilter;
pub use button::ButtonEvent;
pub use capture::{AudioCapture, CaptureResult, NullCapture};
pub use queue::{
    DeliveryConfig, DeliveryEndpoint, DeliveryError, DeliveryQueue, HttpEndpoint, ItemStatus,
    QueueItem, QueueStatus, QueueStore,
};
pub use service::{ObserverToken, PipelineStats, RecorderObserver, RecorderService};
pub use transcribe::{NullTranscriber, TranscribeError, Transcriber};
