//! Durable delivery of recorded artifacts.
//!
//! Items enter through [`DeliveryQueue::enqueue`], survive restarts in a
//! JSON mirror managed by [`store::QueueStore`], and leave through a
//! [`endpoint::DeliveryEndpoint`]. Processing is strictly one item at a
//! time, oldest first.

pub mod delivery;
pub mod endpoint;
pub mod item;
pub mod store;

pub use delivery::{DeliveryConfig, DeliveryQueue, QueueError};
pub use endpoint::{DeliveryEndpoint, DeliveryError, HttpEndpoint};
pub use item::{ItemStatus, QueueItem, QueueStatus};
pub use store::{QueueStore, StoreError};
