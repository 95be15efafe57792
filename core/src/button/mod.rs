//! Wireless button pipeline: hardware boundary, qualification policy,
//! connection driver, and gesture classification.

pub mod adapter;
#[cfg(feature = "btle")]
pub mod btle;
pub mod classifier;
pub mod manager;
pub mod policy;

use classifier::GestureEvent;

/// Events surfaced to the pipeline coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// A classified user action.
    Gesture(GestureEvent),
    /// The peripheral link came up or went down.
    Connectivity(bool),
}
