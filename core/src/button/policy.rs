//! Peripheral qualification policy.

use serde::{Deserialize, Serialize};

/// Decides which advertised peripherals qualify as the recorder button.
///
/// A device qualifies when its advertised name contains `marker`
/// (case-insensitive) and contains no entry from `excluded`. Cheap shutter
/// buttons advertise generic HID service UUIDs shared by unrelated devices,
/// so name matching trades recall for precision; the exclusion list is
/// configuration for filtering known lookalikes, not protocol truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFilter {
    /// Token that must appear in the advertised name.
    pub marker: String,
    /// Name fragments that disqualify a device even when the marker matches.
    pub excluded: Vec<String>,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            marker: "shutter".to_string(),
            excluded: Vec::new(),
        }
    }
}

impl DeviceFilter {
    /// True when `advertised` qualifies. Unnamed devices never qualify.
    pub fn matches(&self, advertised: Option<&str>) -> bool {
        let Some(name) = advertised else {
            return false;
        };
        let name = name.to_lowercase();
        if !name.contains(&self.marker.to_lowercase()) {
            return false;
        }
        !self
            .excluded
            .iter()
            .any(|entry| name.contains(&entry.to_lowercase()))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.marker.trim().is_empty() {
            return Err("device marker must not be empty".to_string());
        }
        Ok(())
    }
}
