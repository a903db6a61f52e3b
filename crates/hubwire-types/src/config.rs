//! Hub configuration types.
//!
//! `HubConfig` is the construction-time configuration of a hub and of the
//! channels created alongside it. It is usually loaded from a `hub.toml`;
//! every field has a sensible default.

use serde::{Deserialize, Serialize};

/// Default number of messages buffered on a channel's output before a slow
/// subscriber starts lagging.
pub const DEFAULT_HIGH_WATER_MARK: usize = 256;

/// Smallest accepted high-water mark (broadcast channels need capacity > 0).
pub const MIN_HIGH_WATER_MARK: usize = 1;

/// Largest accepted high-water mark. Each channel allocates its whole output
/// ring up front.
pub const MAX_HIGH_WATER_MARK: usize = 1 << 16;

/// Construction options for a hub and its channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Output buffering capacity per channel. Subscribers further behind than
    /// this lag and skip messages; there is no backpressure.
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,

    /// Structured-payload mode. Only `true` is meaningful: messages are always
    /// structured records. `false` is accepted and reported as a warning.
    #[serde(default = "default_object_mode")]
    pub object_mode: bool,

    /// Emit a `trace!` event for every single delivery in a fan-out pass.
    #[serde(default)]
    pub log_deliveries: bool,
}

fn default_high_water_mark() -> usize {
    DEFAULT_HIGH_WATER_MARK
}

fn default_object_mode() -> bool {
    true
}

impl HubConfig {
    /// Channel capacity to use, clamped to
    /// `MIN_HIGH_WATER_MARK..=MAX_HIGH_WATER_MARK`.
    pub fn capacity(&self) -> usize {
        self.high_water_mark
            .clamp(MIN_HIGH_WATER_MARK, MAX_HIGH_WATER_MARK)
    }

    /// Reject values that [`capacity`](Self::capacity) would have to clamp
    /// down.
    pub fn validate(&self) -> Result<(), String> {
        if self.high_water_mark > MAX_HIGH_WATER_MARK {
            return Err(format!(
                "high_water_mark {} exceeds the maximum of {MAX_HIGH_WATER_MARK}",
                self.high_water_mark
            ));
        }
        Ok(())
    }

    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            high_water_mark: default_high_water_mark(),
            object_mode: default_object_mode(),
            log_deliveries: false,
        }
    }
}
