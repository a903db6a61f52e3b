//! Spoke identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identity of a registered spoke, stable for the spoke's lifetime.
///
/// Registry membership is decided by this id, never by comparing channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpokeId(Uuid);

impl SpokeId {
    /// Allocate a fresh UUIDv7 id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SpokeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SpokeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
