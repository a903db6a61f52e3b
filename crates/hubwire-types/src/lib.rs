//! Shared domain types for hubwire.
//!
//! This crate contains the types every layer of the bus agrees on: the
//! [`message::Message`] record routed between spokes, the error taxonomy, and
//! hub configuration.
//!
//! No async runtime dependencies: only serde, serde_json, uuid, thiserror.

pub mod config;
pub mod error;
pub mod message;
pub mod spoke;
