//! Routing, lifecycle, and request/response correlation core for hubwire.
//!
//! Components talk to each other only through [`channel::Channel`]s attached
//! to a [`hub::Hub`]. Each attached channel becomes a [`spoke::Spoke`]:
//! - `channel` -- the component contract: write, subscribe, error and terminal signals
//! - `hub` -- registry plus fan-out, running on a single router task
//! - `spoke` -- per-component adapter forwarding channel events to the hub
//! - `plug` -- echo suppression for components that use one channel both ways
//! - `request` -- one-shot request/response correlation over a channel
//! - `processor` -- `MessageProcessor` trait and its task runner
//! - `config` -- `hub.toml` loader
//!
//! The bus is meant to be driven from a current-thread tokio runtime, which
//! gives the single-threaded cooperative scheduling the ordering guarantees
//! are stated against.

pub mod channel;
pub mod config;
pub mod hub;
mod identity;
pub mod plug;
pub mod processor;
pub mod request;
pub mod spoke;

pub use channel::{Channel, ChannelEvent, Endpoint, Subscription};
pub use hub::{Hub, HubBuilder, IgnoreSpokeErrors, SpokeErrorHook};
pub use plug::Plug;
pub use processor::{FnProcessor, MessageProcessor, spawn_processor};
pub use request::{PendingResponse, RequestState, Responder, request, request_with_callback};
pub use spoke::Spoke;
