//! The message record routed by the hub.
//!
//! A [`Message`] is a discriminator (`type`) plus arbitrary JSON payload
//! fields. The hub and spokes never look past the discriminator; components
//! filter on it with [`Message::is`] or [`matches_any`] and ignore everything
//! else.
//!
//! Messages travel as [`SharedMessage`] (`Arc<Message>`). Every recipient of
//! one fan-out pass receives the same allocation, and a sent message is never
//! mutated. A component that wants to change a message clones the inner
//! [`Message`] and sends the copy, which is a new message as far as the bus
//! is concerned.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the mandatory discriminator field.
pub const KIND_FIELD: &str = "type";

/// A message shared by reference across every recipient of a fan-out pass.
pub type SharedMessage = Arc<Message>;

/// A typed message exchanged over the bus.
///
/// Serializes as a flat JSON object whose `type` field carries [`kind`](Self::kind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Discriminator used by every consumer for routing (e.g. "system/LOG").
    #[serde(rename = "type")]
    kind: String,
    /// Payload fields. Never inspected by the bus itself.
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Message {
    /// Create a message with the given discriminator and no payload.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style payload setter.
    ///
    /// Setting `type` with a string value replaces the discriminator instead of
    /// adding a payload field, so the serialized form never carries two `type`
    /// keys. A non-string `type` is ignored.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a payload field in place. Same `type` handling as [`with`](Self::with).
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if key == KIND_FIELD {
            if let Value::String(kind) = value {
                self.kind = kind;
            }
            return;
        }
        self.fields.insert(key, value);
    }

    /// The discriminator.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Whether this message carries the given discriminator.
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Look up a payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Look up a string payload field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// All payload fields (the discriminator excluded).
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consume the message, returning its payload fields.
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// Wrap into a [`SharedMessage`] ready to be sent.
    pub fn shared(self) -> SharedMessage {
        Arc::new(self)
    }
}

/// Predicate helper: does the message carry any of the given discriminators?
pub fn matches_any(message: &Message, kinds: &[&str]) -> bool {
    kinds.iter().any(|kind| message.is(kind))
}
