//! Echo suppression for components that use one channel both ways.
//!
//! A component that originates messages from outside events (an API front,
//! a timer) often reads and writes a single pass-through channel. Registered
//! directly, every broadcast it does not act on would flow straight back out
//! and the hub would treat it as newly emitted. [`Plug::wrap`] puts a filter
//! around such a channel:
//!
//! - messages written into the plugged channel are marked, then forwarded to
//!   the inner channel;
//! - messages coming out of the inner channel are dropped if they are a marked
//!   message (the same allocation, passed straight through) and forwarded
//!   otherwise.
//!
//! The mark is identity, not a field, so components never see it. A component
//! that rebuilds an equal-looking message produces a new allocation, which is
//! indistinguishable from a genuinely new message and is forwarded.

use hubwire_types::config::HubConfig;
use tracing::{debug, trace};

use crate::channel::{Channel, ChannelEvent, Endpoint, Subscription};
use crate::identity::IdentitySet;

/// Stateless adapter; see the module docs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plug;

impl Plug {
    /// Wrap `channel` so it can be registered as a spoke without echoing
    /// broadcasts back to the hub.
    ///
    /// Errors and terminal signals of the inner channel are forwarded to the
    /// plugged channel. Must be called inside a tokio runtime.
    pub fn wrap(channel: Channel, config: &HubConfig) -> Channel {
        let (plugged, endpoint) = Channel::pair(config);
        let subscription = channel.subscribe();
        tokio::spawn(pump(channel, subscription, endpoint));
        plugged
    }
}

async fn pump(inner: Channel, mut output: Subscription, mut plugged: Endpoint) {
    let mut marked = IdentitySet::default();
    let signal = loop {
        tokio::select! {
            input = plugged.recv() => match input {
                Some(message) => {
                    marked.insert(&message);
                    if let Err(err) = inner.write(message) {
                        debug!(%err, "plugged component no longer accepts input");
                    }
                }
                // Nothing can write to the plugged channel any more.
                None => break None,
            },
            event = output.recv() => match event {
                Some(ChannelEvent::Message(message)) => {
                    if marked.contains(&message) {
                        trace!(kind = message.kind(), "suppressed pass-through echo");
                    } else {
                        plugged.emit(message);
                    }
                }
                Some(ChannelEvent::Error(error)) => {
                    plugged.fail(error);
                }
                Some(ChannelEvent::Terminated(signal)) => break Some(signal),
                None => break None,
            },
        }
    };

    if let Some(signal) = signal {
        plugged.terminate(signal);
    }
}
