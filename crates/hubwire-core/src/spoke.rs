//! Spoke: binds one component channel to a hub.
//!
//! A spoke has no behavior of its own beyond identity. Its forwarding task
//! owns the channel subscription and turns channel events into hub commands:
//! messages and errors are forwarded tagged with the spoke id, and the first
//! terminal signal produces exactly one disconnect, after which the task
//! exits and the subscription is dropped. Later terminal signals are never
//! read, so disconnection is idempotent.

use hubwire_types::error::Termination;
use hubwire_types::spoke::SpokeId;
use tokio::sync::mpsc::WeakUnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::channel::{Channel, ChannelEvent, Subscription};
use crate::hub::HubCommand;

/// A component channel registered with a hub.
#[derive(Debug, Clone)]
pub struct Spoke {
    id: SpokeId,
    channel: Channel,
}

impl Spoke {
    pub(crate) fn new(channel: Channel) -> Self {
        Self {
            id: SpokeId::new(),
            channel,
        }
    }

    pub fn id(&self) -> SpokeId {
        self.id
    }

    /// The wrapped component channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }
}

/// Start forwarding `subscription` to the hub until the channel terminates
/// or `detach` fires.
///
/// Holds the hub queue weakly so a forgotten spoke never keeps a dropped hub
/// alive.
pub(crate) fn connect(
    spoke_id: SpokeId,
    mut subscription: Subscription,
    hub: WeakUnboundedSender<HubCommand>,
    detach: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = detach.cancelled() => {
                    trace!(%spoke_id, "spoke detached");
                    return;
                }
                event = subscription.recv() => event,
            };

            let (command, disconnect) = match event {
                Some(ChannelEvent::Message(message)) => {
                    (HubCommand::FromSpoke { spoke_id, message }, false)
                }
                Some(ChannelEvent::Error(error)) => (HubCommand::SpokeError { spoke_id, error }, false),
                Some(ChannelEvent::Terminated(signal)) => {
                    (HubCommand::SpokeDisconnected { spoke_id, signal }, true)
                }
                None => (
                    HubCommand::SpokeDisconnected {
                        spoke_id,
                        signal: Termination::Destroy,
                    },
                    true,
                ),
            };

            let Some(hub) = hub.upgrade() else {
                debug!(%spoke_id, "hub dropped, spoke forwarding stopped");
                return;
            };
            if hub.send(command).is_err() || disconnect {
                return;
            }
        }
    })
}
