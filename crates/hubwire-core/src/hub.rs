//! The hub: spoke registry plus fan-out.
//!
//! All registry mutation and every fan-out pass happen on one router task fed
//! by a single FIFO command queue. Operations issued from one task are applied
//! in call order, so a spoke added before a `write` receives that message and
//! a spoke added after it does not.
//!
//! Two fan-out paths:
//! - **Injected** (written into the hub's inbound sink): delivered to every
//!   registered spoke in insertion order, never to the hub's outbound source.
//! - **Spoke-originated**: delivered first to the outbound source, then to
//!   every other spoke in insertion order. The sender never gets it back.
//!
//! A pass writes into each recipient's input queue and moves on; it never
//! waits for a recipient to process the message.

use std::fmt;
use std::sync::Arc;

use hubwire_types::config::HubConfig;
use hubwire_types::error::{BusError, ChannelError, Termination};
use hubwire_types::message::SharedMessage;
use hubwire_types::spoke::SpokeId;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::channel::{Channel, ChannelEvent, ClaimLedger, Subscription};
use crate::spoke::{self, Spoke};

/// Work items for the router task.
pub(crate) enum HubCommand {
    /// A message written into the hub's inbound sink.
    Inject(SharedMessage),
    /// Start delivering to a new spoke.
    Register {
        spoke: Spoke,
        detach: CancellationToken,
    },
    /// A message read from a spoke's channel.
    FromSpoke {
        spoke_id: SpokeId,
        message: SharedMessage,
    },
    /// A spoke's channel raised its error signal.
    SpokeError {
        spoke_id: SpokeId,
        error: ChannelError,
    },
    /// A spoke's channel terminated.
    SpokeDisconnected {
        spoke_id: SpokeId,
        signal: Termination,
    },
    /// Explicit removal by the hub's owner.
    Remove(SpokeId),
    /// Registry snapshot in insertion order.
    Snapshot(oneshot::Sender<Vec<SpokeId>>),
}

/// Hook invoked when a spoke's channel raises its error signal.
///
/// The hub takes no corrective action of its own: the spoke stays registered
/// and the error goes nowhere else. Implement this to attach telemetry or a
/// recovery policy.
pub trait SpokeErrorHook: Send + 'static {
    fn on_spoke_error(&mut self, spoke_id: SpokeId, error: &ChannelError);
}

/// Default hook: records the error at debug level and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreSpokeErrors;

impl SpokeErrorHook for IgnoreSpokeErrors {
    fn on_spoke_error(&mut self, spoke_id: SpokeId, error: &ChannelError) {
        debug!(%spoke_id, %error, "spoke channel error ignored");
    }
}

impl<F> SpokeErrorHook for F
where
    F: FnMut(SpokeId, &ChannelError) + Send + 'static,
{
    fn on_spoke_error(&mut self, spoke_id: SpokeId, error: &ChannelError) {
        self(spoke_id, error)
    }
}

/// Builder for a [`Hub`] with initial components and an error hook.
pub struct HubBuilder {
    config: HubConfig,
    components: Vec<Channel>,
    error_hook: Box<dyn SpokeErrorHook>,
}

impl HubBuilder {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            components: Vec::new(),
            error_hook: Box::new(IgnoreSpokeErrors),
        }
    }

    /// Register `channel` as a spoke as soon as the hub starts.
    pub fn component(mut self, channel: Channel) -> Self {
        self.components.push(channel);
        self
    }

    pub fn components(mut self, channels: impl IntoIterator<Item = Channel>) -> Self {
        self.components.extend(channels);
        self
    }

    pub fn error_hook(mut self, hook: impl SpokeErrorHook) -> Self {
        self.error_hook = Box::new(hook);
        self
    }

    /// Start the router task on the current tokio runtime.
    ///
    /// Initial components are registered in the order given, before any
    /// message written through the returned hub.
    pub fn spawn(self) -> Hub {
        if !self.config.object_mode {
            warn!("object_mode = false is not supported; messages stay structured");
        }

        let (commands, queue) = mpsc::unbounded_channel();
        let (outbound, _) = broadcast::channel(self.config.capacity());
        let shutdown = CancellationToken::new();

        let router = Router {
            config: self.config.clone(),
            registry: Vec::new(),
            outbound: outbound.clone(),
            error_hook: self.error_hook,
        };
        tokio::spawn(router.run(queue, shutdown.clone()));

        let hub = Hub {
            commands,
            outbound,
            claims: Arc::new(ClaimLedger::default()),
            config: Arc::new(self.config),
            shutdown,
        };
        for channel in self.components {
            hub.add_component(channel);
        }
        hub
    }
}

/// Central message router.
///
/// Cloning yields another handle to the same hub. The hub keeps running
/// until [`shutdown`](Self::shutdown) is called or every handle (including
/// channels obtained from [`channel`](Self::channel)) is dropped.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::UnboundedSender<HubCommand>,
    outbound: broadcast::Sender<ChannelEvent>,
    /// Responses claimed by correlators on any handle from [`Hub::channel`].
    claims: Arc<ClaimLedger>,
    config: Arc<HubConfig>,
    shutdown: CancellationToken,
}

impl Hub {
    /// Build a hub and register each of `components` as a spoke.
    pub fn new(config: HubConfig, components: impl IntoIterator<Item = Channel>) -> Self {
        HubBuilder::new(config).components(components).spawn()
    }

    pub fn builder(config: HubConfig) -> HubBuilder {
        HubBuilder::new(config)
    }

    /// Wrap `channel` as a new spoke and start delivering to it.
    ///
    /// Only fan-outs issued after this call reach the spoke, and only
    /// messages the channel produces after this call reach the hub. If the
    /// hub has already shut down, or the channel has already terminated, the
    /// returned spoke is never registered.
    pub fn add_component(&self, channel: Channel) -> Spoke {
        let spoke = Spoke::new(channel);
        // Subscribe first: a channel that terminates after this point is
        // seen by the forwarder, one that terminated before it is closed.
        let subscription = spoke.channel().subscribe();
        if spoke.channel().is_closed() {
            warn!(spoke_id = %spoke.id(), "component channel already terminated, not registered");
            return spoke;
        }
        let detach = self.shutdown.child_token();

        let registered = self.commands.send(HubCommand::Register {
            spoke: spoke.clone(),
            detach: detach.clone(),
        });
        if registered.is_err() {
            warn!(spoke_id = %spoke.id(), "hub is shut down, component not registered");
            return spoke;
        }

        spoke::connect(spoke.id(), subscription, self.commands.downgrade(), detach);
        spoke
    }

    /// Stop delivering to `spoke` and drop its subscription.
    ///
    /// Removing a spoke that is no longer registered is a no-op.
    pub fn remove_component(&self, spoke: &Spoke) {
        let _ = self.commands.send(HubCommand::Remove(spoke.id()));
    }

    /// Inject a message; it fans out to every registered spoke.
    pub fn write(&self, message: impl Into<SharedMessage>) -> Result<(), BusError> {
        self.commands
            .send(HubCommand::Inject(message.into()))
            .map_err(|_| BusError::Closed)
    }

    /// Subscribe to the outbound source: every spoke-originated message.
    pub fn subscribe(&self) -> Subscription {
        self.channel().subscribe()
    }

    /// The hub seen as a component channel: writes inject, output carries
    /// spoke-originated messages. Lets one hub be a spoke of another.
    pub fn channel(&self) -> Channel {
        Channel::from_hub(
            self.commands.clone(),
            self.outbound.clone(),
            Arc::clone(&self.claims),
        )
    }

    /// Registered spoke ids in insertion order.
    pub async fn spoke_ids(&self) -> Vec<SpokeId> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(HubCommand::Snapshot(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn spoke_count(&self) -> usize {
        self.spoke_ids().await.len()
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Stop the router. Every spoke is detached and the outbound source
    /// reports [`Termination::Close`].
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("outbound_subscribers", &self.outbound.receiver_count())
            .field("high_water_mark", &self.config.high_water_mark)
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

struct SpokeEntry {
    spoke: Spoke,
    detach: CancellationToken,
}

/// State owned by the router task. Never shared, so never locked.
struct Router {
    config: HubConfig,
    registry: Vec<SpokeEntry>,
    outbound: broadcast::Sender<ChannelEvent>,
    error_hook: Box<dyn SpokeErrorHook>,
}

impl Router {
    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<HubCommand>, shutdown: CancellationToken) {
        debug!("hub router started");
        loop {
            let command = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = queue.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.handle(command);
        }

        for entry in self.registry.drain(..) {
            entry.detach.cancel();
        }
        let _ = self
            .outbound
            .send(ChannelEvent::Terminated(Termination::Close));
        debug!("hub router stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Inject(message) => self.fan_out_injected(&message),
            HubCommand::Register { spoke, detach } => {
                debug!(spoke_id = %spoke.id(), spokes = self.registry.len() + 1, "spoke registered");
                self.registry.push(SpokeEntry { spoke, detach });
            }
            HubCommand::FromSpoke { spoke_id, message } => {
                self.fan_out_from_spoke(spoke_id, &message)
            }
            HubCommand::SpokeError { spoke_id, error } => {
                self.error_hook.on_spoke_error(spoke_id, &error)
            }
            HubCommand::SpokeDisconnected { spoke_id, signal } => {
                debug!(%spoke_id, %signal, "spoke channel terminated");
                self.unregister(spoke_id);
            }
            HubCommand::Remove(spoke_id) => self.unregister(spoke_id),
            HubCommand::Snapshot(reply) => {
                let ids = self.registry.iter().map(|e| e.spoke.id()).collect();
                let _ = reply.send(ids);
            }
        }
    }

    fn fan_out_injected(&self, message: &SharedMessage) {
        for entry in &self.registry {
            self.deliver(entry, message);
        }
    }

    fn fan_out_from_spoke(&self, sender: SpokeId, message: &SharedMessage) {
        if !self.registry.iter().any(|e| e.spoke.id() == sender) {
            debug!(spoke_id = %sender, kind = message.kind(), "dropping message from unregistered spoke");
            return;
        }

        let _ = self
            .outbound
            .send(ChannelEvent::Message(Arc::clone(message)));

        for entry in self.registry.iter().filter(|e| e.spoke.id() != sender) {
            self.deliver(entry, message);
        }
    }

    fn deliver(&self, entry: &SpokeEntry, message: &SharedMessage) {
        let spoke_id = entry.spoke.id();
        if self.config.log_deliveries {
            trace!(%spoke_id, kind = message.kind(), "delivering message");
        }
        if let Err(err) = entry.spoke.channel().write(Arc::clone(message)) {
            // Its forwarder deregisters it once the terminal signal is read.
            debug!(%spoke_id, %err, "spoke no longer accepts input");
        }
    }

    fn unregister(&mut self, spoke_id: SpokeId) {
        match self.registry.iter().position(|e| e.spoke.id() == spoke_id) {
            Some(index) => {
                let entry = self.registry.remove(index);
                entry.detach.cancel();
                debug!(%spoke_id, spokes = self.registry.len(), "spoke unregistered");
            }
            None => trace!(%spoke_id, "spoke already unregistered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Endpoint;
    use hubwire_types::message::Message;
    use std::sync::Mutex;

    fn component() -> (Channel, Endpoint) {
        Channel::pair(&HubConfig::default())
    }

    #[tokio::test]
    async fn injected_message_reaches_every_spoke_but_not_outbound() {
        let (a, mut a_end) = component();
        let (b, mut b_end) = component();
        let hub = Hub::new(HubConfig::default(), [a, b]);
        let mut outbound = hub.subscribe();

        let msg = Message::new("LOG").shared();
        hub.write(Arc::clone(&msg)).unwrap();

        assert!(Arc::ptr_eq(&a_end.recv().await.unwrap(), &msg));
        assert!(Arc::ptr_eq(&b_end.recv().await.unwrap(), &msg));
        assert_eq!(hub.spoke_count().await, 2);
        assert!(matches!(outbound.try_recv(), Ok(None)));
    }

    #[tokio::test]
    async fn spoke_message_skips_sender() {
        let (a, mut a_end) = component();
        let (b, mut b_end) = component();
        let hub = Hub::new(HubConfig::default(), [a, b]);
        let mut outbound = hub.subscribe();

        b_end.emit(Message::new("VEGGIE"));

        assert!(outbound.next_message().await.unwrap().is("VEGGIE"));
        assert!(a_end.recv().await.unwrap().is("VEGGIE"));
        hub.spoke_ids().await;
        assert!(b_end.try_recv().is_none());
    }

    #[tokio::test]
    async fn remove_component_is_idempotent() {
        let (a, mut a_end) = component();
        let hub = Hub::new(HubConfig::default(), []);
        let spoke = hub.add_component(a);
        assert_eq!(hub.spoke_ids().await, vec![spoke.id()]);

        hub.remove_component(&spoke);
        hub.remove_component(&spoke);
        assert!(hub.spoke_ids().await.is_empty());

        hub.write(Message::new("after")).unwrap();
        hub.spoke_ids().await;
        assert!(a_end.try_recv().is_none());
    }

    #[tokio::test]
    async fn spoke_errors_reach_hook_and_keep_registration() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let (a, a_end) = component();
        let hub = Hub::builder(HubConfig::default())
            .component(a)
            .error_hook(move |_id: SpokeId, err: &ChannelError| {
                sink.lock().unwrap().push(err.message.clone());
            })
            .spawn();
        hub.spoke_ids().await;

        a_end.fail(ChannelError::new("disk full"));
        tokio::task::yield_now().await;

        assert_eq!(hub.spoke_count().await, 1);
        assert_eq!(*seen.lock().unwrap(), vec!["disk full".to_string()]);
    }

    #[tokio::test]
    async fn shutdown_closes_outbound_and_rejects_writes() {
        let (a, _a_end) = component();
        let hub = Hub::new(HubConfig::default(), [a]);
        let mut outbound = hub.subscribe();

        hub.shutdown();

        assert!(matches!(
            outbound.recv().await,
            Some(ChannelEvent::Terminated(Termination::Close))
        ));
        assert!(hub.is_shut_down());
        assert_eq!(hub.write(Message::new("late")), Err(BusError::Closed));
        assert!(hub.spoke_ids().await.is_empty());
    }

    #[tokio::test]
    async fn add_after_shutdown_does_not_register() {
        let hub = Hub::new(HubConfig::default(), []);
        let mut outbound = hub.subscribe();
        hub.shutdown();
        outbound.recv().await;

        let (a, _a_end) = component();
        let spoke = hub.add_component(a);
        assert!(!hub.spoke_ids().await.contains(&spoke.id()));
    }

    #[tokio::test]
    async fn terminated_component_is_not_registered() {
        let hub = Hub::new(HubConfig::default(), []);
        let (ended, ended_end) = component();
        ended_end.end();
        let (dropped, dropped_end) = component();
        drop(dropped_end);

        hub.add_component(ended);
        hub.add_component(dropped);

        assert!(hub.spoke_ids().await.is_empty());
    }

    #[tokio::test]
    async fn debug_impl() {
        let hub = Hub::new(HubConfig::default(), []);
        let debug = format!("{hub:?}");
        assert!(debug.contains("Hub"));
        assert!(debug.contains("high_water_mark"));
    }
}
