//! The component channel contract.
//!
//! A [`Channel`] is the outside view of a component: anyone holding it can
//! write input and subscribe to output. The component itself holds the
//! matching [`Endpoint`], reads its input there, and emits messages, errors,
//! and terminal signals.
//!
//! Input is an unbounded FIFO queue. Output is a `broadcast` channel sized by
//! [`HubConfig::high_water_mark`]: every subscriber sees every event emitted
//! after it subscribed, in order, unless it falls more than the high-water
//! mark behind, in which case it skips ahead (there is no backpressure).

use std::fmt;
use std::sync::{Arc, Mutex};

use hubwire_types::config::HubConfig;
use hubwire_types::error::{BusError, ChannelError, Termination};
use hubwire_types::message::SharedMessage;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::hub::HubCommand;
use crate::identity::IdentitySet;

/// One event produced on a channel's output.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A message produced by the component.
    Message(SharedMessage),
    /// The error signal. Does not end the channel.
    Error(ChannelError),
    /// A terminal signal. Nothing follows it.
    Terminated(Termination),
}

/// Where writes to a channel go.
#[derive(Clone)]
pub(crate) enum Inlet {
    /// A component's input queue.
    Component(mpsc::UnboundedSender<SharedMessage>),
    /// A hub's command queue (the hub used as a component).
    Hub(mpsc::UnboundedSender<HubCommand>),
}

/// Responses already taken by a correlated request on this channel.
#[derive(Debug, Default)]
pub(crate) struct ClaimLedger {
    claimed: Mutex<IdentitySet>,
}

impl ClaimLedger {
    /// Run `matcher` unless `message` was already claimed; claim it if the
    /// matcher reports that it consumed the message.
    pub(crate) fn claim_with(&self, message: &SharedMessage, matcher: impl FnOnce() -> bool) -> bool {
        let mut claimed = self.claimed.lock().expect("claim ledger lock poisoned");
        if claimed.contains(message) {
            return false;
        }
        let consumed = matcher();
        if consumed {
            claimed.insert(message);
        }
        consumed
    }
}

/// Cloneable handle to a bidirectional message channel.
#[derive(Clone)]
pub struct Channel {
    inlet: Inlet,
    outlet: broadcast::Sender<ChannelEvent>,
    claims: Arc<ClaimLedger>,
}

impl Channel {
    /// Create a channel and the endpoint a component uses to serve it.
    pub fn pair(config: &HubConfig) -> (Channel, Endpoint) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (outlet, _) = broadcast::channel(config.capacity());
        let channel = Channel {
            inlet: Inlet::Component(input_tx),
            outlet: outlet.clone(),
            claims: Arc::new(ClaimLedger::default()),
        };
        let endpoint = Endpoint {
            inbox: input_rx,
            outlet,
            terminated: false,
        };
        (channel, endpoint)
    }

    /// An identity component: every message written in comes back out
    /// unchanged (same allocation).
    ///
    /// Must be called inside a tokio runtime. The echo task ends, and the
    /// channel reports [`Termination::Destroy`], once every handle is dropped.
    pub fn passthrough(config: &HubConfig) -> Channel {
        let (channel, mut endpoint) = Channel::pair(config);
        tokio::spawn(async move {
            while let Some(message) = endpoint.recv().await {
                endpoint.emit(message);
            }
        });
        channel
    }

    /// The hub seen as a component. Every handle of one hub shares `claims`.
    pub(crate) fn from_hub(
        commands: mpsc::UnboundedSender<HubCommand>,
        outlet: broadcast::Sender<ChannelEvent>,
        claims: Arc<ClaimLedger>,
    ) -> Channel {
        Channel {
            inlet: Inlet::Hub(commands),
            outlet,
            claims,
        }
    }

    /// Enqueue a message as input.
    pub fn write(&self, message: impl Into<SharedMessage>) -> Result<(), BusError> {
        let message = message.into();
        match &self.inlet {
            Inlet::Component(tx) => tx.send(message).map_err(|_| BusError::Closed),
            Inlet::Hub(tx) => tx
                .send(HubCommand::Inject(message))
                .map_err(|_| BusError::Closed),
        }
    }

    /// Subscribe to everything the channel produces from now on.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.outlet.subscribe(),
        }
    }

    /// Number of live subscriptions on the output.
    pub fn subscriber_count(&self) -> usize {
        self.outlet.receiver_count()
    }

    /// Whether input can no longer be delivered.
    pub fn is_closed(&self) -> bool {
        match &self.inlet {
            Inlet::Component(tx) => tx.is_closed(),
            Inlet::Hub(tx) => tx.is_closed(),
        }
    }

    pub(crate) fn claims(&self) -> &ClaimLedger {
        &self.claims
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inlet {
            Inlet::Component(_) => "component",
            Inlet::Hub(_) => "hub",
        };
        f.debug_struct("Channel")
            .field("kind", &kind)
            .field("subscribers", &self.outlet.receiver_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Component-side half of a [`Channel`].
///
/// Dropping an endpoint without an explicit terminal signal reports
/// [`Termination::Destroy`] to subscribers.
pub struct Endpoint {
    inbox: mpsc::UnboundedReceiver<SharedMessage>,
    outlet: broadcast::Sender<ChannelEvent>,
    terminated: bool,
}

impl Endpoint {
    /// Next input message, or `None` once every [`Channel`] handle is gone.
    pub async fn recv(&mut self) -> Option<SharedMessage> {
        self.inbox.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<SharedMessage> {
        self.inbox.try_recv().ok()
    }

    /// Produce a message on the output. Returns the number of subscribers it
    /// reached; with none, the message is dropped.
    pub fn emit(&self, message: impl Into<SharedMessage>) -> usize {
        self.send(ChannelEvent::Message(message.into()))
    }

    /// Raise the error signal.
    pub fn fail(&self, error: ChannelError) -> usize {
        self.send(ChannelEvent::Error(error))
    }

    /// Graceful end.
    pub fn end(self) {
        self.terminate(Termination::End);
    }

    /// Abrupt close.
    pub fn close(self) {
        self.terminate(Termination::Close);
    }

    /// Tear down.
    pub fn destroy(self) {
        self.terminate(Termination::Destroy);
    }

    /// Raise the given terminal signal and give up the endpoint.
    pub fn terminate(mut self, signal: Termination) {
        self.signal(signal);
    }

    /// Number of live subscriptions on the output.
    pub fn subscriber_count(&self) -> usize {
        self.outlet.receiver_count()
    }

    fn signal(&mut self, signal: Termination) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.inbox.close();
        debug!(%signal, "channel terminated");
        self.send(ChannelEvent::Terminated(signal));
    }

    fn send(&self, event: ChannelEvent) -> usize {
        self.outlet.send(event).unwrap_or(0)
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.signal(Termination::Destroy);
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("subscribers", &self.outlet.receiver_count())
            .field("terminated", &self.terminated)
            .finish()
    }
}

/// A subscriber on a channel's output.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<ChannelEvent>,
}

impl Subscription {
    /// Next event. Lag is logged and skipped; `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "subscriber lagged, skipping {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Result<Option<ChannelEvent>, BusError> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(BusError::Closed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(BusError::Lagged(n)),
        }
    }

    /// Next message, skipping errors. `None` on a terminal signal or when the
    /// channel is gone.
    pub async fn next_message(&mut self) -> Option<SharedMessage> {
        loop {
            match self.recv().await? {
                ChannelEvent::Message(message) => return Some(message),
                ChannelEvent::Error(_) => continue,
                ChannelEvent::Terminated(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubwire_types::message::Message;

    fn config() -> HubConfig {
        HubConfig::default()
    }

    #[tokio::test]
    async fn write_reaches_endpoint_in_order() {
        let (channel, mut endpoint) = Channel::pair(&config());
        channel.write(Message::new("a")).unwrap();
        channel.write(Message::new("b")).unwrap();

        assert_eq!(endpoint.recv().await.unwrap().kind(), "a");
        assert_eq!(endpoint.recv().await.unwrap().kind(), "b");
    }

    #[tokio::test]
    async fn every_subscriber_sees_emitted_message() {
        let (channel, endpoint) = Channel::pair(&config());
        let mut first = channel.subscribe();
        let mut second = channel.subscribe();

        let msg = Message::new("VEGGIE").shared();
        assert_eq!(endpoint.emit(Arc::clone(&msg)), 2);

        let a = first.next_message().await.unwrap();
        let b = second.next_message().await.unwrap();
        assert!(Arc::ptr_eq(&a, &msg));
        assert!(Arc::ptr_eq(&b, &msg));
    }

    #[tokio::test]
    async fn subscriber_misses_messages_emitted_before_subscribing() {
        let (channel, endpoint) = Channel::pair(&config());
        assert_eq!(endpoint.emit(Message::new("early")), 0);

        let mut sub = channel.subscribe();
        endpoint.emit(Message::new("late"));
        assert_eq!(sub.next_message().await.unwrap().kind(), "late");
    }

    #[tokio::test]
    async fn error_signal_does_not_terminate() {
        let (channel, endpoint) = Channel::pair(&config());
        let mut sub = channel.subscribe();

        endpoint.fail(ChannelError::new("boom"));
        endpoint.emit(Message::new("after"));

        assert!(matches!(sub.recv().await, Some(ChannelEvent::Error(e)) if e.message == "boom"));
        assert!(matches!(sub.recv().await, Some(ChannelEvent::Message(m)) if m.is("after")));
    }

    #[tokio::test]
    async fn explicit_termination_is_reported_once() {
        let (channel, endpoint) = Channel::pair(&config());
        let mut sub = channel.subscribe();

        endpoint.close();

        assert!(matches!(
            sub.recv().await,
            Some(ChannelEvent::Terminated(Termination::Close))
        ));
        assert!(matches!(sub.try_recv(), Ok(None)));
        assert_eq!(channel.write(Message::new("late")), Err(BusError::Closed));
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn dropping_endpoint_reports_destroy() {
        let (channel, endpoint) = Channel::pair(&config());
        let mut sub = channel.subscribe();

        drop(endpoint);

        assert!(matches!(
            sub.recv().await,
            Some(ChannelEvent::Terminated(Termination::Destroy))
        ));
    }

    #[tokio::test]
    async fn endpoint_recv_ends_when_handles_dropped() {
        let (channel, mut endpoint) = Channel::pair(&config());
        let clone = channel.clone();
        drop(channel);
        clone.write(Message::new("last")).unwrap();
        drop(clone);

        assert_eq!(endpoint.recv().await.unwrap().kind(), "last");
        assert!(endpoint.recv().await.is_none());
    }

    #[tokio::test]
    async fn passthrough_echoes_same_allocation() {
        let channel = Channel::passthrough(&config());
        let mut sub = channel.subscribe();

        let msg = Message::new("ping").shared();
        channel.write(Arc::clone(&msg)).unwrap();

        let echoed = sub.next_message().await.unwrap();
        assert!(Arc::ptr_eq(&echoed, &msg));
    }

    #[tokio::test]
    async fn slow_subscriber_lags_past_high_water_mark() {
        let config = HubConfig::default().with_high_water_mark(2);
        let (channel, endpoint) = Channel::pair(&config);
        let mut sub = channel.subscribe();

        for i in 0..5 {
            endpoint.emit(Message::new(format!("m{i}")));
        }

        assert!(matches!(sub.try_recv(), Err(BusError::Lagged(3))));
        let next = sub.next_message().await.unwrap();
        assert_eq!(next.kind(), "m3");
    }

    #[test]
    fn claim_ledger_consumes_once() {
        let ledger = ClaimLedger::default();
        let msg = Message::new("RESPONSE").shared();

        assert!(!ledger.claim_with(&msg, || false));
        assert!(ledger.claim_with(&msg, || true));
        assert!(!ledger.claim_with(&msg, || panic!("matcher must not run")));
    }

    #[test]
    fn debug_impl() {
        let (channel, endpoint) = Channel::pair(&config());
        let debug = format!("{channel:?}");
        assert!(debug.contains("Channel"));
        assert!(debug.contains("component"));
        assert!(format!("{endpoint:?}").contains("terminated"));
    }
}
