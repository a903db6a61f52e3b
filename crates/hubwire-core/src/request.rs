//! One-shot request/response correlation over a broadcast channel.
//!
//! [`request`] subscribes to a channel, writes one request message on its
//! next turn, and hands every message seen afterwards to a matcher until the
//! matcher calls [`Responder::respond`]. The first response wins; the
//! subscription is then released.
//!
//! There is no correlation id. Two outstanding requests on the same channel
//! whose matchers accept the same response shape race for it: whichever
//! correlator sees a response first consumes it, and the other keeps waiting.
//! A correlation-id field set by `build` and checked by the matcher is the
//! intended way to close that gap.
//!
//! There is no timeout either. A request nobody answers stays pending, and
//! dropping its [`PendingResponse`] does not detach the subscription; wrap the
//! future in `tokio::time::timeout` if bounded waiting is needed.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use hubwire_types::error::RequestError;
use hubwire_types::message::Message;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::channel::{Channel, ChannelEvent};

/// Lifecycle flags of one correlator. Each only ever goes from `false` to
/// `true`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RequestState {
    /// The request message was built and written.
    pub request_sent: bool,
    /// A response was delivered to the caller.
    pub response_sent: bool,
    /// The correlator stopped listening.
    pub ended: bool,
}

struct Inner<T> {
    state: RequestState,
    reply: Option<oneshot::Sender<Result<T, RequestError>>>,
}

/// Completion handle shared by the request builder and the matcher.
///
/// Completing is one-shot: the first [`respond`](Self::respond) wins and
/// every later call is a no-op.
pub struct Responder<T> {
    inner: Arc<Mutex<Inner<T>>>,
    done: CancellationToken,
}

impl<T> Clone for Responder<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            done: self.done.clone(),
        }
    }
}

impl<T> Responder<T> {
    fn new(reply: oneshot::Sender<Result<T, RequestError>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: RequestState::default(),
                reply: Some(reply),
            })),
            done: CancellationToken::new(),
        }
    }

    /// Resolve the request with `value`. Returns `false` if it was already
    /// resolved.
    pub fn respond(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    /// Whether the correlator has finished.
    pub fn is_done(&self) -> bool {
        self.state().ended
    }

    pub fn state(&self) -> RequestState {
        self.lock().state
    }

    fn response_sent(&self) -> bool {
        self.state().response_sent
    }

    fn fail(&self, error: RequestError) -> bool {
        self.complete(Err(error))
    }

    fn complete(&self, outcome: Result<T, RequestError>) -> bool {
        let reply = {
            let mut inner = self.lock();
            if inner.state.ended {
                return false;
            }
            inner.state.ended = true;
            inner.state.response_sent = outcome.is_ok();
            inner.reply.take()
        };
        self.done.cancel();
        if let Some(reply) = reply {
            // The caller may have stopped waiting.
            let _ = reply.send(outcome);
        }
        true
    }

    /// Mark the request as sent. Returns `false` if the correlator already
    /// finished, in which case the request must not be written.
    fn begin_request(&self) -> bool {
        let mut inner = self.lock();
        if inner.state.request_sent || inner.state.ended {
            return false;
        }
        inner.state.request_sent = true;
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        self.inner.lock().expect("responder lock poisoned")
    }
}

/// Future resolving to the first matched response.
pub struct PendingResponse<T> {
    reply: oneshot::Receiver<Result<T, RequestError>>,
    responder: Responder<T>,
}

impl<T> PendingResponse<T> {
    pub fn state(&self) -> RequestState {
        self.responder.state()
    }
}

impl<T> Future for PendingResponse<T> {
    type Output = Result<T, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.reply).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RequestError::ChannelClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Send one request on `channel` and wait for a matching response.
///
/// - `build` produces the request. It runs once, on the correlator task's
///   first turn, after the subscription is in place, so a responder that
///   answers synchronously cannot be missed.
/// - `matcher` sees every message produced on `channel` after this call
///   returns (including the request itself, if the channel echoes it) and
///   calls [`Responder::respond`] when one is the answer. Messages it ignores
///   do not end the request.
///
/// Extra arguments are captured by the closures. The future resolves with
/// [`RequestError::ChannelClosed`] if the channel terminates first.
pub fn request<T, B, M>(channel: &Channel, build: B, mut matcher: M) -> PendingResponse<T>
where
    T: Send + 'static,
    B: FnOnce(&Responder<T>) -> Message + Send + 'static,
    M: FnMut(&Message, &Responder<T>) + Send + 'static,
{
    let mut subscription = channel.subscribe();
    let (reply, receiver) = oneshot::channel();
    let responder = Responder::new(reply);
    let task_responder = responder.clone();
    let channel = channel.clone();

    tokio::spawn(async move {
        let responder = task_responder;

        if responder.begin_request() {
            let message = build(&responder);
            trace!(kind = message.kind(), "sending correlated request");
            if let Err(err) = channel.write(message) {
                responder.fail(RequestError::SendFailed(err));
            }
        }

        while !responder.is_done() {
            let event = tokio::select! {
                biased;
                _ = responder.done.cancelled() => break,
                event = subscription.recv() => event,
            };
            match event {
                Some(ChannelEvent::Message(message)) => {
                    channel.claims().claim_with(&message, || {
                        // Never unwind while the claim ledger is locked.
                        let matched = panic::catch_unwind(AssertUnwindSafe(|| {
                            matcher(&message, &responder)
                        }));
                        if matched.is_err() {
                            warn!(kind = message.kind(), "response matcher panicked, request abandoned");
                            responder.fail(RequestError::MatcherPanicked);
                            return false;
                        }
                        responder.response_sent()
                    });
                }
                Some(ChannelEvent::Error(_)) => continue,
                Some(ChannelEvent::Terminated(_)) | None => {
                    responder.fail(RequestError::ChannelClosed);
                }
            }
        }
        debug!(state = ?responder.state(), "correlator detached");
    });

    PendingResponse {
        reply: receiver,
        responder,
    }
}

/// Callback flavor of [`request`].
///
/// `callback` runs on its own task once the request resolves, never inside
/// the pass that delivered the response.
pub fn request_with_callback<T, B, M, C>(
    channel: &Channel,
    build: B,
    matcher: M,
    callback: C,
) -> JoinHandle<()>
where
    T: Send + 'static,
    B: FnOnce(&Responder<T>) -> Message + Send + 'static,
    M: FnMut(&Message, &Responder<T>) + Send + 'static,
    C: FnOnce(Result<T, RequestError>) + Send + 'static,
{
    let pending = request(channel, build, matcher);
    tokio::spawn(async move {
        callback(pending.await);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Endpoint;
    use hubwire_types::config::HubConfig;
    use hubwire_types::error::BusError;
    use serde_json::json;
    use std::time::Duration;

    /// Answers every `query/I_NEED_DOGS` with a `document/LIST_OF_DOGS`.
    fn dogs_service(mut endpoint: Endpoint) {
        tokio::spawn(async move {
            while let Some(message) = endpoint.recv().await {
                if message.is("query/I_NEED_DOGS") {
                    endpoint.emit(
                        Message::new("document/LIST_OF_DOGS").with("dogs", json!(["Izzy", "Dexter"])),
                    );
                }
            }
        });
    }

    fn list_matcher(message: &Message, responder: &Responder<serde_json::Value>) {
        if message.is("document/LIST_OF_DOGS") {
            responder.respond(message.get("dogs").cloned().unwrap_or_default());
        }
    }

    #[tokio::test]
    async fn resolves_with_matching_response() {
        let (channel, endpoint) = Channel::pair(&HubConfig::default());
        dogs_service(endpoint);

        let pending = request(
            &channel,
            |_| Message::new("query/I_NEED_DOGS"),
            list_matcher,
        );
        let dogs = pending.await.unwrap();
        assert_eq!(dogs, json!(["Izzy", "Dexter"]));
    }

    #[tokio::test]
    async fn request_is_sent_once_and_deferred() {
        let (channel, mut endpoint) = Channel::pair(&HubConfig::default());

        let pending = request(&channel, |_| Message::new("ping"), |_, r: &Responder<()>| {
            r.respond(());
        });
        // Nothing is written until the correlator task gets a turn.
        assert!(endpoint.try_recv().is_none());
        assert!(!pending.state().request_sent);

        assert!(endpoint.recv().await.unwrap().is("ping"));
        assert!(pending.state().request_sent);
        endpoint.emit(Message::new("pong"));
        pending.await.unwrap();

        tokio::task::yield_now().await;
        assert!(endpoint.try_recv().is_none());
    }

    #[tokio::test]
    async fn non_matching_messages_are_ignored() {
        let (channel, mut endpoint) = Channel::pair(&HubConfig::default());
        let pending = request(
            &channel,
            |_| Message::new("query/I_NEED_DOGS"),
            list_matcher,
        );

        endpoint.recv().await.unwrap();
        endpoint.emit(Message::new("system/LOG"));
        endpoint.emit(Message::new("events/DOG_ADDED"));
        endpoint.emit(Message::new("document/LIST_OF_DOGS").with("dogs", json!([])));

        assert_eq!(pending.await.unwrap(), json!([]));
    }

    #[tokio::test]
    async fn second_respond_is_a_no_op() {
        let (channel, mut endpoint) = Channel::pair(&HubConfig::default());
        let pending = request(&channel, |_| Message::new("q"), |m: &Message, r: &Responder<String>| {
            assert!(r.respond(m.kind().to_string()));
            assert!(!r.respond("again".to_string()));
        });

        endpoint.recv().await.unwrap();
        endpoint.emit(Message::new("first"));
        endpoint.emit(Message::new("second"));

        assert_eq!(pending.await.unwrap(), "first");
    }

    #[tokio::test]
    async fn builder_may_respond_immediately() {
        let (channel, mut endpoint) = Channel::pair(&HubConfig::default());
        let pending = request(
            &channel,
            |r: &Responder<u32>| {
                r.respond(7);
                Message::new("fire-and-forget")
            },
            |_, _| panic!("matcher must not run after completion"),
        );

        assert_eq!(pending.await.unwrap(), 7);
        assert!(endpoint.recv().await.unwrap().is("fire-and-forget"));
    }

    #[tokio::test]
    async fn terminated_channel_fails_request() {
        let (channel, mut endpoint) = Channel::pair(&HubConfig::default());
        let pending = request(&channel, |_| Message::new("q"), |_, _: &Responder<()>| {});

        endpoint.recv().await.unwrap();
        endpoint.end();

        assert_eq!(pending.await, Err(RequestError::ChannelClosed));
    }

    #[tokio::test]
    async fn closed_channel_fails_send() {
        let (channel, endpoint) = Channel::pair(&HubConfig::default());
        let mut probe = channel.subscribe();
        endpoint.destroy();
        probe.recv().await;

        let pending = request(&channel, |_| Message::new("q"), |_, _: &Responder<()>| {});
        assert_eq!(
            pending.await,
            Err(RequestError::SendFailed(BusError::Closed))
        );
    }

    #[tokio::test]
    async fn panicking_matcher_fails_only_its_own_request() {
        let (channel, mut endpoint) = Channel::pair(&HubConfig::default());

        let broken = request(
            &channel,
            |_| Message::new("q"),
            |_: &Message, _: &Responder<()>| panic!("matcher bug"),
        );
        endpoint.recv().await.unwrap();
        endpoint.emit(Message::new("answer"));
        assert_eq!(broken.await, Err(RequestError::MatcherPanicked));

        // The channel's claim ledger is still usable.
        let healthy = request(
            &channel,
            |_| Message::new("q"),
            |m: &Message, r: &Responder<String>| {
                r.respond(m.kind().to_string());
            },
        );
        endpoint.recv().await.unwrap();
        endpoint.emit(Message::new("answer"));
        assert_eq!(healthy.await.unwrap(), "answer");
    }

    #[tokio::test]
    async fn callback_receives_result() {
        let (channel, endpoint) = Channel::pair(&HubConfig::default());
        dogs_service(endpoint);
        let (tx, rx) = oneshot::channel();

        request_with_callback(
            &channel,
            |_| Message::new("query/I_NEED_DOGS"),
            list_matcher,
            move |result| {
                let _ = tx.send(result);
            },
        );

        let dogs = rx.await.unwrap().unwrap();
        assert_eq!(dogs, json!(["Izzy", "Dexter"]));
    }

    #[tokio::test]
    async fn abandoned_request_keeps_its_subscription() {
        let (channel, mut endpoint) = Channel::pair(&HubConfig::default());
        let pending = request(&channel, |_| Message::new("q"), |_, _: &Responder<()>| {});
        endpoint.recv().await.unwrap();
        assert_eq!(channel.subscriber_count(), 1);

        drop(pending);
        tokio::time::sleep(Duration::from_millis(10)).await;

        // No cancellation API: the correlator still listens.
        assert_eq!(channel.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn completed_request_releases_subscription() {
        let (channel, endpoint) = Channel::pair(&HubConfig::default());
        dogs_service(endpoint);

        request(&channel, |_| Message::new("query/I_NEED_DOGS"), list_matcher)
            .await
            .unwrap();
        tokio::task::yield_now().await;

        assert_eq!(channel.subscriber_count(), 0);
    }
}
