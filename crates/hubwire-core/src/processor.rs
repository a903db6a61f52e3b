//! Message processor trait and its runner.
//!
//! Most components are filters: they look at each broadcast's discriminator,
//! act on the few kinds they care about, and ignore the rest. A
//! [`MessageProcessor`] captures that shape, and [`spawn_processor`] serves it
//! on a [`Channel`] so it can be registered with a hub.
//!
//! A processor handles one message at a time; the next input is not read
//! until `process` returns, so a slow processor only delays itself.

use std::future::Future;

use hubwire_types::config::HubConfig;
use hubwire_types::message::Message;
use tracing::trace;

use crate::channel::Channel;

/// A component expressed as a per-message handler.
///
/// Private state lives in the implementing type, behind the channel
/// boundary; nothing about it is shared with other components.
pub trait MessageProcessor: Send + 'static {
    /// Messages to emit once the component is running. Called after
    /// [`spawn_processor`] returns and before the first input is read.
    fn on_start(&mut self) -> impl Future<Output = Vec<Message>> + Send {
        std::future::ready(Vec::new())
    }

    /// Handle one input message, returning the messages to emit in reply
    /// (usually none).
    fn process(&mut self, message: &Message) -> impl Future<Output = Vec<Message>> + Send;
}

/// Processor built from a synchronous closure.
pub struct FnProcessor<F>(pub F);

impl<F> MessageProcessor for FnProcessor<F>
where
    F: FnMut(&Message) -> Option<Message> + Send + 'static,
{
    fn process(&mut self, message: &Message) -> impl Future<Output = Vec<Message>> + Send {
        let output = (self.0)(message).into_iter().collect();
        std::future::ready(output)
    }
}

/// Serve `processor` on a new channel.
///
/// The processor runs on its own task until every handle to the returned
/// channel is dropped, at which point the channel reports
/// [`Termination::Destroy`](hubwire_types::error::Termination::Destroy).
/// Must be called inside a tokio runtime.
pub fn spawn_processor<P: MessageProcessor>(mut processor: P, config: &HubConfig) -> Channel {
    let (channel, mut endpoint) = Channel::pair(config);
    tokio::spawn(async move {
        // Let the caller finish wiring (registering the channel) first.
        tokio::task::yield_now().await;
        for message in processor.on_start().await {
            endpoint.emit(message);
        }

        while let Some(message) = endpoint.recv().await {
            let output = processor.process(&message).await;
            if !output.is_empty() {
                trace!(kind = message.kind(), replies = output.len(), "processor replied");
            }
            for reply in output {
                endpoint.emit(reply);
            }
        }
    });
    channel
}
