//! Logger component shared by the demos.

use hubwire_core::MessageProcessor;
use hubwire_types::message::Message;
use tokio::sync::mpsc;

/// Collects the `log` field of every message of kind `kind`.
///
/// Lines go to an mpsc queue so the command driving the hub decides when
/// and where to print them.
pub struct LoggerService {
    kind: &'static str,
    lines: mpsc::UnboundedSender<String>,
}

impl LoggerService {
    pub fn new(kind: &'static str) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (lines, rx) = mpsc::unbounded_channel();
        (Self { kind, lines }, rx)
    }
}

impl MessageProcessor for LoggerService {
    async fn process(&mut self, message: &Message) -> Vec<Message> {
        if message.is(self.kind) {
            let line = message.get_str("log").unwrap_or_default().to_string();
            // The driver may already be done reading.
            let _ = self.lines.send(line);
        }
        Vec::new()
    }
}
