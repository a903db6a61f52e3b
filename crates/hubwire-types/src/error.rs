use std::fmt;

use thiserror::Error;

/// Errors from writing to or reading from the bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// The channel (or hub) no longer accepts input.
    #[error("channel closed")]
    Closed,

    /// A subscriber fell behind the high-water mark and skipped messages.
    #[error("lagged behind by {0} messages")]
    Lagged(u64),
}

/// An error value reported on a component channel's error signal.
///
/// Channel errors are data: they travel alongside messages and never
/// terminate the channel on their own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ChannelError {
    /// Human readable description supplied by the component.
    pub message: String,
}

impl ChannelError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Terminal signals a channel can raise.
///
/// All three mean "this channel is now permanently unusable"; the spoke
/// normalizes them into one disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Termination {
    /// Graceful end of output.
    End,
    /// Abrupt close.
    Close,
    /// The channel was torn down (also reported when a component drops its
    /// endpoint without signaling).
    Destroy,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::End => "end",
            Self::Close => "close",
            Self::Destroy => "destroy",
        };
        f.write_str(s)
    }
}

/// Errors from a correlated request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// The channel terminated before a matching response arrived.
    #[error("channel closed before a response arrived")]
    ChannelClosed,

    /// The request could not be written to the channel.
    #[error("request could not be sent: {0}")]
    SendFailed(BusError),

    /// The response matcher panicked; the request is abandoned.
    #[error("response matcher panicked")]
    MatcherPanicked,
}

/// Errors from loading hub configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid config in {path}: {message}")]
    Invalid { path: String, message: String },
}
