//! Runtime layer errors.
//!
//! All variants implement [`ErrorCode`] with the `RT_` prefix.
//! Property and codec failures from the message layer pass through
//! with their own `MSG_` codes.
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | `InvalidArgument` | `RT_INVALID_ARGUMENT` | no |
//! | `InvalidState` | `RT_INVALID_STATE` | no |
//! | `NotConnected` | `RT_MSG_NOT_CONNECTED` | no |
//! | `Closed` | `RT_CLOSED` | no |
//! | `RunloopClosed` | `RT_RUNLOOP_CLOSED` | no |
//! | `Timeout` | `RT_TIMEOUT` | yes |
//! | `Generic` | `RT_GENERIC` | no |

use weft_msg::MsgError;
use weft_types::ErrorCode;

/// Error produced by runtime operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    /// Malformed caller input (empty name, unroutable result, bad
    /// graph definition).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation out of lifecycle order.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// No destination resolved for the message, or the destination is
    /// not ready to receive.
    #[error("message not connected: {kind} '{name}'")]
    NotConnected {
        /// Envelope kind of the failed send.
        kind: weft_msg::MsgKind,
        /// Message name of the failed send.
        name: String,
    },

    /// The runtime (or the addressed extension) shut down under the
    /// caller.
    #[error("runtime is closed")]
    Closed,

    /// A task was posted to a runloop that has already drained.
    #[error("runloop is closed")]
    RunloopClosed,

    /// A blocking wait exceeded its deadline.
    #[error("timed out waiting for result")]
    Timeout,

    /// Property or codec failure from the message layer.
    #[error(transparent)]
    Msg(#[from] MsgError),

    /// Anything without a more specific variant.
    #[error("{0}")]
    Generic(String),
}

impl RuntimeError {
    pub(crate) fn not_connected(kind: weft_msg::MsgKind, name: &str) -> Self {
        Self::NotConnected {
            kind,
            name: name.to_string(),
        }
    }
}

impl ErrorCode for RuntimeError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "RT_INVALID_ARGUMENT",
            Self::InvalidState(_) => "RT_INVALID_STATE",
            Self::NotConnected { .. } => "RT_MSG_NOT_CONNECTED",
            Self::Closed => "RT_CLOSED",
            Self::RunloopClosed => "RT_RUNLOOP_CLOSED",
            Self::Timeout => "RT_TIMEOUT",
            Self::Msg(e) => e.code(),
            Self::Generic(_) => "RT_GENERIC",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// A failed send, handing the envelope back to the caller.
///
/// Ownership of an envelope transfers to the runtime only on success;
/// this type is how the caller gets it back to retry, inspect, or
/// drop.
#[derive(Debug)]
pub struct SendError<T> {
    /// Why the send failed.
    pub error: RuntimeError,
    /// The envelope the caller still owns.
    pub envelope: T,
}

impl<T> SendError<T> {
    pub(crate) fn new(error: RuntimeError, envelope: T) -> Self {
        Self { error, envelope }
    }

    /// Splits into the error and the reclaimed envelope.
    #[must_use]
    pub fn into_parts(self) -> (RuntimeError, T) {
        (self.error, self.envelope)
    }
}

impl<T: std::fmt::Debug> std::fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "send failed: {}", self.error)
    }
}

impl<T: std::fmt::Debug> std::error::Error for SendError<T> {}
