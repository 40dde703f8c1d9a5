//! Error types for the relay protocol.
//!
//! This module defines the central `Error` enum, which captures every failure
//! a tier can report back to its peer. Errors never travel further than the
//! connection they arose on: the handler renders them into the `erro` field
//! of a response (see [`Response::failure`]) and closes the connection.
//!
//! ## Error Cases
//! - `AccessDenied`: The caller's credential did not match the shared secret.
//! - `MalformedMessage`: A line was not a JSON object, was too long, or lacked
//!   a required field.
//! - `UpstreamUnavailable`: The next tier could not be reached.
//! - `UpstreamClosed`: The next tier closed the connection without replying.
//! - `InvalidArgument`: A computation rejected its operands.
//! - `Io`: A socket read or write failed.
//! - `ChannelError`: An internal communication failure between tasks and
//!   workers.
//! - `WorkerPanic`: A computation panicked inside a worker.
//! - `ServiceShutdown`: Work arrived while the worker pool was shutting down.
//!
//! Division by zero and unknown operation tags are deliberately absent: they
//! are ordinary results (see [`Outcome::Text`]).
//!
//! [`Response::failure`]: crate::message::Response::failure
//! [`Outcome::Text`]: crate::message::Outcome::Text

use tokio_util::codec::LinesCodecError;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the relay protocol.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The credential did not match the configured shared secret.
    ///
    /// The message is fixed and carries no detail about the mismatch.
    #[error("access denied")]
    AccessDenied,

    /// A line could not be decoded into the expected message shape.
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// The next tier refused or failed the outbound connection.
    #[error("upstream {addr} unavailable: {reason}")]
    UpstreamUnavailable { addr: String, reason: String },

    /// The next tier closed the connection without sending a reply.
    #[error("upstream closed the connection without replying")]
    UpstreamClosed,

    /// A computation rejected its input.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Socket I/O failed.
    #[error("I/O error: {context}")]
    Io { context: String },

    /// Internal channel send/receive failure (e.g., closed channel).
    #[error("channel error: {context}")]
    ChannelError { context: String },

    /// The computation panicked. The worker survives and keeps serving.
    #[error("computation panicked")]
    WorkerPanic,

    /// The worker pool is shutting down and accepts no new work.
    #[error("service is shutting down")]
    ServiceShutdown,
}

impl Error {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            // `LinesCodec` reports non UTF-8 input as `InvalidData`.
            std::io::ErrorKind::InvalidData => Self::malformed(err.to_string()),
            _ => Self::Io {
                context: err.to_string(),
            },
        }
    }
}

impl From<LinesCodecError> for Error {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                Self::malformed("line exceeds the maximum frame length")
            }
            LinesCodecError::Io(e) => e.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(err.to_string())
    }
}
