//! Error types for the playback pipeline.
//!
//! Accounting errors and underruns never leave the frame queue or the scheduler; they
//! are logged. Everything here is what reaches the [`crate::PlaybackController`] and,
//! through it, the caller.

use std::time::Duration;

use stream_playback_segments::SegmentError;

/// Result type used by this crate.
pub type PlaybackResult<T> = Result<T, PlaybackError>;

/// A non-recoverable failure reported by a frame producer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProducerFailure {
    /// The decoder gave up with an implementation specific code.
    #[error("decoder error {code}: {message}")]
    Decoder { code: i32, message: String },

    /// The decoder could not obtain its input.
    #[error(transparent)]
    Input(#[from] SegmentError),
}

impl ProducerFailure {
    pub fn decoder(code: i32, message: impl Into<String>) -> Self {
        ProducerFailure::Decoder {
            code,
            message: message.into(),
        }
    }
}

/// Unified error type for the `stream-playback` crate.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// A generic error with a message.
    #[error("{0}")]
    Message(String),

    /// Manifest or segment fetch failure.
    #[error(transparent)]
    Segment(#[from] SegmentError),

    /// The producer reported a failure and playback was stopped.
    #[error("producer failed: {0}")]
    Producer(#[from] ProducerFailure),

    /// The producer of the previous session did not exit within `waited`.
    #[error("previous session still running (waited {waited:?})")]
    PreviousSessionRunning { waited: Duration },

    /// A frame was emitted without a granted credit.
    #[error("frame emitted without a granted credit")]
    CreditViolation,

    /// The other end of the credit channel is gone.
    #[error("credit channel closed")]
    ChannelClosed,

    /// The operation does not apply in the current playback state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Extra context around a lower-level error.
    #[error("{context}: {source}")]
    Context {
        /// What we were doing when the error occurred.
        context: &'static str,
        /// The underlying error.
        #[source]
        source: Box<PlaybackError>,
    },
}

impl PlaybackError {
    /// Convenience helper to construct a simple message error.
    pub fn msg(msg: impl Into<String>) -> Self {
        PlaybackError::Message(msg.into())
    }

    /// Attach static context to an existing error.
    pub fn with_context(self, context: &'static str) -> Self {
        PlaybackError::Context {
            context,
            source: Box::new(self),
        }
    }
}
