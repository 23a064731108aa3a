//! Crate-level error type.
//!
//! A single [`SegmentError`] is shared by the fetcher, the manifest adapter and the
//! prefetch queue. One download outcome may be observed by several waiters (the
//! decode activity and a fallback probe), so the error is `Clone` and keeps
//! transport errors as strings instead of wrapping `reqwest` types.

/// Result type used by this crate.
pub type SegmentResult<T> = Result<T, SegmentError>;

/// Unified error type for the `stream-playback-segments` crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentError {
    /// A generic error with a message.
    #[error("{0}")]
    Message(String),

    /// The manifest could not be parsed or describes nothing playable.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// The manifest parsed but contained no renditions.
    #[error("no renditions available in manifest")]
    NoRenditions,

    /// Invalid parameters provided by the caller.
    #[error("invalid parameters: {0}")]
    InvalidParams(&'static str),

    /// Operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// HTTP request completed with a non-success status.
    #[error("HTTP error: {status} for {uri}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// URI that failed.
        uri: String,
    },

    /// Request timed out.
    #[error("request timeout for {0}")]
    Timeout(String),

    /// Transport level failure while fetching `uri`.
    #[error("failed to fetch {uri}: {reason}")]
    Fetch {
        /// URI that failed.
        uri: String,
        /// Human readable cause.
        reason: String,
    },

    /// Extra context around a lower-level error.
    #[error("{context}: {source}")]
    Context {
        /// What we were doing when the error occurred.
        context: &'static str,
        /// The underlying error.
        #[source]
        source: Box<SegmentError>,
    },
}

impl SegmentError {
    /// Convenience helper to construct a simple message error.
    pub fn msg(msg: impl Into<String>) -> Self {
        SegmentError::Message(msg.into())
    }

    /// Attach static context to an existing error.
    pub fn with_context(self, context: &'static str) -> Self {
        SegmentError::Context {
            context,
            source: Box::new(self),
        }
    }

    pub fn fetch(uri: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SegmentError::Fetch {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    /// The URI of the resource that failed, for fetch-class errors.
    pub fn uri(&self) -> Option<&str> {
        match self {
            SegmentError::Http { uri, .. } | SegmentError::Fetch { uri, .. } => Some(uri),
            SegmentError::Timeout(uri) => Some(uri),
            SegmentError::Context { source, .. } => source.uri(),
            _ => None,
        }
    }

    /// Make sure the error names `uri`, wrapping it when the underlying error does not.
    ///
    /// Cancellation is passed through untouched.
    pub fn for_uri(self, uri: &str) -> Self {
        match self {
            SegmentError::Cancelled => self,
            e if e.uri().is_some() => e,
            e => SegmentError::fetch(uri, e),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            SegmentError::Cancelled => true,
            SegmentError::Context { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}
