//! Byte fetching for manifests, init data and media segments.
//!
//! [`Fetcher`] is the seam the prefetch queue and the manifest adapter download through.
//! [`HttpFetcher`] is the network implementation; tests substitute in-memory ones.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SegmentResult;

mod http;

pub use http::HttpFetcher;

/// Download progress of a single resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchProgress {
    pub uri: String,
    /// Bytes received so far.
    pub loaded: u64,
    /// Expected total, when the server announced one.
    pub total: Option<u64>,
}

/// Receives `onProgress(loaded, total)` style notifications.
pub type ProgressCallback = Arc<dyn Fn(FetchProgress) + Send + Sync>;

/// Asynchronous byte source keyed by URI.
///
/// Implementations must resolve every failure to an error naming the URI
/// (see [`crate::SegmentError::uri`]) and return [`crate::SegmentError::Cancelled`]
/// once their cancellation token fires.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Download `uri` completely into memory.
    async fn fetch(&self, uri: &str, progress: Option<ProgressCallback>) -> SegmentResult<Bytes>;
}

/// Wraps a progress callback so it can live inside `Debug` structs.
#[derive(Clone)]
pub(crate) struct ProgressSink(pub(crate) Option<ProgressCallback>);

impl fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.0.is_some() {
            "ProgressSink(Some(..))"
        } else {
            "ProgressSink(None)"
        })
    }
}
