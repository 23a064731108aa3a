//! Configuration for fetching and prefetching segments.
//!
//! Included configuration domains:
//! - HTTP fetcher behavior (timeouts, retries, backoff)
//! - Prefetch window and init-data cache sizing
//! - Default rendition choice when the caller does not pick one

use std::fmt;
use std::time::Duration;

use crate::model::RenditionChoice;

/// Settings shared by [`crate::HttpFetcher`] and [`crate::SegmentPrefetchQueue`].
#[derive(Clone, PartialEq)]
pub struct SegmentSettings {
    // ----------------------------
    // Fetcher
    // ----------------------------
    /// Timeout for establishing a request and for the gap between two body chunks.
    /// Default: 30 seconds.
    pub request_timeout: Duration,

    /// Maximum number of retry attempts for failed requests.
    /// Default: 3 retries.
    pub max_retries: u32,

    /// Base delay for exponential backoff between retries.
    /// Default: 100ms.
    pub retry_base_delay: Duration,

    /// Maximum backoff delay (cap for exponential growth).
    /// Default: 5 seconds.
    pub max_retry_delay: Duration,

    // ----------------------------
    // Prefetch
    // ----------------------------
    /// Number of segment indices (starting at the current one) kept downloading
    /// for the active rendition.
    /// Default: 2.
    pub prefetch_window: usize,

    /// Number of distinct init payloads kept in memory.
    /// Default: 8.
    pub init_cache_capacity: usize,

    /// Rendition used when the caller does not name one.
    /// Default: [`RenditionChoice::Middle`].
    pub default_rendition: RenditionChoice,
}

impl Default for SegmentSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            max_retry_delay: Duration::from_secs(5),

            prefetch_window: 2,
            init_cache_capacity: 8,
            default_rendition: RenditionChoice::Middle,
        }
    }
}

impl fmt::Debug for SegmentSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentSettings")
            .field("request_timeout", &self.request_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("max_retry_delay", &self.max_retry_delay)
            .field("prefetch_window", &self.prefetch_window)
            .field("init_cache_capacity", &self.init_cache_capacity)
            .field("default_rendition", &self.default_rendition)
            .finish()
    }
}

impl SegmentSettings {
    /// Create default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings tuned for flaky mobile links.
    /// - Shorter timeouts
    /// - More aggressive retries
    /// - Deeper prefetch
    pub fn mobile(mut self) -> Self {
        self.request_timeout = Duration::from_secs(15);
        self.max_retries = 5;
        self.retry_base_delay = Duration::from_millis(50);
        self.max_retry_delay = Duration::from_secs(3);
        self.prefetch_window = 4;
        self
    }

    // -------------------------
    // Fetcher setters
    // -------------------------

    pub fn request_timeout(mut self, v: Duration) -> Self {
        self.request_timeout = v;
        self
    }

    pub fn max_retries(mut self, v: u32) -> Self {
        self.max_retries = v;
        self
    }

    pub fn retry_base_delay(mut self, v: Duration) -> Self {
        self.retry_base_delay = v;
        self
    }

    pub fn max_retry_delay(mut self, v: Duration) -> Self {
        self.max_retry_delay = v;
        self
    }

    // -------------------------
    // Prefetch setters
    // -------------------------

    /// A window of zero is treated as one: the current index is always fetched.
    pub fn prefetch_window(mut self, v: usize) -> Self {
        self.prefetch_window = v.max(1);
        self
    }

    pub fn init_cache_capacity(mut self, v: usize) -> Self {
        self.init_cache_capacity = v.max(1);
        self
    }

    pub fn default_rendition(mut self, v: RenditionChoice) -> Self {
        self.default_rendition = v;
        self
    }
}
