//! Segment prefetch queue.
//!
//! Keeps the decode activity fed with init and media payloads in index order while
//! downloads for the next few indices of the active rendition run in the background.
//!
//! # Model
//!
//! - One rendition is *active*. [`SegmentPrefetchQueue::set_rendition`] changes it for
//!   the current and all later indices; payloads already downloaded for other
//!   renditions are kept and may serve as a same-index fallback.
//! - Every download is a spawned task publishing its outcome through a `watch`
//!   channel, so any number of callers can observe or await it.
//! - The state mutex is only held for bookkeeping, never across an `.await`.
//!
//! # Consumption protocol
//!
//! ```text
//! loop {
//!     match queue.get_next_init_segment().await? {
//!         NextInit::Changed(init) => decoder.reconfigure(init.data),
//!         NextInit::Unchanged => {}
//!         NextInit::EndOfTrack => break,
//!     }
//!     match queue.get_next_segment_file().await? {
//!         NextSegment::Media(seg) => decoder.feed(seg.data),
//!         NextSegment::NewInitNeeded => continue,
//!         NextSegment::EndOfTrack => break,
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::error::{SegmentError, SegmentResult};
use crate::fetcher::{Fetcher, ProgressCallback, ProgressSink};
use crate::model::{Manifest, Rendition, Segment};
use crate::settings::SegmentSettings;

/// Identity of one media payload: a rendition and a segment index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId {
    pub rendition: usize,
    pub index: usize,
}

/// Download state of a segment or init payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    NotRequested,
    InFlight,
    Downloaded,
    Failed,
    /// Handed to the decoder; the payload has been dropped.
    Consumed,
}

/// Initialization data handed to the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct InitPayload {
    pub rendition: usize,
    pub uri: String,
    pub data: Bytes,
}

/// Result of [`SegmentPrefetchQueue::get_next_init_segment`].
#[derive(Debug, Clone, PartialEq)]
pub enum NextInit {
    /// Init data differs from what was last supplied; the decoder must reconfigure.
    Changed(InitPayload),
    /// The decoder's current configuration still applies.
    Unchanged,
    EndOfTrack,
}

/// Media payload handed to the decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPayload {
    pub id: SegmentId,
    pub uri: String,
    pub data: Bytes,
    pub duration_hint: Duration,
    /// `true` when the payload came from a rendition other than the active one.
    pub substituted: bool,
}

/// Result of [`SegmentPrefetchQueue::get_next_segment_file`].
#[derive(Debug, Clone, PartialEq)]
pub enum NextSegment {
    Media(SegmentPayload),
    /// The payload for this index needs different init data; call
    /// [`SegmentPrefetchQueue::get_next_init_segment`] first.
    NewInitNeeded,
    EndOfTrack,
}

/// Construction parameters for [`SegmentPrefetchQueue`].
pub struct PrefetchParams {
    pub manifest: Manifest,
    pub fetcher: Arc<dyn Fetcher>,
    pub settings: SegmentSettings,
    pub cancel: CancellationToken,
    pub progress: Option<ProgressCallback>,
}

impl PrefetchParams {
    pub fn new(manifest: Manifest, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            manifest,
            fetcher,
            settings: SegmentSettings::default(),
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn settings(mut self, settings: SegmentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }
}

#[derive(Clone)]
struct Download {
    rx: watch::Receiver<Option<SegmentResult<Bytes>>>,
}

impl Download {
    fn state(&self) -> SegmentState {
        match &*self.rx.borrow() {
            None => SegmentState::InFlight,
            Some(Ok(_)) => SegmentState::Downloaded,
            Some(Err(_)) => SegmentState::Failed,
        }
    }

    async fn wait(mut self) -> SegmentResult<Bytes> {
        let outcome = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SegmentError::Cancelled)?
            .clone();
        outcome.unwrap_or(Err(SegmentError::Cancelled))
    }
}

struct PrefetchState {
    active: usize,
    index: usize,
    started: bool,
    // URI of the init payload the decoder was last configured with.
    supplied_init: Option<String>,
    media: HashMap<SegmentId, Download>,
    init: LruCache<String, Download>,
}

struct Shared {
    renditions: Vec<Rendition>,
    duration: Duration,
    fetcher: Arc<dyn Fetcher>,
    settings: SegmentSettings,
    cancel: CancellationToken,
    progress: ProgressSink,
    state: Mutex<PrefetchState>,
}

/// Ordered, rendition-switchable access to a segmented track.
///
/// Cloning is cheap and every clone shares the same state, so the controller can
/// switch renditions while the decode activity is awaiting a payload.
#[derive(Clone)]
pub struct SegmentPrefetchQueue {
    shared: Arc<Shared>,
}

impl fmt::Debug for SegmentPrefetchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.shared.state.lock();
        f.debug_struct("SegmentPrefetchQueue")
            .field("renditions", &self.shared.renditions.len())
            .field("active", &st.active)
            .field("index", &st.index)
            .field("started", &st.started)
            .field("in_flight", &st.media.len())
            .field("progress", &self.shared.progress)
            .finish()
    }
}

impl SegmentPrefetchQueue {
    /// Build a queue over `params.manifest`, sorting its renditions by ascending bandwidth.
    ///
    /// Nothing is fetched until [`start`](Self::start).
    pub fn new(params: PrefetchParams) -> SegmentResult<Self> {
        let manifest = params.manifest.sorted_by_bandwidth();
        if manifest.renditions.is_empty() {
            return Err(SegmentError::NoRenditions);
        }
        let duration = manifest.effective_duration();
        let capacity =
            NonZeroUsize::new(params.settings.init_cache_capacity).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            shared: Arc::new(Shared {
                renditions: manifest.renditions,
                duration,
                fetcher: params.fetcher,
                settings: params.settings,
                cancel: params.cancel,
                progress: ProgressSink(params.progress),
                state: Mutex::new(PrefetchState {
                    active: 0,
                    index: 0,
                    started: false,
                    supplied_init: None,
                    media: HashMap::new(),
                    init: LruCache::new(capacity),
                }),
            }),
        })
    }

    // ----------------------------
    // Lifecycle
    // ----------------------------

    /// Activate `rendition` (or the configured default), rewind to segment 0 and begin
    /// fetching it together with its init data.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, rendition: Option<usize>) -> usize {
        let mut st = self.shared.state.lock();
        let active = self.resolve_rendition(rendition);
        st.active = active;
        st.index = 0;
        st.started = true;
        st.supplied_init = None;
        debug!(
            rendition = active,
            bandwidth = self.shared.renditions[active].bandwidth,
            "SegmentPrefetchQueue: started"
        );
        self.prefetch_ahead(&mut st);
        active
    }

    /// Rewind to segment 0 of the active rendition (looped playback).
    pub fn restart(&self) -> usize {
        let active = self.shared.state.lock().active;
        self.start(Some(active))
    }

    /// Abort all in-flight downloads. Pending waiters resolve with
    /// [`SegmentError::Cancelled`].
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
        let mut st = self.shared.state.lock();
        st.media.clear();
        st.init.clear();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    // ----------------------------
    // Rendition control
    // ----------------------------

    /// Switch the active rendition for the current and all later indices.
    ///
    /// `None` restores the configured default; out-of-range indices are clamped.
    /// Returns the rendition that is active afterwards.
    pub fn set_rendition(&self, rendition: Option<usize>) -> usize {
        let target = self.resolve_rendition(rendition);
        let mut st = self.shared.state.lock();
        if st.active != target {
            debug!(
                "SegmentPrefetchQueue: switching rendition from {} to {} at segment {}",
                st.active, target, st.index
            );
            st.active = target;
        }
        if st.started {
            self.prefetch_ahead(&mut st);
        }
        target
    }

    pub fn active_rendition(&self) -> usize {
        self.shared.state.lock().active
    }

    /// Index of the next media segment to be handed out.
    pub fn current_index(&self) -> usize {
        self.shared.state.lock().index
    }

    /// Renditions sorted by ascending bandwidth.
    pub fn renditions(&self) -> &[Rendition] {
        &self.shared.renditions
    }

    /// Duration declared by the manifest, or the longest rendition.
    pub fn duration(&self) -> Duration {
        self.shared.duration
    }

    // ----------------------------
    // Introspection
    // ----------------------------

    /// Download state of one media payload.
    pub fn segment_state(&self, id: SegmentId) -> SegmentState {
        let st = self.shared.state.lock();
        match st.media.get(&id) {
            Some(d) => d.state(),
            None if id.index < st.index => SegmentState::Consumed,
            None => SegmentState::NotRequested,
        }
    }

    /// Download state of an init payload.
    pub fn init_state(&self, uri: &str) -> SegmentState {
        let st = self.shared.state.lock();
        st.init
            .peek(uri)
            .map_or(SegmentState::NotRequested, Download::state)
    }

    /// Whether the segment at the current index sits at the trailing edge of the
    /// track: it is the last one, or it starts within `tolerance` of the duration.
    pub fn is_trailing_edge(&self, tolerance: Duration) -> bool {
        let st = self.shared.state.lock();
        let rendition = &self.shared.renditions[st.active];
        st.index + 1 >= rendition.segments.len()
            || rendition.start_of(st.index) + tolerance >= self.shared.duration
    }

    // ----------------------------
    // Decoder input
    // ----------------------------

    /// Init data for the upcoming segment, if it differs from the last one supplied.
    ///
    /// Awaits the init download when it is still in flight.
    #[instrument(skip(self))]
    pub async fn get_next_init_segment(&self) -> SegmentResult<NextInit> {
        let (rendition, uri, download) = {
            let mut st = self.shared.state.lock();
            Self::ensure_started(&st)?;
            self.prefetch_ahead(&mut st);

            let Some(source) = self.resolve_source(&st) else {
                return Ok(NextInit::EndOfTrack);
            };
            let segment = &self.shared.renditions[source].segments[st.index];
            if segment.init_uri == st.supplied_init {
                return Ok(NextInit::Unchanged);
            }
            let Some(uri) = segment.init_uri.clone() else {
                st.supplied_init = None;
                return Ok(NextInit::Unchanged);
            };
            let download = self.ensure_init(&mut st, &uri);
            (source, uri, download)
        };

        let data = match download.wait().await {
            Ok(data) => data,
            Err(e) => {
                self.shared.state.lock().init.pop(&uri);
                return Err(e);
            }
        };

        trace!(rendition, uri = %uri, "SegmentPrefetchQueue: supplying init data");
        self.shared.state.lock().supplied_init = Some(uri.clone());
        Ok(NextInit::Changed(InitPayload {
            rendition,
            uri,
            data,
        }))
    }

    /// Media payload for the current index, awaiting its download if necessary.
    ///
    /// Advances the index on success. A failed download is forgotten so the next call
    /// fetches it again.
    #[instrument(skip(self))]
    pub async fn get_next_segment_file(&self) -> SegmentResult<NextSegment> {
        let (id, segment, download, substituted) = {
            let mut st = self.shared.state.lock();
            Self::ensure_started(&st)?;
            self.prefetch_ahead(&mut st);

            let Some(source) = self.resolve_source(&st) else {
                return Ok(NextSegment::EndOfTrack);
            };
            let segment: &Segment = &self.shared.renditions[source].segments[st.index];
            if segment.init_uri != st.supplied_init {
                trace!(
                    rendition = source,
                    index = st.index,
                    "SegmentPrefetchQueue: init change required"
                );
                return Ok(NextSegment::NewInitNeeded);
            }

            let id = SegmentId {
                rendition: source,
                index: st.index,
            };
            let download = self.ensure_media(&mut st, id, &segment.uri);
            (id, segment, download, source != st.active)
        };

        let result = download.wait().await;

        let mut st = self.shared.state.lock();
        st.media.remove(&id);
        let data = result?;
        if st.index == id.index {
            st.index += 1;
            let next = st.index;
            st.media.retain(|k, _| k.index >= next);
            self.prefetch_ahead(&mut st);
        }
        drop(st);

        if substituted {
            debug!(
                rendition = id.rendition,
                index = id.index,
                "SegmentPrefetchQueue: substituted downloaded segment from another rendition"
            );
        }
        Ok(NextSegment::Media(SegmentPayload {
            id,
            uri: segment.uri.clone(),
            data,
            duration_hint: segment.duration_hint,
            substituted,
        }))
    }

    // ----------------------------
    // Internals
    // ----------------------------

    fn ensure_started(st: &PrefetchState) -> SegmentResult<()> {
        if st.started {
            Ok(())
        } else {
            Err(SegmentError::InvalidParams("prefetch queue not started"))
        }
    }

    fn resolve_rendition(&self, rendition: Option<usize>) -> usize {
        let count = self.shared.renditions.len();
        rendition
            .map(|i| i.min(count - 1))
            .or_else(|| self.shared.settings.default_rendition.resolve(count))
            .unwrap_or(0)
    }

    // Which rendition serves the current index: the active one when it is ready,
    // otherwise any other rendition whose payload and init are already downloaded
    // (highest bandwidth first), otherwise the active one (the caller will wait).
    fn resolve_source(&self, st: &PrefetchState) -> Option<usize> {
        let index = st.index;
        let active = &self.shared.renditions[st.active];
        let segment = active.segments.get(index)?;
        if self.is_ready(st, st.active, segment) {
            return Some(st.active);
        }

        let fallback = self
            .shared
            .renditions
            .iter()
            .rev()
            .filter(|r| r.index != st.active)
            .find(|r| {
                r.segments
                    .get(index)
                    .is_some_and(|s| self.is_ready(st, r.index, s))
            });
        Some(fallback.map_or(st.active, |r| r.index))
    }

    fn is_ready(&self, st: &PrefetchState, rendition: usize, segment: &Segment) -> bool {
        let id = SegmentId {
            rendition,
            index: segment.index,
        };
        let media_ready = st
            .media
            .get(&id)
            .is_some_and(|d| d.state() == SegmentState::Downloaded);
        let init_ready = match &segment.init_uri {
            None => true,
            Some(uri) if st.supplied_init.as_deref() == Some(uri.as_str()) => true,
            Some(uri) => st
                .init
                .peek(uri)
                .is_some_and(|d| d.state() == SegmentState::Downloaded),
        };
        media_ready && init_ready
    }

    // Kick off downloads for the window starting at the current index.
    fn prefetch_ahead(&self, st: &mut PrefetchState) {
        let rendition = &self.shared.renditions[st.active];
        let window = self.shared.settings.prefetch_window.max(1);
        let start = st.index.min(rendition.segments.len());
        let end = (st.index + window).min(rendition.segments.len());

        for segment in &rendition.segments[start..end] {
            if let Some(init) = &segment.init_uri {
                self.ensure_init(st, init);
            }
            let id = SegmentId {
                rendition: rendition.index,
                index: segment.index,
            };
            self.ensure_media(st, id, &segment.uri);
        }
    }

    fn ensure_media(&self, st: &mut PrefetchState, id: SegmentId, uri: &str) -> Download {
        st.media
            .entry(id)
            .or_insert_with(|| self.spawn_download(uri, "media"))
            .clone()
    }

    fn ensure_init(&self, st: &mut PrefetchState, uri: &str) -> Download {
        if let Some(existing) = st.init.get(uri) {
            return existing.clone();
        }
        let download = self.spawn_download(uri, "init");
        st.init.put(uri.to_string(), download.clone());
        download
    }

    fn spawn_download(&self, uri: &str, kind: &'static str) -> Download {
        let (tx, rx) = watch::channel(None);
        let fetcher = Arc::clone(&self.shared.fetcher);
        let cancel = self.shared.cancel.clone();
        let progress = self.shared.progress.0.clone();
        let uri = uri.to_string();

        trace!(uri = %uri, kind, "SegmentPrefetchQueue: download started");
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(SegmentError::Cancelled),
                res = fetcher.fetch(&uri, progress) => res.map_err(|e| e.for_uri(&uri)),
            };
            if let Err(e) = &result {
                if !e.is_cancelled() {
                    debug!(uri = %uri, kind, "SegmentPrefetchQueue: download failed: {}", e);
                }
            }
            tx.send_replace(Some(result));
        });

        Download { rx }
    }
}
