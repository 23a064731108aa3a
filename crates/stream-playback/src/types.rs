//! Public value types of the playback API.

use std::sync::Arc;
use std::time::Duration;

use stream_playback_segments::{FetchProgress, Fetcher, Resolution, SegmentPrefetchQueue};

/// Playback lifecycle status.
///
/// `Stopped` is both the initial state and the terminal state of each session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Container-level track information reported by a producer.
///
/// Every field is optional; producers report what they know, possibly in several
/// steps.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackMetadata {
    pub duration: Option<Duration>,
    pub frame_rate: Option<f64>,
    pub num_frames: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl TrackMetadata {
    /// Overlay the fields `other` knows about.
    pub fn merge(&mut self, other: &TrackMetadata) {
        self.duration = other.duration.or(self.duration);
        self.frame_rate = other.frame_rate.or(self.frame_rate);
        self.num_frames = other.num_frames.or(self.num_frames);
        self.width = other.width.or(self.width);
        self.height = other.height.or(self.height);
    }
}

/// Metadata surfaced to the application whenever it is discovered or changes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MetadataUpdate {
    pub duration: Option<Duration>,
    pub frame_rate: Option<f64>,
    pub num_frames: Option<u64>,
    pub track_width: Option<u32>,
    pub track_height: Option<u32>,
}

/// Display statistics, published roughly every two seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameStats {
    pub fps: f64,
    /// Intra-period bitrate in bits per second, when coder metadata is available.
    pub bitrate: Option<f64>,
    pub target_depth: usize,
}

/// Description of a selectable rendition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionInfo {
    pub index: usize,
    pub bandwidth: u64,
    pub resolution: Option<Resolution>,
    pub name: Option<String>,
}

/// Events published by [`crate::PlaybackController`] on its broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StatusChanged(PlaybackStatus),
    Metadata(MetadataUpdate),
    RenditionChanged { index: usize },
    /// The queue underran and is refilling to a (possibly larger) target.
    Buffering { target_depth: usize },
    DownloadProgress(FetchProgress),
    Stats(FrameStats),
    /// The session restarted from the beginning.
    Looped,
    EndOfStream,
    /// A user-visible error; playback has stopped or the request was refused.
    Error(String),
}

/// What [`crate::PlaybackController::play`] should open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// A single media file, decoded as a whole.
    File(String),
    /// An adaptive manifest whose segments go through the prefetch queue.
    Manifest(String),
}

impl MediaSource {
    /// Classify a URI by extension: `.m3u8` and `.mpd` are manifests.
    ///
    /// The controller parses manifests as HLS by default; playing an `.mpd` needs a DASH
    /// [`ManifestParser`](stream_playback_segments::ManifestParser) supplied through
    /// [`crate::PlaybackController::with_manifest_parser`].
    pub fn from_uri(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let path = uri.split(['?', '#']).next().unwrap_or_default();
        if path.ends_with(".m3u8") || path.ends_with(".mpd") {
            MediaSource::Manifest(uri)
        } else {
            MediaSource::File(uri)
        }
    }

    pub fn uri(&self) -> &str {
        match self {
            MediaSource::File(uri) | MediaSource::Manifest(uri) => uri,
        }
    }
}

/// Options for a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlayOptions {
    /// Restart from the beginning on end of stream.
    pub looping: bool,
    /// Rendition to start with; `None` uses the configured default.
    pub rendition: Option<usize>,
}

impl PlayOptions {
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn rendition(mut self, rendition: Option<usize>) -> Self {
        self.rendition = rendition;
        self
    }
}

/// Input handed to a [`crate::FrameProducer`].
#[derive(Clone)]
pub enum DecodeSource {
    /// Fetch `uri` through `fetcher` and decode it.
    File {
        uri: String,
        fetcher: Arc<dyn Fetcher>,
    },
    /// Pull init and media payloads from the prefetch queue.
    Segmented(SegmentPrefetchQueue),
}

impl std::fmt::Debug for DecodeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeSource::File { uri, .. } => f.debug_struct("File").field("uri", uri).finish(),
            DecodeSource::Segmented(queue) => f.debug_tuple("Segmented").field(queue).finish(),
        }
    }
}
