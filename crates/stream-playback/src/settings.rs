//! Configuration for the playback pipeline.
//!
//! Included configuration domains:
//! - Frame queue depth and credit policy
//! - Pacing (default frame rate, free-running tick interval, unpaced mode)
//! - Session lifecycle (producer exit timeout, trailing-edge tolerance)
//! - Segment fetching, forwarded to `stream-playback-segments`

use std::fmt;
use std::time::Duration;

use stream_playback_segments::SegmentSettings;

/// Unified settings for a [`crate::PlaybackController`].
#[derive(Clone, PartialEq)]
pub struct PlaybackSettings {
    // ----------------------------
    // Frame queue
    // ----------------------------
    /// Queue depth the pipeline starts each session with.
    /// Default: 4 frames.
    pub initial_target_depth: usize,

    /// Upper bound for the adaptive target depth.
    /// Default: 32 frames.
    pub max_depth: usize,

    /// Maximum number of credits granted to the producer but not yet answered.
    /// Default: 10.
    pub max_outstanding_credits: usize,

    // ----------------------------
    // Pacing
    // ----------------------------
    /// Frame rate used until the track reports its own.
    /// Default: 50.0 fps.
    pub default_fps: f64,

    /// Display every frame as soon as it arrives instead of pacing to the frame rate.
    /// Default: false.
    pub ignore_target_fps: bool,

    /// Period of the free-running tick driver used by [`crate::PlaybackController::run`].
    /// Default: 16ms.
    pub tick_interval: Duration,

    // ----------------------------
    // Session lifecycle
    // ----------------------------
    /// How long a new session waits for the previous producer to exit.
    /// Default: 2 seconds.
    pub session_exit_timeout: Duration,

    /// A segment fetch failure starting this close to the end of the track is
    /// treated as a missing last segment instead of an error.
    /// Default: 1 second.
    pub trailing_edge_tolerance: Duration,

    /// Capacity of the broadcast channel carrying [`crate::PlayerEvent`]s.
    /// Default: 64.
    pub event_channel_capacity: usize,

    // ----------------------------
    // Segments
    // ----------------------------
    pub segments: SegmentSettings,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            initial_target_depth: 4,
            max_depth: 32,
            max_outstanding_credits: 10,

            default_fps: Self::DEFAULT_FPS,
            ignore_target_fps: false,
            tick_interval: Duration::from_millis(16),

            session_exit_timeout: Duration::from_secs(2),
            trailing_edge_tolerance: Duration::from_secs(1),
            event_channel_capacity: 64,

            segments: SegmentSettings::default(),
        }
    }
}

impl fmt::Debug for PlaybackSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackSettings")
            // Queue
            .field("initial_target_depth", &self.initial_target_depth)
            .field("max_depth", &self.max_depth)
            .field("max_outstanding_credits", &self.max_outstanding_credits)
            // Pacing
            .field("default_fps", &self.default_fps)
            .field("ignore_target_fps", &self.ignore_target_fps)
            .field("tick_interval", &self.tick_interval)
            // Session
            .field("session_exit_timeout", &self.session_exit_timeout)
            .field("trailing_edge_tolerance", &self.trailing_edge_tolerance)
            .field("event_channel_capacity", &self.event_channel_capacity)
            .field("segments", &self.segments)
            .finish()
    }
}

impl PlaybackSettings {
    /// Frame rate assumed when neither the settings nor the track provide one.
    pub const DEFAULT_FPS: f64 = 50.0;

    // -------------------------
    // Constructors
    // -------------------------

    /// Create default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shallow queue for interactive sources.
    /// - Small initial depth
    /// - Low growth cap
    pub fn low_latency(mut self) -> Self {
        self.initial_target_depth = 2;
        self.max_depth = 8;
        self.max_outstanding_credits = 4;
        self
    }

    /// Fixed, deep queue that never grows after an underrun.
    pub fn without_depth_growth(mut self) -> Self {
        self.initial_target_depth = 33;
        self.max_depth = 33;
        self
    }

    // -------------------------
    // Queue setters
    // -------------------------

    /// Clamped to `1..=max_depth`.
    pub fn initial_target_depth(mut self, v: usize) -> Self {
        self.initial_target_depth = v.clamp(1, self.max_depth.max(1));
        self
    }

    /// Raises `initial_target_depth` bound accordingly; never below 1.
    pub fn max_depth(mut self, v: usize) -> Self {
        self.max_depth = v.max(1);
        self.initial_target_depth = self.initial_target_depth.min(self.max_depth);
        self
    }

    pub fn max_outstanding_credits(mut self, v: usize) -> Self {
        self.max_outstanding_credits = v.max(1);
        self
    }

    // -------------------------
    // Pacing setters
    // -------------------------

    /// Non-positive or non-finite rates are ignored.
    pub fn default_fps(mut self, v: f64) -> Self {
        if v.is_finite() && v > 0.0 {
            self.default_fps = v;
        }
        self
    }

    pub fn ignore_target_fps(mut self, v: bool) -> Self {
        self.ignore_target_fps = v;
        self
    }

    pub fn tick_interval(mut self, v: Duration) -> Self {
        self.tick_interval = v;
        self
    }

    // -------------------------
    // Session setters
    // -------------------------

    pub fn session_exit_timeout(mut self, v: Duration) -> Self {
        self.session_exit_timeout = v;
        self
    }

    pub fn trailing_edge_tolerance(mut self, v: Duration) -> Self {
        self.trailing_edge_tolerance = v;
        self
    }

    pub fn event_channel_capacity(mut self, v: usize) -> Self {
        self.event_channel_capacity = v.max(1);
        self
    }

    pub fn segments(mut self, v: SegmentSettings) -> Self {
        self.segments = v;
        self
    }
}
