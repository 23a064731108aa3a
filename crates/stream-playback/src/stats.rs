//! Display-side measurements: frame rate and bitrate.

use std::time::{Duration, Instant};

use crate::frame::CoderMetadata;

/// Measures the displayed frame rate over sliding intervals.
///
/// Intervals are 2 seconds long, shortened to 500ms during the first second so a
/// value is available quickly after start.
#[derive(Debug, Clone, Default)]
pub struct FpsMeter {
    overall_start: Option<Instant>,
    interval_start: Option<Instant>,
    frames_in_interval: u64,
    frames_overall: u64,
}

impl FpsMeter {
    const INTERVAL: Duration = Duration::from_secs(2);
    const WARMUP: Duration = Duration::from_secs(1);
    const WARMUP_INTERVAL: Duration = Duration::from_millis(500);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_started(&self) -> bool {
        self.interval_start.is_some()
    }

    /// Count a displayed frame. Returns the interval rate when an interval closes.
    pub fn add_frame(&mut self, now: Instant) -> Option<f64> {
        let (overall_start, interval_start) = match (self.overall_start, self.interval_start) {
            (Some(o), Some(i)) => (o, i),
            _ => {
                self.overall_start = Some(now);
                self.interval_start = Some(now);
                (now, now)
            }
        };

        self.frames_in_interval += 1;
        self.frames_overall += 1;

        let elapsed = now.saturating_duration_since(interval_start);
        let in_warmup = now.saturating_duration_since(overall_start) <= Self::WARMUP;
        if elapsed > Self::INTERVAL || (in_warmup && elapsed > Self::WARMUP_INTERVAL) {
            let fps = rate(self.frames_in_interval, elapsed);
            self.frames_in_interval = 0;
            self.interval_start = Some(now);
            return Some(fps);
        }
        None
    }

    /// Average rate since the first counted frame.
    pub fn overall(&self, now: Instant) -> Option<f64> {
        let start = self.overall_start?;
        let elapsed = now.saturating_duration_since(start);
        (!elapsed.is_zero()).then(|| rate(self.frames_overall, elapsed))
    }
}

fn rate(frames: u64, elapsed: Duration) -> f64 {
    frames as f64 / elapsed.as_secs_f64()
}

/// Bitrate samples produced by [`BitrateMeter`], in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BitrateSample {
    /// Bitrate of the intra period that just closed.
    pub intra_period: Option<f64>,
    /// Bitrate of the group of pictures (temporal layer 0 to 0) that just closed.
    pub gop: Option<f64>,
}

/// Estimates bitrate from per-frame coded sizes: `bits * fps / frames`, closed at
/// each random access point (intra period) and each temporal-layer-0 frame (GOP).
#[derive(Debug, Clone)]
pub struct BitrateMeter {
    target_fps: f64,
    bits_in_gop: u64,
    frames_in_gop: u64,
    bits_in_ip: u64,
    frames_in_ip: u64,
}

impl BitrateMeter {
    pub fn new(target_fps: f64) -> Self {
        Self {
            target_fps,
            bits_in_gop: 0,
            frames_in_gop: 0,
            bits_in_ip: 0,
            frames_in_ip: 0,
        }
    }

    /// Restart measurement at `target_fps`.
    pub fn start(&mut self, target_fps: f64) {
        *self = Self::new(target_fps);
    }

    pub fn set_target_fps(&mut self, target_fps: f64) {
        self.target_fps = target_fps;
    }

    pub fn add_frame(&mut self, meta: &CoderMetadata) -> BitrateSample {
        let mut sample = BitrateSample::default();

        if meta.temporal_id == 0 && self.frames_in_gop > 0 {
            let frames = self.frames_in_gop as f64;
            sample.gop = Some(self.bits_in_gop as f64 * self.target_fps / frames);
            self.bits_in_gop = 0;
            self.frames_in_gop = 0;
        }

        if meta.is_random_access && self.frames_in_ip > 0 {
            sample.intra_period =
                Some(self.bits_in_ip as f64 * self.target_fps / self.frames_in_ip as f64);
            self.bits_in_ip = 0;
            self.frames_in_ip = 0;
        }

        self.frames_in_gop += 1;
        self.frames_in_ip += 1;
        self.bits_in_gop += meta.bits;
        self.bits_in_ip += meta.bits;
        sample
    }
}
