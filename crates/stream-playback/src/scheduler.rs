//! Pacing scheduler.
//!
//! Turns a target frame rate into display deadlines. Deadlines are computed from a
//! *pin* (the instant the first frame after a stall was shown) and the number of
//! frames shown since, never from the previous tick:
//!
//! ```text
//! deadline = pin + frames_since_pin / target_fps
//! ```
//!
//! The scheduler is a plain state machine. It does not own a timer: the caller
//! invokes [`PacingScheduler::on_tick`] from whatever drives it (display refresh or
//! [`crate::PlaybackController::run`]) and passes the display step as a closure.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::settings::PlaybackSettings;

/// Lifecycle of the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchedulerState {
    #[default]
    Idle,
    Running,
    Buffering,
    Stopped,
}

/// What the display step reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Displayed,
    Buffering,
    EndOfStream,
    /// Playback status is no longer `Playing`.
    NotPlaying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    NotPlaying,
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No tick is scheduled; nothing happened.
    NotScheduled,
    /// Too early for the next frame.
    NotYet { deadline: Instant },
    /// Same timestamp as the previous tick; ignored.
    Duplicate,
    Displayed,
    Buffering,
    /// Future ticks are unscheduled.
    Stopped(StopReason),
}

/// Result of [`PacingScheduler::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Same rate and a tick is already scheduled.
    AlreadyRunning,
    Scheduled,
    /// "As fast as possible" mode: the caller should run a display step right away.
    RunImmediately,
}

#[derive(Debug)]
pub struct PacingScheduler {
    target_fps: f64,
    ignore_target_fps: bool,
    pin: Option<Instant>,
    frames_since_pin: u64,
    prev_tick: Option<Instant>,
    scheduled: bool,
    state: SchedulerState,
}

impl PacingScheduler {
    pub fn new(target_fps: f64, ignore_target_fps: bool) -> Self {
        Self {
            target_fps: sanitize_fps(target_fps).unwrap_or(PlaybackSettings::DEFAULT_FPS),
            ignore_target_fps,
            pin: None,
            frames_since_pin: 0,
            prev_tick: None,
            scheduled: false,
            state: SchedulerState::Idle,
        }
    }

    pub fn from_settings(settings: &PlaybackSettings) -> Self {
        Self::new(settings.default_fps, settings.ignore_target_fps)
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    pub fn is_pinned(&self) -> bool {
        self.pin.is_some()
    }

    pub fn frames_since_pin(&self) -> u64 {
        self.frames_since_pin
    }

    pub fn ignores_target_fps(&self) -> bool {
        self.ignore_target_fps
    }

    /// Deadline of the next frame, if pinned.
    pub fn next_deadline(&self) -> Option<Instant> {
        let pin = self.pin?;
        let offset = Duration::from_secs_f64(self.frames_since_pin as f64 / self.target_fps);
        Some(pin + offset)
    }

    /// (Re)start pacing, optionally at a new rate.
    ///
    /// Repeating a start with the rate already in effect while a tick is scheduled is
    /// a no-op, so duplicate metadata events do not reset pacing.
    pub fn start(&mut self, target_fps: Option<f64>) -> StartOutcome {
        let target_fps = target_fps.and_then(sanitize_fps);

        if self.scheduled && target_fps == Some(self.target_fps) {
            trace!(fps = self.target_fps, "PacingScheduler: already running");
            return StartOutcome::AlreadyRunning;
        }

        if let Some(fps) = target_fps {
            if fps != self.target_fps {
                debug!(from = self.target_fps, to = fps, "PacingScheduler: target fps changed");
            }
            self.target_fps = fps;
        }
        self.unpin();
        self.state = SchedulerState::Running;

        if self.ignore_target_fps {
            self.scheduled = false;
            StartOutcome::RunImmediately
        } else {
            self.scheduled = true;
            StartOutcome::Scheduled
        }
    }

    /// Unschedule ticks. The pin is dropped.
    pub fn stop(&mut self) {
        if self.state != SchedulerState::Stopped {
            debug!("PacingScheduler: stopped");
        }
        self.scheduled = false;
        self.state = SchedulerState::Stopped;
        self.unpin();
    }

    /// One scheduled tick.
    ///
    /// `step` is invoked at most once, and only when a frame is due.
    pub fn on_tick<F>(&mut self, now: Instant, step: F) -> TickOutcome
    where
        F: FnOnce() -> StepOutcome,
    {
        if !self.scheduled {
            return TickOutcome::NotScheduled;
        }

        if let Some(deadline) = self.next_deadline() {
            if now < deadline {
                return TickOutcome::NotYet { deadline };
            }
        }

        if self.prev_tick == Some(now) {
            return TickOutcome::Duplicate;
        }
        self.prev_tick = Some(now);

        self.complete(now, step())
    }

    /// Display step outside the tick cadence, used when target fps is ignored.
    ///
    /// Skips the pacing gate. Does nothing unless the scheduler has been started.
    pub fn step_now<F>(&mut self, now: Instant, step: F) -> TickOutcome
    where
        F: FnOnce() -> StepOutcome,
    {
        match self.state {
            SchedulerState::Idle | SchedulerState::Stopped => TickOutcome::NotScheduled,
            SchedulerState::Running | SchedulerState::Buffering => self.complete(now, step()),
        }
    }

    fn complete(&mut self, now: Instant, outcome: StepOutcome) -> TickOutcome {
        match outcome {
            StepOutcome::EndOfStream => {
                self.stop();
                TickOutcome::Stopped(StopReason::EndOfStream)
            }
            StepOutcome::NotPlaying => {
                self.stop();
                TickOutcome::Stopped(StopReason::NotPlaying)
            }
            StepOutcome::Buffering => {
                if self.state != SchedulerState::Buffering {
                    trace!("PacingScheduler: buffering, pacing history dropped");
                }
                self.unpin();
                self.state = SchedulerState::Buffering;
                TickOutcome::Buffering
            }
            StepOutcome::Displayed => {
                if self.pin.is_none() {
                    self.pin = Some(now);
                }
                self.frames_since_pin += 1;
                self.state = SchedulerState::Running;
                TickOutcome::Displayed
            }
        }
    }

    fn unpin(&mut self) {
        self.pin = None;
        self.frames_since_pin = 0;
    }
}

fn sanitize_fps(fps: f64) -> Option<f64> {
    (fps.is_finite() && fps > 0.0).then_some(fps)
}
