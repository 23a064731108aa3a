//! Flow control between a video decoder and a display sink.
//!
//! Decoded frames travel one way (producer -> frame queue -> pacing scheduler ->
//! render sink) and permission to decode travels the other way as credits. The
//! producer never holds more credits than the queue can absorb, so memory in flight
//! stays bounded whatever the decoder's jitter.
//!
//! This crate is composed of several modules:
//! - `credit`: the credit channel between the consumer side and a producer task.
//! - `frame_queue`: [`FrameQueue`], the bounded buffer with adaptive target depth.
//! - `scheduler`: [`PacingScheduler`], frame-rate pacing with drift-free deadlines.
//! - `controller`: [`PlaybackController`], the play / pause / resume / stop lifecycle.
//! - `traits`: the [`FrameProducer`] and [`RenderSink`] seams.
//! - `stats`: displayed frame rate and bitrate measurement.
//! - `frame`, `types`: frames and the public value types.
//! - `settings`, `error`: configuration and the unified error type.
//!
//! Segmented (adaptive) input lives in `stream-playback-segments`, re-exported as
//! [`segments`].

mod controller;
mod credit;
mod error;
mod frame;
mod frame_queue;
mod scheduler;
mod settings;
mod stats;
mod traits;
mod types;

pub use stream_playback_segments as segments;

pub use crate::controller::PlaybackController;
pub use crate::credit::{
    CreditOutcome, CreditSender, ProducerEvent, ProducerEvents, ProducerHandle, credit_channel,
};
pub use crate::error::{PlaybackError, PlaybackResult, ProducerFailure};
pub use crate::frame::{CoderMetadata, Frame, Plane, SliceType};
pub use crate::frame_queue::{CreditLink, FrameQueue, QueueItem, Take};
pub use crate::scheduler::{
    PacingScheduler, SchedulerState, StartOutcome, StepOutcome, StopReason, TickOutcome,
};
pub use crate::settings::PlaybackSettings;
pub use crate::stats::{BitrateMeter, BitrateSample, FpsMeter};
pub use crate::traits::{FrameProducer, RenderSink};
pub use crate::types::{
    DecodeSource, FrameStats, MediaSource, MetadataUpdate, PlayOptions, PlaybackStatus,
    PlayerEvent, RenditionInfo, TrackMetadata,
};
