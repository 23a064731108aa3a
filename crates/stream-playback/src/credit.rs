//! Credit channel between the consumer side and a frame producer.
//!
//! The consumer grants *credits*; each credit allows the producer to emit exactly one
//! frame. A producer without credit suspends in [`ProducerHandle::acquire_credit`]
//! until the consumer grants one or requests a stop.
//!
//! Two unbounded `mpsc` channels carry the traffic:
//! - consumer -> producer: credits, stop requests and released frames (for reuse),
//! - producer -> consumer: [`ProducerEvent`]s.
//!
//! Memory stays bounded because frames only flow against credits, and credits are only
//! created by [`crate::FrameQueue`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use stream_playback_segments::{FetchProgress, ProgressCallback};
use tokio::sync::mpsc;
use tracing::{error, trace};

use crate::error::{PlaybackError, PlaybackResult, ProducerFailure};
use crate::frame::{Frame, Plane};
use crate::types::TrackMetadata;

/// Messages from the producer to the consumer.
#[derive(Debug)]
pub enum ProducerEvent {
    /// The producer began decoding.
    Started,
    /// Track metadata was discovered or changed.
    Metadata(TrackMetadata),
    /// One frame, answering one credit.
    Frame(Frame),
    /// Input exhausted or stop honoured. Emitted exactly once per session.
    EndOfStream,
    /// Download progress of a file source.
    DownloadProgress(FetchProgress),
    /// Non-recoverable failure; no further frames follow.
    Failed(ProducerFailure),
    /// The producer task is gone.
    Exited,
}

/// Outcome of waiting for a credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    /// One frame may be emitted.
    Granted,
    /// The consumer asked the producer to stop; no credit will come.
    Stopped,
}

#[derive(Debug)]
enum ProducerCommand {
    Grant,
    Stop,
    Release(Vec<Plane>),
}

/// Consumer-side sending half: grants credits, requests stop, returns frames.
#[derive(Debug, Clone)]
pub struct CreditSender {
    commands: mpsc::UnboundedSender<ProducerCommand>,
    stop: Arc<AtomicBool>,
}

/// Consumer-side receiving half.
#[derive(Debug)]
pub struct ProducerEvents {
    events: mpsc::UnboundedReceiver<ProducerEvent>,
}

/// Producer-side endpoint.
///
/// Dropping the handle emits [`ProducerEvent::EndOfStream`] (unless already sent)
/// followed by [`ProducerEvent::Exited`].
#[derive(Debug)]
pub struct ProducerHandle {
    commands: mpsc::UnboundedReceiver<ProducerCommand>,
    events: mpsc::UnboundedSender<ProducerEvent>,
    stop: Arc<AtomicBool>,
    // Credits received but not yet claimed through `acquire_credit`.
    available: usize,
    // Credits claimed but not yet answered with a frame.
    claimed: usize,
    recycled: Vec<Vec<Plane>>,
    end_of_stream_sent: bool,
}

/// Create a connected credit channel.
pub fn credit_channel() -> (CreditSender, ProducerEvents, ProducerHandle) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let stop = Arc::new(AtomicBool::new(false));

    (
        CreditSender {
            commands: command_tx,
            stop: Arc::clone(&stop),
        },
        ProducerEvents { events: event_rx },
        ProducerHandle {
            commands: command_rx,
            events: event_tx,
            stop,
            available: 0,
            claimed: 0,
            recycled: Vec::new(),
            end_of_stream_sent: false,
        },
    )
}

impl CreditSender {
    /// Allow the producer to emit one more frame.
    pub fn grant_credit(&self) {
        if self.commands.send(ProducerCommand::Grant).is_err() {
            trace!("CreditSender: credit granted to a producer that is gone");
        }
    }

    /// Ask the producer to stop and wake it if it is waiting for a credit.
    ///
    /// The flag is visible to [`ProducerHandle::is_stop_requested`] immediately.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        let _ = self.commands.send(ProducerCommand::Stop);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Return a displayed or discarded frame so its buffers can be reused.
    pub fn release_frame(&self, frame: Frame) {
        // A producer that already exited simply drops the buffers.
        let _ = self
            .commands
            .send(ProducerCommand::Release(frame.into_planes()));
    }
}

impl ProducerEvents {
    /// Next event if one is pending. Never waits.
    pub fn try_next(&mut self) -> Option<ProducerEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the next event. `None` once the producer side is gone and drained.
    pub async fn next(&mut self) -> Option<ProducerEvent> {
        self.events.recv().await
    }
}

impl ProducerHandle {
    /// Suspend until a credit is available or a stop is requested.
    pub async fn acquire_credit(&mut self) -> CreditOutcome {
        loop {
            self.drain_commands();
            if self.stop.load(Ordering::Acquire) {
                return CreditOutcome::Stopped;
            }
            if self.available > 0 {
                self.available -= 1;
                self.claimed += 1;
                return CreditOutcome::Granted;
            }
            match self.commands.recv().await {
                Some(command) => self.apply(command),
                // Consumer gone: nobody will ever grant again.
                None => self.stop.store(true, Ordering::Release),
            }
        }
    }

    /// Stop flag check for the producer's natural yield points. Never waits.
    pub fn is_stop_requested(&mut self) -> bool {
        self.drain_commands();
        self.stop.load(Ordering::Acquire)
    }

    /// Plane buffers of a released frame, if any are waiting for reuse.
    pub fn recycled_planes(&mut self) -> Option<Vec<Plane>> {
        self.drain_commands();
        self.recycled.pop()
    }

    /// Credits granted but not yet claimed.
    pub fn available_credits(&mut self) -> usize {
        self.drain_commands();
        self.available
    }

    /// Emit a frame against a credit obtained from [`acquire_credit`](Self::acquire_credit).
    ///
    /// A frame without a claimed credit is refused with
    /// [`PlaybackError::CreditViolation`] and its buffers are kept for reuse.
    pub fn emit_frame(&mut self, frame: Frame) -> PlaybackResult<()> {
        if self.claimed == 0 {
            error!(
                sequence = frame.sequence,
                "ProducerHandle: frame emitted without a granted credit"
            );
            self.recycled.push(frame.into_planes());
            return Err(PlaybackError::CreditViolation);
        }
        self.claimed -= 1;
        self.send(ProducerEvent::Frame(frame))
    }

    pub fn emit_started(&mut self) -> PlaybackResult<()> {
        self.send(ProducerEvent::Started)
    }

    pub fn emit_metadata(&mut self, metadata: TrackMetadata) -> PlaybackResult<()> {
        self.send(ProducerEvent::Metadata(metadata))
    }

    /// Signal end of input. Later calls (and the drop) do not repeat it.
    pub fn emit_end_of_stream(&mut self) -> PlaybackResult<()> {
        if self.end_of_stream_sent {
            return Ok(());
        }
        self.end_of_stream_sent = true;
        self.send(ProducerEvent::EndOfStream)
    }

    pub fn fail(&mut self, failure: ProducerFailure) -> PlaybackResult<()> {
        self.send(ProducerEvent::Failed(failure))
    }

    /// Progress callback relaying fetch progress as [`ProducerEvent::DownloadProgress`].
    pub fn progress_callback(&self) -> ProgressCallback {
        let events = self.events.clone();
        Arc::new(move |progress| {
            let _ = events.send(ProducerEvent::DownloadProgress(progress));
        })
    }

    fn send(&self, event: ProducerEvent) -> PlaybackResult<()> {
        self.events
            .send(event)
            .map_err(|_| PlaybackError::ChannelClosed)
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: ProducerCommand) {
        match command {
            ProducerCommand::Grant => {
                // Grants that race a stop are discarded.
                if !self.stop.load(Ordering::Acquire) {
                    self.available += 1;
                }
            }
            ProducerCommand::Stop => self.stop.store(true, Ordering::Release),
            ProducerCommand::Release(planes) => self.recycled.push(planes),
        }
    }
}

impl Drop for ProducerHandle {
    fn drop(&mut self) {
        if !self.end_of_stream_sent {
            let _ = self.events.send(ProducerEvent::EndOfStream);
        }
        let _ = self.events.send(ProducerEvent::Exited);
    }
}
