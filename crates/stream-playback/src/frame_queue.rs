//! Credit-based frame queue.
//!
//! Sits between the credit channel and the pacing scheduler. It owns the only place
//! where credits are created ([`FrameQueue::request_frames`]): a credit is granted
//! while
//!
//! ```text
//! outstanding < max_outstanding && queue.len() + outstanding < target_depth
//! ```
//!
//! so the producer never holds more permission than the queue can absorb.
//!
//! Every underrun grows `target_depth` by half (capped at `max_depth`). The depth
//! never shrinks for the rest of the session.

use std::collections::VecDeque;

use tracing::{debug, error, trace, warn};

use crate::credit::CreditSender;
use crate::frame::Frame;
use crate::settings::PlaybackSettings;

/// Where the queue sends credits and released frames.
pub trait CreditLink {
    fn grant_credit(&mut self);
    fn release_frame(&mut self, frame: Frame);
}

impl CreditLink for CreditSender {
    fn grant_credit(&mut self) {
        CreditSender::grant_credit(self);
    }

    fn release_frame(&mut self, frame: Frame) {
        CreditSender::release_frame(self, frame);
    }
}

/// An item delivered by the producer.
#[derive(Debug)]
pub enum QueueItem {
    Frame(Frame),
    /// Unsolicited: does not answer a credit.
    EndOfStream,
}

/// Result of [`FrameQueue::take`].
#[derive(Debug)]
pub enum Take {
    Frame(Frame),
    EndOfStream,
    /// Nothing to display yet; the queue is refilling.
    Buffering,
}

/// Bounded FIFO of decoded frames with an adaptive target depth.
#[derive(Debug)]
pub struct FrameQueue<L = CreditSender> {
    link: L,
    queue: VecDeque<QueueItem>,
    target_depth: usize,
    max_depth: usize,
    outstanding: usize,
    max_outstanding: usize,
    buffering: bool,
    accounting_errors: u64,
    underruns: u64,
}

impl<L: CreditLink> FrameQueue<L> {
    pub fn new(link: L, settings: &PlaybackSettings) -> Self {
        Self::with_limits(
            link,
            settings.initial_target_depth,
            settings.max_depth,
            settings.max_outstanding_credits,
        )
    }

    /// `target_depth` is clamped to `1..=max_depth`.
    pub fn with_limits(
        link: L,
        target_depth: usize,
        max_depth: usize,
        max_outstanding: usize,
    ) -> Self {
        let max_depth = max_depth.max(1);
        Self {
            link,
            queue: VecDeque::with_capacity(max_depth + 1),
            target_depth: target_depth.clamp(1, max_depth),
            max_depth,
            outstanding: 0,
            max_outstanding: max_outstanding.max(1),
            // Nothing may be displayed before the first fill.
            buffering: true,
            accounting_errors: 0,
            underruns: 0,
        }
    }

    // ----------------------------
    // Accessors
    // ----------------------------

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.target_depth
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    pub fn target_depth(&self) -> usize {
        self.target_depth
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Credits granted and not yet answered by a frame.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Number of credit-accounting violations observed so far.
    pub fn accounting_errors(&self) -> u64 {
        self.accounting_errors
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    // ----------------------------
    // Operations
    // ----------------------------

    /// Enter buffering mode and grant credits up to policy.
    ///
    /// A queue already holding the end-of-stream marker does not buffer: nothing more
    /// will arrive to fill it.
    pub fn start(&mut self) {
        self.enter_buffering();
        self.request_frames();
    }

    /// Accept one item from the producer.
    ///
    /// A frame that arrives while the queue already holds more than `target_depth`
    /// items, or without an outstanding credit, is a credit-accounting bug: it is
    /// logged and counted, and the frame is still queued.
    pub fn push(&mut self, item: QueueItem) {
        if self.queue.len() > self.target_depth {
            self.accounting_errors += 1;
            error!(
                len = self.queue.len(),
                target_depth = self.target_depth,
                "FrameQueue: queue longer than its target depth"
            );
        }

        let is_end = matches!(item, QueueItem::EndOfStream);
        if !is_end {
            match self.outstanding.checked_sub(1) {
                Some(left) => self.outstanding = left,
                None => {
                    self.accounting_errors += 1;
                    error!("FrameQueue: frame received without an outstanding credit");
                }
            }
        }
        self.queue.push_back(item);

        self.request_frames();

        if is_end || self.is_full() {
            self.buffering = false;
        }
    }

    /// Next item for display. Never waits.
    ///
    /// While buffering only an end-of-stream marker at the head is handed out. An
    /// empty queue outside buffering is an underrun and starts buffering.
    pub fn take(&mut self) -> Take {
        if self.buffering {
            if matches!(self.queue.front(), Some(QueueItem::EndOfStream)) {
                self.queue.pop_front();
                return Take::EndOfStream;
            }
            self.request_frames();
            return Take::Buffering;
        }

        match self.queue.pop_front() {
            Some(item) => {
                self.request_frames();
                match item {
                    QueueItem::Frame(frame) => Take::Frame(frame),
                    QueueItem::EndOfStream => Take::EndOfStream,
                }
            }
            None => {
                self.underruns += 1;
                warn!(
                    target_depth = self.target_depth,
                    "FrameQueue: underrun, no frame to display"
                );
                self.start_buffering();
                Take::Buffering
            }
        }
    }

    /// Enter buffering mode and grow the target depth to
    /// `min(max_depth, floor(target_depth * 1.5))`.
    pub fn start_buffering(&mut self) {
        self.enter_buffering();

        let grown = (self.target_depth * 3 / 2).min(self.max_depth);
        if grown > self.target_depth {
            debug!(
                from = self.target_depth,
                to = grown,
                "FrameQueue: buffering, target depth raised"
            );
            self.target_depth = grown;
        } else {
            debug!(target_depth = self.target_depth, "FrameQueue: buffering");
        }

        self.request_frames();
    }

    /// Hand a displayed frame back to the producer.
    pub fn release(&mut self, frame: Frame) {
        self.link.release_frame(frame);
    }

    /// Release every queued frame to the producer and forget outstanding credits.
    ///
    /// Returns the number of frames released. No credits are granted here.
    pub fn clear(&mut self, warn_if_non_empty: bool) -> usize {
        if warn_if_non_empty && !self.queue.is_empty() {
            warn!(len = self.queue.len(), "FrameQueue: clearing a non-empty queue");
        }

        let mut released = 0;
        for item in self.queue.drain(..) {
            if let QueueItem::Frame(frame) = item {
                self.link.release_frame(frame);
                released += 1;
            }
        }
        self.outstanding = 0;
        released
    }

    /// Swap the credit link for a new producer session, returning the old one.
    ///
    /// The queue is cleared (frames go back to the old link) and buffering restarts
    /// against the new link; the adaptive target depth is kept.
    pub fn reconnect(&mut self, link: L) -> L {
        self.clear(false);
        let old = std::mem::replace(&mut self.link, link);
        self.enter_buffering();
        old
    }

    fn enter_buffering(&mut self) {
        self.buffering = !self
            .queue
            .iter()
            .any(|item| matches!(item, QueueItem::EndOfStream));
    }

    // Sole creator of credits.
    fn request_frames(&mut self) {
        while self.outstanding < self.max_outstanding
            && self.queue.len() + self.outstanding < self.target_depth
        {
            self.link.grant_credit();
            self.outstanding += 1;
            trace!(
                outstanding = self.outstanding,
                len = self.queue.len(),
                "FrameQueue: credit granted"
            );
        }

        if self.is_full() {
            self.buffering = false;
        }
    }
}
