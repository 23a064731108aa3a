//! Decoded frames as they travel from the producer to the render sink.
//!
//! A [`Frame`] is not `Clone`: exactly one component owns it at a time, and it is
//! handed back to the producer (see [`crate::CreditSender::release_frame`]) once displayed.

use std::fmt;
use std::time::Duration;

/// One plane of pixel data.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    /// Bytes per row.
    pub stride: usize,
}

impl fmt::Debug for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plane")
            .field("len", &self.data.len())
            .field("stride", &self.stride)
            .finish()
    }
}

/// Picture coding type of the slice(s) making up a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    B,
    P,
    I,
}

/// Coder side information attached to a frame, used for diagnostics such as
/// bitrate measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoderMetadata {
    pub temporal_id: u8,
    /// Random access point (the frame starts a new intra period).
    pub is_random_access: bool,
    pub slice_type: SliceType,
    /// Coded size of the frame in bits.
    pub bits: u64,
}

/// A decoded picture.
pub struct Frame {
    pub planes: Vec<Plane>,
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    /// Presentation timestamp; absent for untimed sources.
    pub timestamp: Option<Duration>,
    /// Monotonic per-session sequence number assigned by the producer.
    pub sequence: u64,
    pub extra: Option<CoderMetadata>,
}

impl Frame {
    pub fn new(planes: Vec<Plane>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            planes,
            width,
            height,
            bit_depth: 8,
            timestamp: None,
            sequence,
            extra: None,
        }
    }

    pub fn with_bit_depth(mut self, bit_depth: u8) -> Self {
        self.bit_depth = bit_depth;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_extra(mut self, extra: CoderMetadata) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Give up the frame and keep its plane allocations for reuse.
    pub fn into_planes(self) -> Vec<Plane> {
        self.planes
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bit_depth", &self.bit_depth)
            .field("timestamp", &self.timestamp)
            .field("planes", &self.planes.len())
            .field("extra", &self.extra)
            .finish()
    }
}
