//! Pure data types describing a segmented source.
//!
//! No networking here. A [`Manifest`] is what a [`crate::ManifestParser`] produces;
//! the prefetch queue only relies on the shape of [`Rendition`] and [`Segment`].

use std::time::Duration;

/// Pixel dimensions advertised for a rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// One time-bounded chunk of a rendition's media.
///
/// The download state and payload of a segment live in the prefetch queue, see
/// [`crate::SegmentState`].
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Position within the rendition (0-based).
    pub index: usize,
    /// Absolute URI of the media payload.
    pub uri: String,
    /// Absolute URI of the initialization data this segment needs, if any.
    pub init_uri: Option<String>,
    /// Advertised duration of the segment.
    pub duration_hint: Duration,
}

/// One quality/bitrate variant of the track.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendition {
    /// Position after sorting by ascending bandwidth.
    pub index: usize,
    /// Position in the source manifest before sorting.
    pub playlist_index: usize,
    /// Advertised bandwidth in bits per second.
    pub bandwidth: u64,
    pub resolution: Option<Resolution>,
    /// Optional human-readable name (e.g., "720p").
    pub name: Option<String>,
    pub segments: Vec<Segment>,
}

impl Rendition {
    /// Sum of the segment duration hints.
    pub fn total_duration(&self) -> Duration {
        self.segments.iter().map(|s| s.duration_hint).sum()
    }

    /// Media time at which segment `index` starts.
    pub fn start_of(&self, index: usize) -> Duration {
        self.segments
            .iter()
            .take(index)
            .map(|s| s.duration_hint)
            .sum()
    }
}

/// Everything the playback pipeline needs from a parsed manifest.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Manifest {
    pub renditions: Vec<Rendition>,
    /// Presentation duration declared by the manifest, if any.
    pub duration: Option<Duration>,
}

impl Manifest {
    /// Sort renditions by ascending bandwidth and renumber [`Rendition::index`].
    ///
    /// The sort is stable, so renditions with equal bandwidth keep manifest order.
    pub fn sorted_by_bandwidth(mut self) -> Self {
        self.renditions.sort_by_key(|r| r.bandwidth);
        for (index, rendition) in self.renditions.iter_mut().enumerate() {
            rendition.index = index;
        }
        self
    }

    /// Declared duration, falling back to the longest rendition.
    pub fn effective_duration(&self) -> Duration {
        self.duration.unwrap_or_else(|| {
            self.renditions
                .iter()
                .map(Rendition::total_duration)
                .max()
                .unwrap_or_default()
        })
    }
}

/// Policy for the rendition used when nothing was requested explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenditionChoice {
    Lowest,
    /// `floor(len / 2)` of the bandwidth-sorted list.
    #[default]
    Middle,
    Highest,
    /// A fixed index, clamped to the available range.
    Index(usize),
}

impl RenditionChoice {
    /// Resolve against `count` renditions. Returns `None` when `count == 0`.
    pub fn resolve(self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        let index = match self {
            RenditionChoice::Lowest => 0,
            RenditionChoice::Middle => count / 2,
            RenditionChoice::Highest => count - 1,
            RenditionChoice::Index(i) => i.min(count - 1),
        };
        Some(index)
    }
}
