//! Segmented-source input side of the playback pipeline.
//!
//! This crate keeps a decoder fed with the init and media payloads of an adaptively
//! streamed track:
//! - `model`: renditions and segments as produced by a manifest parser.
//! - `fetcher`: the [`Fetcher`] seam plus a `reqwest` based [`HttpFetcher`].
//! - `parser`: the [`ManifestParser`] seam plus an `hls_m3u8` adapter.
//! - `prefetch`: [`SegmentPrefetchQueue`], look-ahead downloads, rendition switching
//!   and same-index fallback.
//! - `settings`, `error`: configuration and the unified error type.

mod error;
mod fetcher;
mod model;
mod parser;
mod prefetch;
mod settings;

pub use crate::error::{SegmentError, SegmentResult};
pub use crate::fetcher::{FetchProgress, Fetcher, HttpFetcher, ProgressCallback};
pub use crate::model::{Manifest, Rendition, RenditionChoice, Resolution, Segment};
pub use crate::parser::{HlsManifestParser, ManifestParser};
pub use crate::prefetch::{
    InitPayload, NextInit, NextSegment, PrefetchParams, SegmentId, SegmentPayload,
    SegmentPrefetchQueue, SegmentState,
};
pub use crate::settings::SegmentSettings;
