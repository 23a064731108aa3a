//! Manifest adapters.
//!
//! [`ManifestParser`] turns a manifest document into the [`Manifest`] shape used by the
//! rest of the crate. [`HlsManifestParser`] is an adapter around the `hls_m3u8` crate.

use async_trait::async_trait;
use hls_m3u8::MasterPlaylist as HlsMasterPlaylist;
use hls_m3u8::MediaPlaylist as HlsMediaPlaylist;
use hls_m3u8::tags::VariantStream as HlsVariantStreamTag;
use tracing::debug;
use url::Url;

use crate::error::{SegmentError, SegmentResult};
use crate::fetcher::Fetcher;
use crate::model::{Manifest, Rendition, Resolution, Segment};

/// Parses a manifest into renditions and a duration.
///
/// Parsers that need secondary documents (HLS media playlists) load them through
/// `fetcher`.
#[async_trait]
pub trait ManifestParser: Send + Sync {
    async fn parse(
        &self,
        text: &[u8],
        base_uri: &str,
        fetcher: &dyn Fetcher,
    ) -> SegmentResult<Manifest>;
}

/// HLS master or media playlist parser.
///
/// Each `#EXT-X-STREAM-INF` becomes a rendition; I-frame playlists are skipped. A
/// bare media playlist becomes a single rendition. `#EXT-X-MAP` supplies the init URI.
#[derive(Debug, Clone, Copy, Default)]
pub struct HlsManifestParser;

#[async_trait]
impl ManifestParser for HlsManifestParser {
    async fn parse(
        &self,
        text: &[u8],
        base_uri: &str,
        fetcher: &dyn Fetcher,
    ) -> SegmentResult<Manifest> {
        let input = std::str::from_utf8(text)
            .map_err(|e| SegmentError::InvalidManifest(format!("invalid UTF-8: {}", e)))?;
        let base = parse_base(base_uri)?;

        if !input.contains("#EXT-X-STREAM-INF") {
            let segments = parse_media_playlist(input, &base)?;
            let rendition = Rendition {
                index: 0,
                playlist_index: 0,
                bandwidth: 0,
                resolution: None,
                name: None,
                segments,
            };
            return Ok(finish(vec![rendition]));
        }

        let mut renditions = Vec::new();
        for variant in parse_master_playlist(input)? {
            let playlist_url = base
                .join(&variant.uri)
                .map_err(|e| SegmentError::InvalidManifest(format!("bad variant uri: {}", e)))?;
            let body = fetcher
                .fetch(playlist_url.as_str(), None)
                .await
                .map_err(|e| e.with_context("fetch media playlist"))?;
            let media = std::str::from_utf8(&body)
                .map_err(|e| SegmentError::InvalidManifest(format!("invalid UTF-8: {}", e)))?;

            renditions.push(Rendition {
                index: renditions.len(),
                playlist_index: variant.playlist_index,
                bandwidth: variant.bandwidth,
                resolution: variant.resolution,
                name: None,
                segments: parse_media_playlist(media, &playlist_url)?,
            });
        }

        if renditions.is_empty() {
            return Err(SegmentError::NoRenditions);
        }
        debug!(renditions = renditions.len(), "HlsManifestParser: parsed master playlist");
        Ok(finish(renditions))
    }
}

struct VariantEntry {
    playlist_index: usize,
    uri: String,
    bandwidth: u64,
    resolution: Option<Resolution>,
}

fn parse_base(base_uri: &str) -> SegmentResult<Url> {
    Url::parse(base_uri)
        .map_err(|e| SegmentError::InvalidManifest(format!("bad base uri {}: {}", base_uri, e)))
}

fn finish(renditions: Vec<Rendition>) -> Manifest {
    let duration = renditions.iter().map(Rendition::total_duration).max();
    Manifest {
        renditions,
        duration,
    }
    .sorted_by_bandwidth()
}

fn parse_master_playlist(input: &str) -> SegmentResult<Vec<VariantEntry>> {
    let master = HlsMasterPlaylist::try_from(input)
        .map_err(|e| SegmentError::InvalidManifest(format!("hls_m3u8 parse error: {}", e)))?;

    let variants = master
        .variant_streams
        .iter()
        .enumerate()
        .filter_map(|(playlist_index, vs)| match vs {
            HlsVariantStreamTag::ExtXStreamInf {
                uri, stream_data, ..
            } => Some(VariantEntry {
                playlist_index,
                uri: uri.to_string(),
                bandwidth: stream_data.bandwidth(),
                resolution: stream_data.resolution().map(|r| Resolution {
                    width: r.width() as u32,
                    height: r.height() as u32,
                }),
            }),
            HlsVariantStreamTag::ExtXIFrame { .. } => None,
        })
        .collect();

    Ok(variants)
}

fn parse_media_playlist(input: &str, playlist_url: &Url) -> SegmentResult<Vec<Segment>> {
    let media = HlsMediaPlaylist::try_from(input)
        .map_err(|e| SegmentError::InvalidManifest(format!("hls_m3u8 parse error: {}", e)))?;

    let resolve = |uri: &str| -> SegmentResult<String> {
        playlist_url
            .join(uri)
            .map(String::from)
            .map_err(|e| SegmentError::InvalidManifest(format!("bad segment uri {}: {}", uri, e)))
    };

    // EXT-X-MAP applies to every following segment until the next one.
    let mut init_uri: Option<String> = None;
    let mut segments = Vec::new();
    for (index, (_idx, seg)) in media.segments.iter().enumerate() {
        if let Some(map) = seg.map.as_ref() {
            init_uri = Some(resolve(&map.uri().to_string())?);
        }
        segments.push(Segment {
            index,
            uri: resolve(&seg.uri().to_string())?,
            init_uri: init_uri.clone(),
            duration_hint: seg.duration.duration(),
        });
    }

    if segments.is_empty() {
        return Err(SegmentError::InvalidManifest(
            "media playlist has no segments".into(),
        ));
    }
    Ok(segments)
}
