//! In-memory and local-HTTP sources of manifests and segment payloads.
//!
//! - [`MemoryFetcher`] implements [`Fetcher`] over a blob map. Individual URIs can be
//!   held (the fetch waits until released) or made to fail, and every request is
//!   counted so tests can assert look-ahead and "fetched once" behavior.
//! - [`BlobServer`] serves the same kind of blob map over HTTP for [`HttpFetcher`]
//!   tests.
//! - The `*_playlist` helpers build HLS text in the layout the fixtures use:
//!   `v{v}.m3u8`, `init{v}.bin`, `seg/v{v}_{i}.bin` with payload `V{v}-SEG-{i}`.
//!
//! [`HttpFetcher`]: stream_playback_segments::HttpFetcher

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::extract::Path;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use bytes::Bytes;
use parking_lot::Mutex;
use stream_playback_segments::{
    FetchProgress, Fetcher, Manifest, ProgressCallback, Rendition, Segment, SegmentError,
    SegmentResult,
};
use tokio::sync::watch;

pub const BASE: &str = "http://fixture.test/";

pub fn uri(path: &str) -> String {
    format!("{BASE}{path}")
}

pub fn segment_uri(variant: usize, index: usize) -> String {
    uri(&format!("seg/v{variant}_{index}.bin"))
}

pub fn init_uri(variant: usize) -> String {
    uri(&format!("init{variant}.bin"))
}

pub fn segment_payload(variant: usize, index: usize) -> Bytes {
    Bytes::from(format!("V{variant}-SEG-{index}"))
}

// ----------------------------
// MemoryFetcher
// ----------------------------

#[derive(Default)]
struct Inner {
    blobs: Mutex<HashMap<String, Bytes>>,
    requests: Mutex<HashMap<String, u64>>,
    gates: Mutex<HashMap<String, watch::Sender<bool>>>,
    failures: Mutex<HashSet<String>>,
}

#[derive(Clone, Default)]
pub struct MemoryFetcher {
    inner: Arc<Inner>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: impl Into<String>, data: impl Into<Bytes>) {
        self.inner.blobs.lock().insert(uri.into(), data.into());
    }

    /// Stored blob at `path` (relative to [`BASE`]) as text. Not counted as a request.
    pub fn text(&self, path: &str) -> String {
        self.inner
            .blobs
            .lock()
            .get(&uri(path))
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }

    pub fn remove(&self, uri: &str) {
        self.inner.blobs.lock().remove(uri);
    }

    /// Register every playlist and payload of `variants`, each with `segments` media
    /// segments of one second, plus a `master.m3u8` listing them.
    pub fn with_hls(variants: &[u64], segments: usize) -> Self {
        let fetcher = Self::new();
        fetcher.insert(uri("master.m3u8"), master_playlist(variants));
        for v in 0..variants.len() {
            fetcher.insert(uri(&format!("v{v}.m3u8")), media_playlist(v, segments));
            fetcher.insert(init_uri(v), format!("INIT-V{v}"));
            for i in 0..segments {
                fetcher.insert(segment_uri(v, i), segment_payload(v, i));
            }
        }
        fetcher
    }

    /// Make fetches of `uri` wait until [`release`](Self::release).
    pub fn hold(&self, uri: &str) {
        let (tx, _) = watch::channel(false);
        self.inner.gates.lock().insert(uri.to_string(), tx);
    }

    pub fn release(&self, uri: &str) {
        if let Some(gate) = self.inner.gates.lock().remove(uri) {
            gate.send_replace(true);
        }
    }

    /// Make fetches of `uri` fail with HTTP 503 until [`heal`](Self::heal).
    pub fn fail(&self, uri: &str) {
        self.inner.failures.lock().insert(uri.to_string());
    }

    pub fn heal(&self, uri: &str) {
        self.inner.failures.lock().remove(uri);
    }

    pub fn request_count(&self, uri: &str) -> u64 {
        self.inner.requests.lock().get(uri).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, uri: &str, progress: Option<ProgressCallback>) -> SegmentResult<Bytes> {
        *self
            .inner
            .requests
            .lock()
            .entry(uri.to_string())
            .or_insert(0) += 1;

        let gate = self.inner.gates.lock().get(uri).map(watch::Sender::subscribe);
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }

        if self.inner.failures.lock().contains(uri) {
            return Err(SegmentError::Http {
                status: 503,
                uri: uri.to_string(),
            });
        }
        let Some(data) = self.inner.blobs.lock().get(uri).cloned() else {
            return Err(SegmentError::Http {
                status: 404,
                uri: uri.to_string(),
            });
        };

        if let Some(progress) = progress {
            progress(FetchProgress {
                uri: uri.to_string(),
                loaded: data.len() as u64,
                total: Some(data.len() as u64),
            });
        }
        Ok(data)
    }
}

// ----------------------------
// Manifest builders
// ----------------------------

pub fn master_playlist(bandwidths: &[u64]) -> String {
    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:7\n\n");
    for (v, bw) in bandwidths.iter().enumerate() {
        out.push_str(&format!("#EXT-X-STREAM-INF:BANDWIDTH={bw},RESOLUTION=640x360\n"));
        out.push_str(&format!("v{v}.m3u8\n"));
    }
    out
}

pub fn media_playlist(variant: usize, segments: usize) -> String {
    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:7\n");
    out.push_str("#EXT-X-TARGETDURATION:1\n");
    out.push_str(&format!("#EXT-X-MAP:URI=\"init{variant}.bin\"\n\n"));
    for i in 0..segments {
        out.push_str("#EXTINF:1.0,\n");
        out.push_str(&format!("seg/v{variant}_{i}.bin\n"));
    }
    out.push_str("#EXT-X-ENDLIST\n");
    out
}

/// A [`Manifest`] equivalent to [`MemoryFetcher::with_hls`], built without parsing.
pub fn manifest(bandwidths: &[u64], segments: usize) -> Manifest {
    let renditions = bandwidths
        .iter()
        .enumerate()
        .map(|(v, bw)| Rendition {
            index: v,
            playlist_index: v,
            bandwidth: *bw,
            resolution: None,
            name: None,
            segments: (0..segments)
                .map(|i| Segment {
                    index: i,
                    uri: segment_uri(v, i),
                    init_uri: Some(init_uri(v)),
                    duration_hint: Duration::from_secs(1),
                })
                .collect(),
        })
        .collect();
    Manifest {
        renditions,
        duration: None,
    }
}

// ----------------------------
// BlobServer
// ----------------------------

/// Local HTTP server for fetcher tests.
///
/// Paths not in the blob map answer 404. Paths registered with
/// [`fail_first`](Self::fail_first) answer 503 for their first `n` requests.
#[derive(Clone, Default)]
pub struct BlobServer {
    blobs: Arc<HashMap<String, Bytes>>,
    failures: Arc<Mutex<HashMap<String, u32>>>,
    request_counts: Arc<Mutex<HashMap<String, u64>>>,
}

impl BlobServer {
    pub fn new(blobs: HashMap<String, Bytes>) -> Self {
        Self {
            blobs: Arc::new(blobs),
            ..Default::default()
        }
    }

    pub fn fail_first(self, path: &str, n: u32) -> Self {
        self.failures.lock().insert(path.to_string(), n);
        self
    }

    pub fn request_count_for(&self, path: &str) -> u64 {
        self.request_counts.lock().get(path).copied().unwrap_or(0)
    }

    /// Start the server and return the base URL (ending with `/`).
    ///
    /// Same startup as the other fixtures: bind a `std::net::TcpListener` on
    /// `127.0.0.1:0`, make it non-blocking, hand it to tokio and spawn `axum::serve`.
    pub async fn start(&self) -> String {
        let app = self.build_router();

        let listener = std::net::TcpListener::bind("127.0.0.1:0")
            .expect("failed to bind local fixture server");
        listener
            .set_nonblocking(true)
            .expect("failed to set nonblocking on fixture listener");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener)
                .expect("failed to convert fixture listener to tokio listener");
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}/", addr)
    }

    fn build_router(&self) -> Router {
        let server = self.clone();

        async fn serve_blob(path: String, server: BlobServer) -> impl IntoResponse {
            *server
                .request_counts
                .lock()
                .entry(path.clone())
                .or_insert(0) += 1;

            {
                let mut failures = server.failures.lock();
                if let Some(left) = failures.get_mut(&path) {
                    if *left > 0 {
                        *left -= 1;
                        return (StatusCode::SERVICE_UNAVAILABLE, HeaderMap::new(), Bytes::new());
                    }
                }
            }

            let Some(bytes) = server.blobs.get(&path) else {
                return (StatusCode::NOT_FOUND, HeaderMap::new(), Bytes::new());
            };

            let mut headers = HeaderMap::new();
            headers.insert(
                axum::http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            (StatusCode::OK, headers, bytes.clone())
        }

        Router::new().route(
            "/{*path}",
            get(move |Path(path): Path<String>| serve_blob(path, server.clone())),
        )
    }
}
