mod segment_fixture;
mod setup;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use segment_fixture::BlobServer;
use setup::SERVER_RT;
use stream_playback_segments::{
    FetchProgress, Fetcher, HttpFetcher, ProgressCallback, SegmentError, SegmentSettings,
};
use tokio_util::sync::CancellationToken;

fn blobs() -> HashMap<String, Bytes> {
    let mut blobs = HashMap::new();
    blobs.insert("clip.bin".to_string(), Bytes::from(vec![7u8; 48 * 1024]));
    blobs.insert("seg/v0_0.bin".to_string(), Bytes::from_static(b"V0-SEG-0"));
    blobs
}

fn fetcher(max_retries: u32) -> HttpFetcher {
    let settings = SegmentSettings::default()
        .max_retries(max_retries)
        .retry_base_delay(Duration::from_millis(5))
        .max_retry_delay(Duration::from_millis(20));
    HttpFetcher::new(&settings, CancellationToken::new())
}

#[test]
fn fetch_returns_the_body() {
    SERVER_RT.block_on(async {
        let server = BlobServer::new(blobs());
        let base = server.start().await;

        let bytes = fetcher(0)
            .fetch(&format!("{base}seg/v0_0.bin"), None)
            .await
            .expect("fetch should succeed");

        assert_eq!(bytes, Bytes::from_static(b"V0-SEG-0"));
        assert_eq!(server.request_count_for("seg/v0_0.bin"), 1);
    });
}

#[test]
fn client_error_carries_uri_and_is_not_retried() {
    SERVER_RT.block_on(async {
        let server = BlobServer::new(blobs());
        let base = server.start().await;
        let uri = format!("{base}missing.bin");

        let err = fetcher(3).fetch(&uri, None).await.unwrap_err();

        assert!(
            matches!(err, SegmentError::Http { status: 404, .. }),
            "unexpected error: {err:?}"
        );
        assert_eq!(err.uri(), Some(uri.as_str()));
        assert_eq!(server.request_count_for("missing.bin"), 1);
    });
}

#[test]
fn server_errors_are_retried_until_success() {
    SERVER_RT.block_on(async {
        let server = BlobServer::new(blobs()).fail_first("seg/v0_0.bin", 2);
        let base = server.start().await;

        let bytes = fetcher(3)
            .fetch(&format!("{base}seg/v0_0.bin"), None)
            .await
            .expect("third attempt should succeed");

        assert_eq!(bytes, Bytes::from_static(b"V0-SEG-0"));
        assert_eq!(server.request_count_for("seg/v0_0.bin"), 3);
    });
}

#[test]
fn retries_are_bounded() {
    SERVER_RT.block_on(async {
        let server = BlobServer::new(blobs()).fail_first("seg/v0_0.bin", 10);
        let base = server.start().await;

        let err = fetcher(2)
            .fetch(&format!("{base}seg/v0_0.bin"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, SegmentError::Http { status: 503, .. }));
        assert_eq!(server.request_count_for("seg/v0_0.bin"), 3);
    });
}

#[test]
fn progress_reports_every_byte() {
    SERVER_RT.block_on(async {
        let server = BlobServer::new(blobs());
        let base = server.start().await;

        let loaded = Arc::new(AtomicU64::new(0));
        let total = Arc::new(AtomicU64::new(0));
        let progress: ProgressCallback = {
            let loaded = Arc::clone(&loaded);
            let total = Arc::clone(&total);
            Arc::new(move |p: FetchProgress| {
                loaded.store(p.loaded, Ordering::SeqCst);
                if let Some(t) = p.total {
                    total.store(t, Ordering::SeqCst);
                }
            })
        };

        let bytes = fetcher(0)
            .fetch(&format!("{base}clip.bin"), Some(progress))
            .await
            .expect("fetch should succeed");

        assert_eq!(bytes.len(), 48 * 1024);
        assert_eq!(loaded.load(Ordering::SeqCst), 48 * 1024);
        assert_eq!(total.load(Ordering::SeqCst), 48 * 1024);
    });
}

#[test]
fn cancelled_fetcher_refuses_requests() {
    SERVER_RT.block_on(async {
        let server = BlobServer::new(blobs());
        let base = server.start().await;

        let cancel = CancellationToken::new();
        let fetcher = HttpFetcher::new(&SegmentSettings::default(), cancel.clone());
        cancel.cancel();

        let err = fetcher
            .fetch(&format!("{base}seg/v0_0.bin"), None)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(server.request_count_for("seg/v0_0.bin"), 0);
    });
}

#[test]
fn malformed_uri_is_a_fetch_error() {
    SERVER_RT.block_on(async {
        let err = fetcher(0).fetch("not a url", None).await.unwrap_err();
        assert!(matches!(err, SegmentError::Fetch { .. }));
        assert_eq!(err.uri(), Some("not a url"));
    });
}
