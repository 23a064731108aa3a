//! Segment prefetch queue integration tests.
//!
//! All tests run against [`MemoryFetcher`]; no network. They cover:
//! - in-order delivery of init and media payloads until end of track,
//! - look-ahead (the window is requested before it is consumed),
//! - rendition switching (`NewInitNeeded`, then the new rendition's data),
//! - same-index fallback to an already downloaded rendition,
//! - failures carrying the failing URI, and retry after a failure,
//! - the HLS adapter producing the expected rendition set.

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use stream_playback_segments::{
    HlsManifestParser, ManifestParser, NextInit, NextSegment, PrefetchParams, RenditionChoice,
    SegmentError, SegmentId, SegmentPrefetchQueue, SegmentSettings, SegmentState,
};

mod segment_fixture;
mod setup;

use segment_fixture::{MemoryFetcher, init_uri, manifest, segment_payload, segment_uri, uri};
use setup::wait_until;

const WAIT: Duration = Duration::from_secs(2);

fn queue(fetcher: &MemoryFetcher, bandwidths: &[u64], segments: usize) -> SegmentPrefetchQueue {
    let params = PrefetchParams::new(manifest(bandwidths, segments), Arc::new(fetcher.clone()))
        .settings(SegmentSettings::default().prefetch_window(2));
    SegmentPrefetchQueue::new(params).expect("manifest has renditions")
}

async fn next_media(queue: &SegmentPrefetchQueue) -> NextSegment {
    loop {
        match queue.get_next_init_segment().await.expect("init fetch failed") {
            NextInit::EndOfTrack => return NextSegment::EndOfTrack,
            NextInit::Changed(_) | NextInit::Unchanged => {}
        }
        match queue.get_next_segment_file().await.expect("segment fetch failed") {
            NextSegment::NewInitNeeded => continue,
            other => return other,
        }
    }
}

fn downloaded(queue: &SegmentPrefetchQueue, rendition: usize, index: usize) -> bool {
    queue.segment_state(SegmentId { rendition, index }) == SegmentState::Downloaded
}

#[test]
fn segments_arrive_in_order_until_end_of_track() {
    setup::SERVER_RT.block_on(async {
        let fetcher = MemoryFetcher::with_hls(&[128_000], 4);
        let queue = queue(&fetcher, &[128_000], 4);
        assert_eq!(queue.start(None), 0);

        match queue.get_next_init_segment().await.unwrap() {
            NextInit::Changed(init) => {
                assert_eq!(init.uri, init_uri(0));
                assert_eq!(&init.data[..], b"INIT-V0");
            }
            other => panic!("expected init data first, got {other:?}"),
        }

        let mut seen = Vec::new();
        loop {
            assert!(matches!(
                queue.get_next_init_segment().await.unwrap(),
                NextInit::Unchanged | NextInit::EndOfTrack
            ));
            match queue.get_next_segment_file().await.unwrap() {
                NextSegment::Media(payload) => {
                    assert_eq!(payload.data, segment_payload(0, payload.id.index));
                    assert!(!payload.substituted);
                    seen.push(payload.id.index);
                }
                NextSegment::EndOfTrack => break,
                NextSegment::NewInitNeeded => panic!("single rendition never needs new init"),
            }
        }

        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert!(matches!(
            queue.get_next_init_segment().await.unwrap(),
            NextInit::EndOfTrack
        ));
        // Every payload was fetched exactly once.
        for i in 0..4 {
            assert_eq!(fetcher.request_count(&segment_uri(0, i)), 1);
        }
        assert_eq!(fetcher.request_count(&init_uri(0)), 1);
    });
}

#[test]
fn look_ahead_requests_the_window_before_it_is_consumed() {
    setup::SERVER_RT.block_on(async {
        let fetcher = MemoryFetcher::with_hls(&[128_000], 6);
        let queue = queue(&fetcher, &[128_000], 6);
        queue.start(None);

        assert!(wait_until(WAIT, || fetcher.request_count(&segment_uri(0, 1)) == 1).await);
        assert_eq!(fetcher.request_count(&segment_uri(0, 0)), 1);
        assert_eq!(fetcher.request_count(&segment_uri(0, 2)), 0);

        assert!(matches!(next_media(&queue).await, NextSegment::Media(_)));
        assert!(wait_until(WAIT, || fetcher.request_count(&segment_uri(0, 2)) == 1).await);
        assert_eq!(fetcher.request_count(&segment_uri(0, 3)), 0);
        assert_eq!(
            queue.segment_state(SegmentId { rendition: 0, index: 0 }),
            SegmentState::Consumed
        );
    });
}

#[test]
fn switching_rendition_requires_new_init_first() {
    setup::SERVER_RT.block_on(async {
        let bandwidths = [128_000, 2_560_000];
        let fetcher = MemoryFetcher::with_hls(&bandwidths, 4);
        let queue = queue(&fetcher, &bandwidths, 4);
        queue.start(Some(0));

        match next_media(&queue).await {
            NextSegment::Media(p) => assert_eq!(p.id, SegmentId { rendition: 0, index: 0 }),
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(queue.set_rendition(Some(1)), 1);
        assert!(
            wait_until(WAIT, || {
                downloaded(&queue, 1, 1)
                    && queue.init_state(&init_uri(1)) == SegmentState::Downloaded
            })
            .await
        );

        assert!(matches!(
            queue.get_next_segment_file().await.unwrap(),
            NextSegment::NewInitNeeded
        ));
        match queue.get_next_init_segment().await.unwrap() {
            NextInit::Changed(init) => {
                assert_eq!(init.rendition, 1);
                assert_eq!(&init.data[..], b"INIT-V1");
            }
            other => panic!("expected new init, got {other:?}"),
        }
        match queue.get_next_segment_file().await.unwrap() {
            NextSegment::Media(p) => {
                assert_eq!(p.id, SegmentId { rendition: 1, index: 1 });
                assert_eq!(p.data, segment_payload(1, 1));
            }
            other => panic!("unexpected {other:?}"),
        }
    });
}

#[test]
fn downloaded_segment_of_another_rendition_substitutes_a_pending_one() {
    setup::SERVER_RT.block_on(async {
        let bandwidths = [128_000, 2_560_000];
        let fetcher = MemoryFetcher::with_hls(&bandwidths, 6);
        // The active rendition's segment 3 never arrives during this test.
        fetcher.hold(&segment_uri(1, 3));
        let queue = queue(&fetcher, &bandwidths, 6);
        queue.start(Some(0));

        for expected in 0..3 {
            match next_media(&queue).await {
                NextSegment::Media(p) => assert_eq!(p.id.index, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(wait_until(WAIT, || downloaded(&queue, 0, 3)).await);

        queue.set_rendition(Some(1));
        assert!(
            wait_until(WAIT, || queue.init_state(&init_uri(1)) == SegmentState::Downloaded).await
        );
        assert_eq!(
            queue.segment_state(SegmentId { rendition: 1, index: 3 }),
            SegmentState::InFlight
        );

        let next = tokio::time::timeout(WAIT, queue.get_next_segment_file())
            .await
            .expect("fallback must not stall on the pending download")
            .unwrap();
        match next {
            NextSegment::Media(p) => {
                assert!(p.substituted);
                assert_eq!(p.id, SegmentId { rendition: 0, index: 3 });
                assert_eq!(p.data, segment_payload(0, 3));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(queue.active_rendition(), 1);
        fetcher.release(&segment_uri(1, 3));
    });
}

#[test]
fn failed_download_names_the_uri_and_is_retried() {
    setup::SERVER_RT.block_on(async {
        let fetcher = MemoryFetcher::with_hls(&[128_000], 3);
        fetcher.fail(&segment_uri(0, 1));
        let queue = queue(&fetcher, &[128_000], 3);
        queue.start(None);

        assert!(matches!(next_media(&queue).await, NextSegment::Media(_)));

        let err = queue.get_next_segment_file().await.unwrap_err();
        assert_eq!(err.uri(), Some(segment_uri(0, 1).as_str()));
        assert!(matches!(err, SegmentError::Http { status: 503, .. }));
        assert_eq!(queue.current_index(), 1);

        fetcher.heal(&segment_uri(0, 1));
        match queue.get_next_segment_file().await.unwrap() {
            NextSegment::Media(p) => assert_eq!(p.id.index, 1),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fetcher.request_count(&segment_uri(0, 1)), 2);
    });
}

#[test]
fn missing_init_fails_with_its_uri() {
    setup::SERVER_RT.block_on(async {
        let fetcher = MemoryFetcher::with_hls(&[128_000], 2);
        fetcher.remove(&init_uri(0));
        let queue = queue(&fetcher, &[128_000], 2);
        queue.start(None);

        let err = queue.get_next_init_segment().await.unwrap_err();
        assert_eq!(err.uri(), Some(init_uri(0).as_str()));
    });
}

#[test]
fn cancel_resolves_pending_waiters() {
    setup::SERVER_RT.block_on(async {
        let fetcher = MemoryFetcher::with_hls(&[128_000], 2);
        fetcher.hold(&init_uri(0));
        let queue = queue(&fetcher, &[128_000], 2);
        queue.start(None);

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get_next_init_segment().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.cancel();

        let result = tokio::time::timeout(WAIT, waiter).await.unwrap().unwrap();
        assert!(result.unwrap_err().is_cancelled());
        fetcher.release(&init_uri(0));
    });
}

#[test]
fn restart_rewinds_to_the_first_segment() {
    setup::SERVER_RT.block_on(async {
        let fetcher = MemoryFetcher::with_hls(&[128_000, 640_000], 2);
        let queue = queue(&fetcher, &[128_000, 640_000], 2);
        queue.start(Some(1));

        while let NextSegment::Media(_) = next_media(&queue).await {}
        assert_eq!(queue.current_index(), 2);

        assert_eq!(queue.restart(), 1);
        assert_eq!(queue.current_index(), 0);
        match next_media(&queue).await {
            NextSegment::Media(p) => assert_eq!(p.id, SegmentId { rendition: 1, index: 0 }),
            other => panic!("unexpected {other:?}"),
        }
    });
}

#[rstest]
#[case(RenditionChoice::Lowest, 0)]
#[case(RenditionChoice::Middle, 1)]
#[case(RenditionChoice::Highest, 2)]
#[case(RenditionChoice::Index(7), 2)]
fn default_rendition_follows_settings(#[case] choice: RenditionChoice, #[case] expected: usize) {
    setup::SERVER_RT.block_on(async {
        let bandwidths = [640_000, 128_000, 2_560_000];
        let fetcher = MemoryFetcher::with_hls(&bandwidths, 1);
        let params = PrefetchParams::new(manifest(&bandwidths, 1), Arc::new(fetcher))
            .settings(SegmentSettings::default().default_rendition(choice));
        let queue = SegmentPrefetchQueue::new(params).unwrap();

        let active = queue.start(None);
        assert_eq!(active, expected);
        // Sorted ascending, so the index order is the bandwidth order.
        let sorted: Vec<u64> = queue.renditions().iter().map(|r| r.bandwidth).collect();
        assert_eq!(sorted, vec![128_000, 640_000, 2_560_000]);
    });
}

#[rstest]
#[case(0, false)]
#[case(1, false)]
#[case(2, true)]
fn trailing_edge_covers_the_last_segment(#[case] consumed: usize, #[case] expected: bool) {
    setup::SERVER_RT.block_on(async {
        let fetcher = MemoryFetcher::with_hls(&[128_000], 3);
        let queue = queue(&fetcher, &[128_000], 3);
        queue.start(None);
        for _ in 0..consumed {
            assert!(matches!(next_media(&queue).await, NextSegment::Media(_)));
        }

        assert_eq!(queue.is_trailing_edge(Duration::from_secs(1)), expected);
    });
}

#[test]
fn hls_master_playlist_becomes_sorted_renditions() {
    setup::SERVER_RT.block_on(async {
        let bandwidths = [2_560_000, 128_000, 640_000];
        let fetcher = MemoryFetcher::with_hls(&bandwidths, 3);
        let text = fetcher.text("master.m3u8");

        let manifest = HlsManifestParser
            .parse(text.as_bytes(), &uri("master.m3u8"), &fetcher)
            .await
            .expect("fixture master playlist must parse");

        let sorted: Vec<(u64, usize)> = manifest
            .renditions
            .iter()
            .map(|r| (r.bandwidth, r.playlist_index))
            .collect();
        assert_eq!(sorted, vec![(128_000, 1), (640_000, 2), (2_560_000, 0)]);

        let lowest = &manifest.renditions[0];
        assert_eq!(lowest.index, 0);
        assert_eq!(lowest.segments.len(), 3);
        assert_eq!(lowest.segments[2].uri, segment_uri(1, 2));
        assert_eq!(lowest.segments[0].init_uri.as_deref(), Some(init_uri(1).as_str()));
        assert_eq!(lowest.resolution.map(|r| (r.width, r.height)), Some((640, 360)));
        assert_eq!(manifest.duration, Some(Duration::from_secs(3)));
    });
}

#[test]
fn hls_media_playlist_becomes_a_single_rendition() {
    setup::SERVER_RT.block_on(async {
        let fetcher = MemoryFetcher::with_hls(&[128_000], 2);
        let text = fetcher.text("v0.m3u8");

        let manifest = HlsManifestParser
            .parse(text.as_bytes(), &uri("v0.m3u8"), &fetcher)
            .await
            .unwrap();

        assert_eq!(manifest.renditions.len(), 1);
        assert_eq!(manifest.renditions[0].segments[1].uri, segment_uri(0, 1));
        // The master playlist was never needed.
        assert_eq!(fetcher.request_count(&uri("master.m3u8")), 0);
    });
}

#[test]
fn empty_manifest_is_rejected() {
    setup::SERVER_RT.block_on(async {
        let fetcher = MemoryFetcher::new();
        let err = HlsManifestParser
            .parse(b"", &uri("master.m3u8"), &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, SegmentError::InvalidManifest(_)));
    });
}
