//! End-to-end declare / prepare / read scenarios against a tracking source.

use std::sync::Arc;
use std::time::Duration;

use cog_stream::error::{IoError, StreamError, TileError};
use cog_stream::io::{ContiguousRange, RangeFetchClient, ResourceId};
use cog_stream::stream::{RandomAccessTileStream, StreamOptions, StreamState};
use cog_stream::tile::{
    PixelRegion, PlanarConfiguration, TileCache, TileLayout, HEADER_TILE_ID,
};

use super::test_utils::{expected_bytes, synthetic_data, StreamFixture, TrackingSource};

const URI: &str = "https://data.example.com/scenes/B04.tif";

/// A stream whose header stops before offset 100.
async fn small_header_stream(fx: &StreamFixture) -> RandomAccessTileStream {
    fx.open_with(
        URI,
        StreamOptions {
            header_size: 100,
            ..StreamOptions::default()
        },
    )
    .await
}

#[tokio::test]
async fn test_three_tiles_two_ranges_and_read() {
    let fx = StreamFixture::new(TrackingSource::new(synthetic_data(4096)));
    let mut stream = small_header_stream(&fx).await;
    fx.source.reset_tracking();

    stream.add_tile(1, 100, 100).unwrap();
    stream.add_tile(2, 200, 100).unwrap();
    stream.add_tile(3, 500, 100).unwrap();
    let report = stream.prepare().await.unwrap();

    assert_eq!(
        report.ranges,
        vec![ContiguousRange::new(100, 299), ContiguousRange::new(500, 599)]
    );
    assert_eq!(fx.source.requests(), report.ranges);

    let bytes = stream.read_at(250, 50).await.unwrap();
    assert_eq!(&bytes[..], &expected_bytes(250, 299)[..]);
}

#[tokio::test]
async fn test_header_truncation_scenario() {
    let fx = StreamFixture::new(TrackingSource::new(synthetic_data(64 * 1024)));
    let mut stream = fx.open(URI).await;
    let resource = ResourceId::from(URI);
    assert_eq!(fx.cache.get_header(&resource).await.unwrap().len(), 16384);
    fx.source.reset_tracking();

    stream.add_tile(7, 16_000, 501).unwrap();
    let report = stream.prepare().await.unwrap();

    assert_eq!(report.header_truncated_to, Some(16_000));
    assert_eq!(fx.source.requests(), vec![ContiguousRange::new(16_000, 16_500)]);

    let header = fx.cache.get_header(&resource).await.unwrap();
    assert_eq!(&header[..], &expected_bytes(0, 15_999)[..]);
    let tile = fx.cache.get_tile(&resource, 7).await.unwrap();
    assert_eq!(&tile[..], &expected_bytes(16_000, 16_500)[..]);

    // A later stream on the same resource sees the shortened header
    let other = fx.open(URI).await;
    assert_eq!(other.tiles().tile_length(HEADER_TILE_ID), Some(16_000));
}

#[tokio::test]
async fn test_all_cached_issues_no_requests() {
    let fx = StreamFixture::new(TrackingSource::new(synthetic_data(4096)));
    let mut first = small_header_stream(&fx).await;
    for (id, offset) in [(1, 100), (2, 200), (3, 500)] {
        first.add_tile(id, offset, 100).unwrap();
    }
    first.prepare().await.unwrap();
    fx.source.reset_tracking();

    let mut second = small_header_stream(&fx).await;
    for (id, offset) in [(1, 100), (2, 200), (3, 500)] {
        second.add_tile(id, offset, 100).unwrap();
    }
    let report = second.prepare().await.unwrap();

    assert!(report.is_noop());
    assert_eq!(report.already_cached, 3);
    assert_eq!(fx.source.request_count(), 0);
    assert_eq!(fx.source.head_count(), 0);
    assert_eq!(second.state(), StreamState::Prepared);
}

#[tokio::test]
async fn test_failed_range_fails_prepare_with_offset() {
    let fx = StreamFixture::new(TrackingSource::new(synthetic_data(4096)));
    let mut stream = small_header_stream(&fx).await;
    fx.source.fail_at(500);

    stream.add_tile(1, 100, 100).unwrap();
    stream.add_tile(2, 200, 100).unwrap();
    stream.add_tile(3, 500, 100).unwrap();

    let err = stream.prepare().await.unwrap_err();
    assert!(err.is_network());
    match err {
        StreamError::Io(IoError::PartialFetch { start, end, source }) => {
            assert_eq!((start, end), (500, 599));
            assert!(matches!(*source, IoError::HttpStatus { status: 503, .. }));
        }
        other => panic!("expected partial fetch failure, got {other:?}"),
    }

    // Nothing from the failed step is visible through the stream
    assert!(matches!(
        stream.read_at(100, 4).await,
        Err(StreamError::TileEvicted { tile_id: 1, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_slow_range_times_out() {
    let source = TrackingSource::new(synthetic_data(4096)).with_delay(Duration::from_secs(30));
    let fetcher = Arc::new(RangeFetchClient::with_timeout(
        Arc::new(source.clone()),
        Duration::from_secs(5),
    )
    .unwrap());
    let cache = Arc::new(TileCache::new());

    // Seed the header so open does not wait on the slow source
    let resource = ResourceId::from(URI);
    cache.put_file_size(&resource, 4096).await;
    cache
        .put_header(&resource, bytes::Bytes::from(expected_bytes(0, 99)))
        .await;

    let mut stream =
        RandomAccessTileStream::open(URI, fetcher, cache, StreamOptions::default())
            .await
            .unwrap();
    stream.add_tile(1, 100, 100).unwrap();

    let err = stream.prepare().await.unwrap_err();
    match err {
        StreamError::Io(IoError::PartialFetch { start, source, .. }) => {
            assert_eq!(start, 100);
            assert!(matches!(*source, IoError::Timeout { offset: 100, timeout_ms: 5000 }));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reads_outside_declared_tiles() {
    let fx = StreamFixture::new(TrackingSource::new(synthetic_data(4096)));
    let mut stream = small_header_stream(&fx).await;
    stream.add_tile(1, 100, 100).unwrap();
    stream.add_tile(3, 500, 100).unwrap();
    stream.prepare().await.unwrap();

    // Gap between declared tiles
    assert!(matches!(
        stream.read_at(300, 1).await,
        Err(StreamError::Tile(TileError::PositionNotCovered(300)))
    ));
    // Window spilling into the gap
    assert!(matches!(
        stream.read_at(190, 20).await,
        Err(StreamError::Tile(TileError::ReadCrossesTileBoundary { .. }))
    ));
    // Every position inside a declared tile resolves
    for position in 500..600 {
        let byte = stream.read_at(position, 1).await.unwrap();
        assert_eq!(byte[0], (position % 251) as u8);
    }
}

#[tokio::test]
async fn test_sequential_reads_through_tiles() {
    let fx = StreamFixture::new(TrackingSource::new(synthetic_data(4096)));
    let mut stream = small_header_stream(&fx).await;
    stream.add_tile(1, 100, 100).unwrap();
    stream.add_tile(2, 200, 100).unwrap();
    stream.prepare().await.unwrap();

    stream.seek(100);
    let mut collected = Vec::new();
    for _ in 0..20 {
        collected.extend_from_slice(&stream.read_next(10).await.unwrap());
    }
    assert_eq!(collected, expected_bytes(100, 299));
    assert_eq!(stream.position(), 300);
}

#[tokio::test]
async fn test_concurrent_prepares_match_sequential() {
    let data = synthetic_data(256 * 1024);
    let concurrent = StreamFixture::new(TrackingSource::new(data.clone()));
    let sequential = StreamFixture::new(TrackingSource::new(data));

    let declare = |stream: &mut RandomAccessTileStream, base: i64, offset: u64| {
        for i in 0..16 {
            stream
                .add_tile(base + i, offset + i as u64 * 1024, 1024)
                .unwrap();
        }
    };

    let mut streams = Vec::new();
    for (n, fx) in [&concurrent, &sequential].into_iter().enumerate() {
        let mut a = fx.open(URI).await;
        let mut b = fx.open(URI).await;
        let mut c = fx.open(URI).await;
        declare(&mut a, 0, 20_000);
        declare(&mut b, 100, 60_000);
        declare(&mut c, 200, 120_000);
        streams.push((n, a, b, c));
    }

    for (n, mut a, mut b, mut c) in streams {
        if n == 0 {
            let (ra, rb, rc) = tokio::join!(a.prepare(), b.prepare(), c.prepare());
            ra.unwrap();
            rb.unwrap();
            rc.unwrap();
        } else {
            a.prepare().await.unwrap();
            b.prepare().await.unwrap();
            c.prepare().await.unwrap();
        }
    }

    let resource = ResourceId::from(URI);
    assert_eq!(concurrent.cache.len().await, sequential.cache.len().await);
    for id in (0..16).chain(100..116).chain(200..216) {
        let left = concurrent.cache.get_tile(&resource, id).await;
        let right = sequential.cache.get_tile(&resource, id).await;
        assert!(left.is_some(), "tile {id} missing");
        assert_eq!(left, right, "tile {id} differs");
    }
}

#[tokio::test]
async fn test_streams_for_different_resources_share_cache() {
    let fx = StreamFixture::new(TrackingSource::new(synthetic_data(8192)));
    let mut red = fx.open("https://data.example.com/B04.tif").await;
    let mut nir = fx.open("https://data.example.com/B08.tif").await;

    red.add_tile(0, 1000, 100).unwrap();
    nir.add_tile(0, 2000, 100).unwrap();
    red.prepare().await.unwrap();
    nir.prepare().await.unwrap();

    assert_eq!(&red.read_at(1000, 4).await.unwrap()[..], &expected_bytes(1000, 1003)[..]);
    assert_eq!(&nir.read_at(2000, 4).await.unwrap()[..], &expected_bytes(2000, 2003)[..]);
}

#[tokio::test]
async fn test_unknown_length_estimates_tile_sizes() {
    let fx = StreamFixture::new(TrackingSource::new(synthetic_data(40_000)).without_size());
    let mut stream = fx.open(URI).await;
    assert_eq!(stream.len(), None);

    // 64x64 tiles of one byte per pixel, byte counts absent
    let layout = TileLayout {
        image_width: 128,
        image_height: 64,
        tile_width: 64,
        tile_height: 64,
        bits_per_sample: vec![8],
        planar: PlanarConfiguration::Chunky,
        offsets: vec![20_000, 24_096],
        byte_counts: None,
    };

    let report = stream
        .prepare_region(&layout, PixelRegion::new(0, 0, 128, 64))
        .await
        .unwrap();
    assert_eq!(report.ranges, vec![ContiguousRange::new(20_000, 28_191)]);
    assert_eq!(stream.read_at(24_096, 4096).await.unwrap().len(), 4096);
}

#[tokio::test]
async fn test_known_length_clamps_estimated_tile() {
    let fx = StreamFixture::new(TrackingSource::new(synthetic_data(22_000)));
    let mut stream = fx.open(URI).await;

    let layout = TileLayout {
        image_width: 64,
        image_height: 64,
        tile_width: 64,
        tile_height: 64,
        bits_per_sample: vec![8],
        planar: PlanarConfiguration::Chunky,
        offsets: vec![20_000],
        byte_counts: None,
    };

    let report = stream
        .prepare_region(&layout, PixelRegion::new(0, 0, 64, 64))
        .await
        .unwrap();
    // 4096-byte estimate clamped to the 2000 bytes left in the resource
    assert_eq!(report.ranges, vec![ContiguousRange::new(20_000, 21_999)]);
}
