//! Cache behaviour seen through streams: sharing, eviction and the disk tier.

use std::time::Duration;

use bytes::Bytes;
use cog_stream::config::CacheConfig;
use cog_stream::error::StreamError;
use cog_stream::io::{ContiguousRange, ResourceId};
use cog_stream::stream::StreamOptions;
use cog_stream::tile::{CachePolicy, TileCache, HEADER_TILE_ID};

use super::test_utils::{expected_bytes, synthetic_data, StreamFixture, TrackingSource};

const URI: &str = "https://data.example.com/dem.tif";

fn small_header() -> StreamOptions {
    StreamOptions {
        header_size: 100,
        ..StreamOptions::default()
    }
}

#[tokio::test]
async fn test_disk_tier_survives_new_cache_instance() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::default().with_disk(dir.path(), 10 * 1024 * 1024);

    let source = TrackingSource::new(synthetic_data(8192));
    {
        let fx = StreamFixture::with_cache(source.clone(), TileCache::from_config(&config).await.unwrap());
        assert!(fx.cache.has_disk_tier());
        let mut stream = fx.open_with(URI, small_header()).await;
        stream.add_tile(1, 1000, 500).unwrap();
        stream.add_tile(2, 1500, 500).unwrap();
        stream.prepare().await.unwrap();
    }
    source.reset_tracking();

    // Fresh heap, same directory
    let fx = StreamFixture::with_cache(source.clone(), TileCache::from_config(&config).await.unwrap());
    assert!(fx.cache.is_empty().await);

    let mut stream = fx.open_with(URI, small_header()).await;
    stream.add_tile(1, 1000, 500).unwrap();
    stream.add_tile(2, 1500, 500).unwrap();
    let report = stream.prepare().await.unwrap();

    assert!(report.is_noop());
    assert_eq!(source.request_count(), 0);
    assert_eq!(source.head_count(), 0);
    assert_eq!(&stream.read_at(1500, 10).await.unwrap()[..], &expected_bytes(1500, 1509)[..]);

    // Disk hits that were read (size, header, tile 2) were promoted to the heap
    assert_eq!(fx.cache.len().await, 3);
}

#[tokio::test]
async fn test_heap_eviction_falls_back_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::default()
        .with_heap_size(600)
        .with_disk(dir.path(), 1024 * 1024);
    let fx = StreamFixture::with_cache(
        TrackingSource::new(synthetic_data(8192)),
        TileCache::from_config(&config).await.unwrap(),
    );

    let mut stream = fx.open_with(URI, small_header()).await;
    for i in 0..4 {
        stream.add_tile(i, 1000 + i as u64 * 500, 500).unwrap();
    }
    stream.prepare().await.unwrap();
    assert!(fx.cache.size().await <= 600);
    fx.source.reset_tracking();

    for i in 0..4u64 {
        let offset = 1000 + i * 500;
        let bytes = stream.read_at(offset, 500).await.unwrap();
        assert_eq!(&bytes[..], &expected_bytes(offset, offset + 499)[..]);
    }
    assert_eq!(fx.source.request_count(), 0);
}

#[tokio::test]
async fn test_heap_only_eviction_requires_prepare() {
    let fx = StreamFixture::with_cache(
        TrackingSource::new(synthetic_data(8192)),
        TileCache::with_policy(CachePolicy {
            max_bytes: 1200,
            max_entries: 100,
            ..CachePolicy::default()
        }),
    );

    let mut stream = fx.open_with(URI, small_header()).await;
    for i in 0..4 {
        stream.add_tile(i, 1000 + i as u64 * 500, 500).unwrap();
    }
    stream.prepare().await.unwrap();

    // The earliest tiles did not fit
    let err = stream.read_at(1000, 10).await.unwrap_err();
    assert!(matches!(err, StreamError::TileEvicted { tile_id: 0, .. }));
    assert!(err.is_network());

    // The most recent ones did
    assert!(stream.read_at(2500, 10).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_time_to_live_forces_refetch() {
    let policy = CacheConfig::default()
        .with_time_to_live(Duration::from_secs(60))
        .policy();
    let fx = StreamFixture::with_cache(
        TrackingSource::new(synthetic_data(8192)),
        TileCache::with_policy(policy),
    );

    let mut stream = fx.open_with(URI, small_header()).await;
    stream.add_tile(1, 1000, 500).unwrap();
    stream.prepare().await.unwrap();
    fx.source.reset_tracking();

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(matches!(
        stream.read_at(1000, 10).await,
        Err(StreamError::TileEvicted { .. })
    ));

    assert!(matches!(
        stream.read_at(8, 4).await,
        Err(StreamError::TileEvicted { tile_id: HEADER_TILE_ID, .. })
    ));

    // Both the tile and the expired header come back
    let report = stream.prepare().await.unwrap();
    assert_eq!(report.fetched_tiles, 1);
    assert_eq!(
        fx.source.requests(),
        vec![ContiguousRange::new(0, 99), ContiguousRange::new(1000, 1499)]
    );
    assert_eq!(&stream.read_at(1000, 10).await.unwrap()[..], &expected_bytes(1000, 1009)[..]);
    assert_eq!(&stream.read_at(8, 4).await.unwrap()[..], &expected_bytes(8, 11)[..]);
}

#[tokio::test]
async fn test_header_and_size_reused_across_streams() {
    let fx = StreamFixture::new(TrackingSource::new(synthetic_data(50_000)));
    for _ in 0..5 {
        fx.open(URI).await;
    }
    assert_eq!(fx.source.head_count(), 1);
    assert_eq!(fx.source.request_count(), 1);

    let resource = ResourceId::from(URI);
    assert_eq!(fx.cache.get_file_size(&resource).await, Some(50_000));
}

#[tokio::test]
async fn test_preseeded_cache_entries_are_served() {
    let fx = StreamFixture::new(TrackingSource::new(synthetic_data(8192)));
    let resource = ResourceId::from(URI);
    fx.cache.put_file_size(&resource, 8192).await;
    fx.cache
        .put_header(&resource, Bytes::from(expected_bytes(0, 99)))
        .await;
    fx.cache
        .put_tile(&resource, 4, Bytes::from(expected_bytes(4000, 4099)))
        .await;

    let mut stream = fx.open(URI).await;
    stream.add_tile(4, 4000, 100).unwrap();
    assert!(stream.prepare().await.unwrap().is_noop());
    assert_eq!(fx.source.request_count(), 0);
    assert_eq!(fx.source.head_count(), 0);
    assert_eq!(&stream.read_at(4050, 2).await.unwrap()[..], &expected_bytes(4050, 4051)[..]);
}
