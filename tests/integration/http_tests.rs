//! HTTP transport tests against a local range server.

use std::sync::Arc;

use cog_stream::error::{IoError, StreamError};
use cog_stream::io::{ContiguousRange, HttpRangeSource, RangeFetchClient, RangeSource, ResourceId};
use cog_stream::stream::{RandomAccessTileStream, StreamOptions};
use cog_stream::tile::TileCache;

use super::test_utils::{expected_bytes, synthetic_data, RangeServer, ServerOptions};

const NAME: &str = "scene.tif";

fn source() -> HttpRangeSource {
    HttpRangeSource::new().unwrap()
}

#[tokio::test]
async fn test_size_from_head() {
    let server = RangeServer::start(NAME, synthetic_data(12_345), ServerOptions::default()).await;
    let size = source()
        .content_length(&ResourceId::from(server.url()))
        .await
        .unwrap();
    assert_eq!(size, 12_345);
}

#[tokio::test]
async fn test_size_from_range_probe_when_head_rejected() {
    let server = RangeServer::start(
        NAME,
        synthetic_data(12_345),
        ServerOptions {
            no_head: true,
            ..ServerOptions::default()
        },
    )
    .await;

    let size = source()
        .content_length(&ResourceId::from(server.url()))
        .await
        .unwrap();
    assert_eq!(size, 12_345);
    assert_eq!(server.range_headers(), vec!["bytes=0-0".to_string()]);
}

#[tokio::test]
async fn test_size_from_full_body_when_probe_range_ignored() {
    let server = RangeServer::start(
        NAME,
        synthetic_data(12_345),
        ServerOptions {
            no_head: true,
            ignore_ranges: true,
            ..ServerOptions::default()
        },
    )
    .await;

    let size = source()
        .content_length(&ResourceId::from(server.url()))
        .await
        .unwrap();
    assert_eq!(size, 12_345);
}

#[tokio::test]
async fn test_server_error_on_size_is_not_unknown_length() {
    for code in [403u16, 500] {
        let server = RangeServer::start(
            NAME,
            synthetic_data(4096),
            ServerOptions {
                status: Some(code),
                ..ServerOptions::default()
            },
        )
        .await;

        let err = source()
            .content_length(&ResourceId::from(server.url()))
            .await
            .unwrap_err();
        assert!(
            matches!(err, IoError::HttpStatus { status, offset: 0 } if status == code),
            "status {code}: got {err:?}"
        );
        assert!(StreamError::from(err).is_network());
    }
}

#[tokio::test]
async fn test_open_fails_on_server_error_even_with_cached_header() {
    let server = RangeServer::start(
        NAME,
        synthetic_data(4096),
        ServerOptions {
            status: Some(500),
            ..ServerOptions::default()
        },
    )
    .await;
    let resource = ResourceId::from(server.url());
    let cache = Arc::new(TileCache::new());
    cache
        .put_header(&resource, bytes::Bytes::from(expected_bytes(0, 99)))
        .await;

    let result = RandomAccessTileStream::open(
        server.url(),
        Arc::new(RangeFetchClient::new(Arc::new(source()))),
        cache,
        StreamOptions::default(),
    )
    .await;
    assert!(matches!(
        result,
        Err(StreamError::Io(IoError::HttpStatus { status: 500, .. }))
    ));
}

#[tokio::test]
async fn test_partial_content_read() {
    let server = RangeServer::start(NAME, synthetic_data(4096), ServerOptions::default()).await;
    let bytes = source()
        .read_range(&ResourceId::from(server.url()), ContiguousRange::new(100, 299))
        .await
        .unwrap();
    assert_eq!(&bytes[..], &expected_bytes(100, 299)[..]);
    assert_eq!(server.range_headers(), vec!["bytes=100-299".to_string()]);
}

#[tokio::test]
async fn test_full_body_response_is_sliced() {
    let server = RangeServer::start(
        NAME,
        synthetic_data(4096),
        ServerOptions {
            ignore_ranges: true,
            ..ServerOptions::default()
        },
    )
    .await;

    let bytes = source()
        .read_range(&ResourceId::from(server.url()), ContiguousRange::new(1000, 1099))
        .await
        .unwrap();
    assert_eq!(&bytes[..], &expected_bytes(1000, 1099)[..]);
}

#[tokio::test]
async fn test_missing_object() {
    let server = RangeServer::start(NAME, synthetic_data(10), ServerOptions::default()).await;
    let missing = ResourceId::from(server.missing_url());

    assert!(matches!(
        source().content_length(&missing).await,
        Err(IoError::NotFound(_))
    ));
    assert!(matches!(
        source().read_range(&missing, ContiguousRange::new(0, 9)).await,
        Err(IoError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_invalid_uri() {
    let result = source()
        .read_range(&ResourceId::from("not a url"), ContiguousRange::new(0, 9))
        .await;
    assert!(matches!(result, Err(IoError::InvalidResource { .. })));
}

#[tokio::test]
async fn test_stream_end_to_end_over_http() {
    let server = RangeServer::start(NAME, synthetic_data(64 * 1024), ServerOptions::default()).await;
    let fetcher = Arc::new(RangeFetchClient::new(Arc::new(source())));
    let cache = Arc::new(TileCache::new());

    let mut stream = RandomAccessTileStream::open(
        server.url(),
        fetcher.clone(),
        cache.clone(),
        StreamOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(stream.len(), Some(64 * 1024));
    assert_eq!(server.range_headers(), vec!["bytes=0-16383".to_string()]);
    server.reset_tracking();

    stream.add_tile(1, 20_000, 1000).unwrap();
    stream.add_tile(2, 21_000, 1000).unwrap();
    stream.add_tile(3, 30_000, 1000).unwrap();
    let report = stream.prepare().await.unwrap();
    assert_eq!(report.ranges.len(), 2);

    let mut headers = server.range_headers();
    headers.sort();
    assert_eq!(
        headers,
        vec!["bytes=20000-21999".to_string(), "bytes=30000-30999".to_string()]
    );

    let bytes = stream.read_at(21_500, 500).await.unwrap();
    assert_eq!(&bytes[..], &expected_bytes(21_500, 21_999)[..]);
    let bytes = stream.read_at(8, 8).await.unwrap();
    assert_eq!(&bytes[..], &expected_bytes(8, 15)[..]);

    // Prepared again from another stream: no new requests
    server.reset_tracking();
    let mut again = RandomAccessTileStream::open(server.url(), fetcher, cache, StreamOptions::default())
        .await
        .unwrap();
    again.add_tile(1, 20_000, 1000).unwrap();
    again.add_tile(2, 21_000, 1000).unwrap();
    assert!(again.prepare().await.unwrap().is_noop());
    assert!(server.range_headers().is_empty());
}

#[tokio::test]
async fn test_server_error_surfaces_range_offset() {
    let server = RangeServer::start(
        NAME,
        synthetic_data(64 * 1024),
        ServerOptions {
            fail_at: Some(30_000),
            ..ServerOptions::default()
        },
    )
    .await;
    let fetcher = Arc::new(RangeFetchClient::new(Arc::new(source())));
    let mut stream = RandomAccessTileStream::open(
        server.url(),
        fetcher,
        Arc::new(TileCache::new()),
        StreamOptions::default(),
    )
    .await
    .unwrap();

    stream.add_tile(1, 20_000, 1000).unwrap();
    stream.add_tile(2, 30_000, 1000).unwrap();

    match stream.prepare().await {
        Err(StreamError::Io(IoError::PartialFetch { start, source, .. })) => {
            assert_eq!(start, 30_000);
            assert!(matches!(
                *source,
                IoError::HttpStatus {
                    status: 503,
                    offset: 30_000
                }
            ));
        }
        other => panic!("expected partial fetch failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_small_object_header_is_clamped_to_length() {
    let server = RangeServer::start(NAME, synthetic_data(500), ServerOptions::default()).await;
    let fetcher = Arc::new(RangeFetchClient::new(Arc::new(source())));
    let stream = RandomAccessTileStream::open(
        server.url(),
        fetcher,
        Arc::new(TileCache::new()),
        StreamOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(server.range_headers(), vec!["bytes=0-499".to_string()]);
    let bytes = stream.read_at(490, 10).await.unwrap();
    assert_eq!(&bytes[..], &expected_bytes(490, 499)[..]);
}
