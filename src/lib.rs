//! # cog-stream
//!
//! Random-access reads over remote Cloud-Optimized GeoTIFFs using HTTP range
//! requests.
//!
//! A decoder declares the tiles an image read will touch. The stream fetches
//! the ones not already cached, merging adjacent tiles into as few range
//! requests as possible and issuing them concurrently, then serves positional
//! reads from the shared cache.
//!
//! ## Features
//!
//! - **Coalesced range requests**: adjacent tiles are fetched with one request
//! - **Concurrent fetch**: one task per merged range, joined before returning
//! - **Shared cache**: tile, header and file-size namespaces with LRU, byte
//!   budget, time-to-idle and time-to-live eviction plus an optional disk tier
//! - **Pluggable transport**: HTTP(S) and S3 range sources
//!
//! ## Architecture
//!
//! - [`io`] - Range sources and the concurrent fetch client
//! - [`tile`] - Tile index, coalescer, cache and tile-grid planning
//! - [`stream`] - The declare / prepare / read façade
//! - [`config`] - CLI and environment configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cog_stream::{
//!     CacheConfig, HttpRangeSource, RandomAccessTileStream, RangeFetchClient, StreamOptions,
//!     TileCache,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = Arc::new(TileCache::from_config(&CacheConfig::from_env()?).await?);
//!     let fetcher = Arc::new(RangeFetchClient::new(Arc::new(HttpRangeSource::new()?)));
//!
//!     let mut stream = RandomAccessTileStream::open(
//!         "https://example.com/scene.tif",
//!         fetcher,
//!         cache,
//!         StreamOptions::default(),
//!     )
//!     .await?;
//!
//!     stream.add_tile(0, 16384, 8192)?;
//!     stream.prepare().await?;
//!     let bytes = stream.read_at(16384, 4).await?;
//!     println!("{:02x?}", &bytes[..]);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod stream;
pub mod tile;

// Re-export commonly used types
pub use config::{CacheConfig, Cli, FetchConfig, ReadWindow};
pub use error::{ConfigError, IoError, StreamError, TileError};
pub use io::{
    create_s3_client, ContiguousRange, HttpRangeSource, RangeFetchClient, RangeSource,
    ResourceId, S3RangeSource,
};
pub use stream::{ByteOrder, PrepareReport, RandomAccessTileStream, StreamOptions, StreamState};
pub use tile::{
    coalesce, CacheEntryKey, CachePolicy, PixelRegion, PlanarConfiguration, RangeCoalescer,
    RegionPlanner, Tile, TileCache, TileExtent, TileIndex, TileLayout, HEADER_TILE_ID,
};
