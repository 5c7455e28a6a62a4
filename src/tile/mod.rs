//! Tile layer.
//!
//! Everything between the network and the stream façade:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         RandomAccessTileStream          │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  TileIndex   │  │ RangeCoalescer  │  │
//! │  │  (declared   │  │ (adjacent       │  │
//! │  │   extents)   │  │  extent merge)  │  │
//! │  └──────────────┘  └─────────────────┘  │
//! │  ┌─────────────────────────────────┐    │
//! │  │ TileCache (tiles, headers,      │    │
//! │  │ sizes; heap LRU + disk tier)    │    │
//! │  └─────────────────────────────────┘    │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            RangeFetchClient             │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileIndex`]: declared tiles with id and offset lookup
//! - [`RangeCoalescer`]: greedy merge of adjacent extents into ranges
//! - [`TileCache`]: shared cache with tile, header and file-size namespaces
//! - [`TileLayout`]: regular tile grid implementing [`RegionPlanner`]

mod cache;
mod coalesce;
mod disk;
pub mod index;
mod layout;

pub use cache::{CacheEntryKey, CachePolicy, TileCache, DEFAULT_HEAP_CAPACITY, DEFAULT_MAX_ENTRIES};
pub use coalesce::{coalesce, RangeCoalescer};
pub use index::{AddTileError, ByteExtent, Tile, TileIndex, HEADER_TILE_ID};
pub use layout::{PixelRegion, PlanarConfiguration, RegionPlanner, TileExtent, TileLayout};
