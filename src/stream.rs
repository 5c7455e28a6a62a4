//! Random-access byte stream over a remote tiled image.
//!
//! A [`RandomAccessTileStream`] is bound to one resource. A decoder drives it
//! in three phases per image-read operation:
//!
//! 1. **Declare** every tile the decode will touch with
//!    [`add_tile`](RandomAccessTileStream::add_tile), in ascending offset order.
//! 2. **Prepare**: tiles missing from the shared [`TileCache`] are coalesced
//!    into contiguous ranges, fetched concurrently, sliced back into tiles and
//!    cached together.
//! 3. **Read** positional windows. Each read resolves its owning tile and is
//!    served from the cache; no read ever touches the network.
//!
//! The header region fetched at open is registered as the pseudo-tile
//! [`HEADER_TILE_ID`], so reads into the header resolve like any other tile.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{FetchConfig, DEFAULT_HEADER_SIZE};
use crate::error::{ConfigError, IoError, StreamError, TileError};
use crate::io::{
    read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le, ContiguousRange,
    RangeFetchClient, ResourceId,
};
use crate::tile::{
    PixelRegion, RangeCoalescer, RegionPlanner, Tile, TileCache, TileIndex, HEADER_TILE_ID,
};

/// Byte order used to interpret multi-byte values. The stream stores it for
/// the decoder and applies it only in the `read_u*` helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

/// Where a stream is in its declare / prepare / read cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamState {
    /// Bound to a resource, header registered, nothing declared.
    Opened,
    /// Tiles declared since the last prepare.
    Declaring,
    /// Every declared tile has been placed in the cache.
    Prepared,
    /// At least one read served since the last prepare.
    Reading,
}

/// Settings applied when a stream opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Bytes read from the start of the resource when the header is not cached.
    pub header_size: u64,
    /// Initial byte order.
    pub byte_order: ByteOrder,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            header_size: DEFAULT_HEADER_SIZE,
            byte_order: ByteOrder::default(),
        }
    }
}

impl From<&FetchConfig> for StreamOptions {
    fn from(config: &FetchConfig) -> Self {
        Self {
            header_size: config.header_size,
            ..Self::default()
        }
    }
}

/// Outcome of one prepare step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrepareReport {
    /// Data tiles declared for the current image-read operation
    pub declared: usize,

    /// Declared tiles found in the cache
    pub already_cached: usize,

    /// Tiles fetched and cached by this step
    pub fetched_tiles: usize,

    /// Merged ranges requested from the resource
    pub ranges: Vec<ContiguousRange>,

    /// Total bytes received
    pub bytes_fetched: u64,

    /// New header length when the first tile overlapped the cached header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_truncated_to: Option<u64>,
}

impl PrepareReport {
    /// Whether the step completed without any network request.
    pub fn is_noop(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Random-access reads over one remote resource, served from prefetched tiles.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use cog_stream::io::{HttpRangeSource, RangeFetchClient};
/// use cog_stream::stream::{RandomAccessTileStream, StreamOptions};
/// use cog_stream::tile::TileCache;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = Arc::new(RangeFetchClient::new(Arc::new(HttpRangeSource::new()?)));
/// let cache = Arc::new(TileCache::new());
///
/// let mut stream = RandomAccessTileStream::open(
///     "https://example.com/image.tif",
///     fetcher,
///     cache,
///     StreamOptions::default(),
/// )
/// .await?;
///
/// stream.add_tile(0, 16384, 4096)?;
/// stream.add_tile(1, 20480, 4096)?;
/// let report = stream.prepare().await?;
/// assert_eq!(report.ranges.len(), 1);
///
/// let bytes = stream.read_at(16384, 16).await?;
/// # let _ = bytes;
/// # Ok(())
/// # }
/// ```
pub struct RandomAccessTileStream {
    resource: ResourceId,
    fetcher: Arc<RangeFetchClient>,
    cache: Arc<TileCache>,
    index: TileIndex,
    length: Option<u64>,
    position: u64,
    byte_order: ByteOrder,
    state: StreamState,
}

impl RandomAccessTileStream {
    /// Bind to `resource`, loading its size and header into the cache if they
    /// are not there yet.
    ///
    /// A resource that does not report its size opens with an unknown length.
    pub async fn open(
        resource: impl Into<ResourceId>,
        fetcher: Arc<RangeFetchClient>,
        cache: Arc<TileCache>,
        options: StreamOptions,
    ) -> Result<Self, StreamError> {
        if options.header_size == 0 {
            return Err(ConfigError::Invalid("header size must be greater than 0".into()).into());
        }
        let resource = resource.into();

        let length = match cache.get_file_size(&resource).await {
            Some(size) => Some(size),
            None => match fetcher.resolve_size(&resource).await {
                Ok(size) => {
                    cache.put_file_size(&resource, size).await;
                    Some(size)
                }
                Err(IoError::SizeUnavailable(_)) => {
                    warn!(resource = %resource, "resource size unavailable, length is unknown");
                    None
                }
                Err(e) => return Err(e.into()),
            },
        };

        let header = match cache.get_header(&resource).await {
            Some(header) => header,
            None => {
                let wanted = length.map_or(options.header_size, |len| len.min(options.header_size));
                if wanted == 0 {
                    Bytes::new()
                } else {
                    let header = fetcher.fetch_range(&resource, 0, wanted - 1).await?;
                    if !header.is_empty() {
                        cache.put_header(&resource, header.clone()).await;
                    }
                    debug!(resource = %resource, bytes = header.len(), "cached header");
                    header
                }
            }
        };

        let mut index = TileIndex::new();
        if !header.is_empty() {
            index.add_tile(HEADER_TILE_ID, 0, header.len() as u64)?;
        }

        Ok(Self {
            resource,
            fetcher,
            cache,
            index,
            length,
            position: 0,
            byte_order: options.byte_order,
            state: StreamState::Opened,
        })
    }

    pub fn resource(&self) -> &ResourceId {
        &self.resource
    }

    /// Total resource length, when the resource reported one.
    pub fn len(&self) -> Option<u64> {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == Some(0)
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn tiles(&self) -> &TileIndex {
        &self.index
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.byte_order = order;
    }

    /// Current cursor position.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn seek(&mut self, position: u64) {
        self.position = position;
    }

    // -------------------------------------------------------------------------
    // Declare
    // -------------------------------------------------------------------------

    /// Declare a tile the current image-read operation will touch.
    ///
    /// Declare tiles in ascending offset order; other orders stay correct but
    /// coalesce into more requests. Negative ids are reserved for pseudo-tiles.
    pub fn add_tile(&mut self, id: i64, offset: u64, length: u64) -> Result<(), StreamError> {
        if id == HEADER_TILE_ID {
            return Err(TileError::DuplicateTile(id).into());
        }
        if id < 0 {
            return Err(ConfigError::Invalid(format!("tile id {id} is reserved for pseudo-tiles")).into());
        }
        self.index.add_tile(id, offset, length)?;
        self.state = StreamState::Declaring;
        Ok(())
    }

    /// Start a new image-read operation: forget declared tiles, keep the header.
    pub fn begin_image(&mut self) {
        self.index.clear_data_tiles();
        self.state = StreamState::Opened;
    }

    // -------------------------------------------------------------------------
    // Prepare
    // -------------------------------------------------------------------------

    /// Make every declared tile available in the cache.
    ///
    /// Tiles already cached are never fetched again, so calling this twice
    /// without new declarations issues no requests.
    pub async fn prepare(&mut self) -> Result<PrepareReport, StreamError> {
        let header_truncated_to = self.truncate_header_overlap().await?;
        self.index.validate_disjoint()?;
        if !self.index.is_ascending() {
            debug!(
                resource = %self.resource,
                "tiles declared out of offset order, coalescing may issue extra requests"
            );
        }

        let mut report = PrepareReport {
            header_truncated_to,
            ..PrepareReport::default()
        };
        if let Some(range) = self.restore_header().await? {
            report.bytes_fetched += range.len();
            report.ranges.push(range);
        }

        let mut missing: Vec<Tile> = Vec::new();
        for tile in self.index.data_tiles() {
            report.declared += 1;
            if self.cache.contains_tile(&self.resource, tile.id).await {
                report.already_cached += 1;
            } else {
                missing.push(*tile);
            }
        }

        let Some((first, rest)) = missing.split_first() else {
            debug!(resource = %self.resource, declared = report.declared, "all declared tiles cached");
            self.state = StreamState::Prepared;
            return Ok(report);
        };

        // Range slot of each missing tile, recorded while coalescing
        let mut coalescer = RangeCoalescer::seeded(first.extent.offset, first.extent.end());
        let mut slots = Vec::with_capacity(missing.len());
        slots.push(0);
        for tile in rest {
            coalescer.add_extent(tile.extent.offset, tile.extent.length);
            slots.push(coalescer.len() - 1);
        }
        let ranges = coalescer.into_ranges();
        debug!(
            resource = %self.resource,
            tiles = missing.len(),
            ranges = ranges.len(),
            "coalesced missing tiles"
        );

        let fetched = self
            .fetcher
            .fetch_ranges_concurrently(&self.resource, &ranges)
            .await?;

        let mut entries = Vec::with_capacity(missing.len());
        for (tile, &slot) in missing.iter().zip(&slots) {
            let range = ranges[slot];
            let data = fetched.get(&range.start).ok_or(IoError::ShortRead {
                offset: range.start,
                expected: range.len(),
                actual: 0,
            })?;
            debug_assert!(range.contains_extent(tile.extent.offset, tile.extent.length));
            let start = (tile.extent.offset - range.start) as usize;
            let end = start + tile.extent.length as usize;
            let bytes = if start == 0 && end == data.len() {
                data.clone()
            } else {
                // Copy out so each cached tile owns only its own bytes
                Bytes::copy_from_slice(&data[start..end])
            };
            entries.push((tile.id, bytes));
        }

        report.fetched_tiles = entries.len();
        report.bytes_fetched += fetched.values().map(|b| b.len() as u64).sum::<u64>();
        report.ranges.extend(ranges);

        self.cache.put_tiles(&self.resource, entries).await;
        self.state = StreamState::Prepared;

        info!(
            resource = %self.resource,
            declared = report.declared,
            cached = report.already_cached,
            fetched = report.fetched_tiles,
            ranges = report.ranges.len(),
            bytes = report.bytes_fetched,
            "prepared tiles"
        );
        Ok(report)
    }

    /// Start a new image-read operation for `region`, declare the tiles the
    /// planner reports and prepare them.
    pub async fn prepare_region(
        &mut self,
        planner: &dyn RegionPlanner,
        region: PixelRegion,
    ) -> Result<PrepareReport, StreamError> {
        let tiles = planner.plan_region(region, self.length)?;
        self.begin_image();
        for tile in tiles {
            self.add_tile(tile.id, tile.offset, tile.length)?;
        }
        self.prepare().await
    }

    /// Fetch the header again when the shared cache no longer holds all of
    /// it. Returns the range requested, if any.
    async fn restore_header(&self) -> Result<Option<ContiguousRange>, StreamError> {
        let Some(header_len) = self.index.tile_length(HEADER_TILE_ID) else {
            return Ok(None);
        };
        if let Some(header) = self.cache.get_header(&self.resource).await {
            if header.len() as u64 >= header_len {
                return Ok(None);
            }
        }

        let range = ContiguousRange::new(0, header_len - 1);
        let header = self
            .fetcher
            .fetch_range(&self.resource, range.start, range.end)
            .await?;
        if (header.len() as u64) < header_len {
            return Err(IoError::ShortRead {
                offset: 0,
                expected: header_len,
                actual: header.len() as u64,
            }
            .into());
        }
        debug!(resource = %self.resource, bytes = header_len, "header missing from cache, fetched again");
        self.cache
            .put_header(&self.resource, header.slice(..header_len as usize))
            .await;
        Ok(Some(range))
    }

    /// When the first declared tile starts inside the header, shrink the
    /// header (index and cache) to end just before it.
    async fn truncate_header_overlap(&mut self) -> Result<Option<u64>, StreamError> {
        let Some(first) = self.index.first_data_tile().copied() else {
            return Ok(None);
        };
        let Some(header_len) = self.index.tile_length(HEADER_TILE_ID) else {
            return Ok(None);
        };
        let keep = first.extent.offset;
        if keep >= header_len {
            return Ok(None);
        }

        debug!(
            resource = %self.resource,
            from = header_len,
            to = keep,
            tile = first.id,
            "truncating header to first tile"
        );

        if keep == 0 {
            self.cache.remove_header(&self.resource).await;
        } else if let Some(header) = self.cache.get_header(&self.resource).await {
            let end = (keep as usize).min(header.len());
            self.cache
                .put_header(&self.resource, Bytes::copy_from_slice(&header[..end]))
                .await;
        }
        self.index.truncate(HEADER_TILE_ID, keep)?;
        Ok(Some(keep))
    }

    // -------------------------------------------------------------------------
    // Read
    // -------------------------------------------------------------------------

    /// Bytes `position..position + length`, which must lie within one
    /// declared tile. Does not move the cursor.
    pub async fn read_at(&self, position: u64, length: usize) -> Result<Bytes, StreamError> {
        let tile = *self.index.find_owner(position)?;
        let len = length as u64;
        let start = position - tile.extent.offset;
        if start + len > tile.extent.length {
            return Err(TileError::ReadCrossesTileBoundary {
                position,
                length: len,
                tile_id: tile.id,
                tile_start: tile.extent.offset,
                tile_end: tile.extent.end(),
            }
            .into());
        }
        if length == 0 {
            return Ok(Bytes::new());
        }

        let cached = if tile.id == HEADER_TILE_ID {
            self.cache.get_header(&self.resource).await
        } else {
            self.cache.get_tile(&self.resource, tile.id).await
        };
        let evicted = || StreamError::TileEvicted {
            resource: self.resource.to_string(),
            tile_id: tile.id,
        };
        let data = cached.ok_or_else(evicted)?;

        let start = start as usize;
        let end = start + length;
        if end > data.len() {
            // The shared entry was shortened by another stream
            return Err(evicted());
        }
        Ok(data.slice(start..end))
    }

    /// Fill `buf` from `position` and move the cursor past it.
    pub async fn read(&mut self, position: u64, buf: &mut [u8]) -> Result<usize, StreamError> {
        let bytes = self.read_at(position, buf.len()).await?;
        buf.copy_from_slice(&bytes);
        self.advance(position, bytes.len());
        Ok(bytes.len())
    }

    /// Read `length` bytes at the cursor and move the cursor past them.
    pub async fn read_next(&mut self, length: usize) -> Result<Bytes, StreamError> {
        let position = self.position;
        let bytes = self.read_at(position, length).await?;
        self.advance(position, length);
        Ok(bytes)
    }

    pub async fn read_u16(&mut self) -> Result<u16, StreamError> {
        let bytes = self.read_next(2).await?;
        Ok(match self.byte_order {
            ByteOrder::BigEndian => read_u16_be(&bytes),
            ByteOrder::LittleEndian => read_u16_le(&bytes),
        })
    }

    pub async fn read_u32(&mut self) -> Result<u32, StreamError> {
        let bytes = self.read_next(4).await?;
        Ok(match self.byte_order {
            ByteOrder::BigEndian => read_u32_be(&bytes),
            ByteOrder::LittleEndian => read_u32_le(&bytes),
        })
    }

    pub async fn read_u64(&mut self) -> Result<u64, StreamError> {
        let bytes = self.read_next(8).await?;
        Ok(match self.byte_order {
            ByteOrder::BigEndian => read_u64_be(&bytes),
            ByteOrder::LittleEndian => read_u64_le(&bytes),
        })
    }

    fn advance(&mut self, position: u64, length: usize) {
        self.position = position + length as u64;
        self.state = StreamState::Reading;
    }
}

// =============================================================================
// Tests
// =============================================================================
