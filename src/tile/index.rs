use std::collections::HashMap;
use std::sync::OnceLock;

use serde::Serialize;

use crate::error::{ConfigError, TileError};
use crate::io::ContiguousRange;

/// Reserved id of the header pseudo-tile.
pub const HEADER_TILE_ID: i64 = -100;

/// A non-empty byte extent `offset..=end()` within a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ByteExtent {
    pub offset: u64,
    pub length: u64,
}

impl ByteExtent {
    /// Returns `None` for an empty extent or one whose end overflows u64.
    pub fn new(offset: u64, length: u64) -> Option<Self> {
        if length == 0 || offset.checked_add(length - 1).is_none() {
            return None;
        }
        Some(Self { offset, length })
    }

    /// Inclusive end offset.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + (self.length - 1)
    }

    #[inline]
    pub fn contains(&self, position: u64) -> bool {
        position >= self.offset && position <= self.end()
    }

    pub fn to_range(&self) -> ContiguousRange {
        ContiguousRange::new(self.offset, self.end())
    }
}

/// A decodable unit (or pseudo-tile) and the bytes it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Tile {
    pub id: i64,
    pub extent: ByteExtent,
}

impl Tile {
    /// Pseudo-tiles (negative ids) describe structural regions such as the header.
    #[inline]
    pub fn is_pseudo(&self) -> bool {
        self.id < 0
    }
}

/// Tiles of one image-read operation, in discovery order.
///
/// Offset lookups use a sorted view built lazily on the first lookup after a
/// mutation; declaration is expected to finish before reads begin.
#[derive(Debug, Default)]
pub struct TileIndex {
    tiles: Vec<Tile>,
    by_id: HashMap<i64, usize>,
    by_offset: OnceLock<Vec<usize>>,
}

impl TileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tile.
    ///
    /// Duplicate ids are a contract violation; empty or overflowing extents are
    /// malformed collaborator metadata.
    pub fn add_tile(&mut self, id: i64, offset: u64, length: u64) -> Result<&Tile, AddTileError> {
        if self.by_id.contains_key(&id) {
            return Err(AddTileError::Tile(TileError::DuplicateTile(id)));
        }
        let extent = ByteExtent::new(offset, length)
            .ok_or(AddTileError::Config(ConfigError::InvalidExtent { id, offset, length }))?;

        let slot = self.tiles.len();
        self.tiles.push(Tile { id, extent });
        self.by_id.insert(id, slot);
        self.by_offset = OnceLock::new();
        Ok(&self.tiles[slot])
    }

    pub fn get(&self, id: i64) -> Option<&Tile> {
        self.by_id.get(&id).map(|&slot| &self.tiles[slot])
    }

    pub fn contains(&self, id: i64) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Byte length of a registered tile.
    pub fn tile_length(&self, id: i64) -> Option<u64> {
        self.get(id).map(|tile| tile.extent.length)
    }

    /// The first tile inserted.
    pub fn first(&self) -> Option<&Tile> {
        self.tiles.first()
    }

    /// The first inserted tile that is not a pseudo-tile.
    pub fn first_data_tile(&self) -> Option<&Tile> {
        self.tiles.iter().find(|tile| !tile.is_pseudo())
    }

    /// Tiles in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter()
    }

    /// Non-pseudo tiles in insertion order.
    pub fn data_tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter().filter(|tile| !tile.is_pseudo())
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// The tile whose extent contains `position`.
    pub fn find_owner(&self, position: u64) -> Result<&Tile, TileError> {
        let sorted = self.sorted();
        // Last tile starting at or before `position`
        let idx = sorted.partition_point(|&slot| self.tiles[slot].extent.offset <= position);
        if idx == 0 {
            return Err(TileError::PositionNotCovered(position));
        }
        let tile = &self.tiles[sorted[idx - 1]];
        if tile.extent.contains(position) {
            Ok(tile)
        } else {
            Err(TileError::PositionNotCovered(position))
        }
    }

    /// Shrink a tile to its first `new_length` bytes, or drop it when
    /// `new_length` is 0.
    pub fn truncate(&mut self, id: i64, new_length: u64) -> Result<(), TileError> {
        let slot = *self.by_id.get(&id).ok_or(TileError::UnknownTile(id))?;
        if new_length == 0 {
            self.remove(id);
            return Ok(());
        }
        let extent = &mut self.tiles[slot].extent;
        extent.length = extent.length.min(new_length);
        self.by_offset = OnceLock::new();
        Ok(())
    }

    /// Remove a tile, returning it if it was registered.
    pub fn remove(&mut self, id: i64) -> Option<Tile> {
        let slot = self.by_id.remove(&id)?;
        let tile = self.tiles.remove(slot);
        self.reindex();
        Some(tile)
    }

    /// Drop every non-pseudo tile, keeping pseudo-tiles such as the header.
    pub fn clear_data_tiles(&mut self) {
        self.tiles.retain(Tile::is_pseudo);
        self.reindex();
    }

    /// Report the first pair of tiles whose extents overlap.
    pub fn validate_disjoint(&self) -> Result<(), TileError> {
        let sorted = self.sorted();
        for pair in sorted.windows(2) {
            let (a, b) = (&self.tiles[pair[0]], &self.tiles[pair[1]]);
            if b.extent.offset <= a.extent.end() {
                return Err(TileError::OverlappingTiles {
                    first: a.id,
                    second: b.id,
                    offset: b.extent.offset,
                });
            }
        }
        Ok(())
    }

    /// Whether insertion order is also ascending offset order.
    pub fn is_ascending(&self) -> bool {
        self.data_tiles()
            .zip(self.data_tiles().skip(1))
            .all(|(a, b)| a.extent.offset < b.extent.offset)
    }

    fn sorted(&self) -> &[usize] {
        self.by_offset.get_or_init(|| {
            let mut slots: Vec<usize> = (0..self.tiles.len()).collect();
            slots.sort_by_key(|&slot| self.tiles[slot].extent.offset);
            slots
        })
    }

    fn reindex(&mut self) {
        self.by_id = self
            .tiles
            .iter()
            .enumerate()
            .map(|(slot, tile)| (tile.id, slot))
            .collect();
        self.by_offset = OnceLock::new();
    }
}

/// Failure to register a tile: either a contract violation or bad metadata.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddTileError {
    #[error(transparent)]
    Tile(#[from] TileError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<AddTileError> for crate::error::StreamError {
    fn from(err: AddTileError) -> Self {
        match err {
            AddTileError::Tile(e) => e.into(),
            AddTileError::Config(e) => e.into(),
        }
    }
}
