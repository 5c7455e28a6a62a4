//! Tile-grid geometry supplied by the container-format collaborator.
//!
//! A decoder that already parsed the TIFF tags describes the image as a
//! [`TileLayout`]. The layout turns a pixel region into the ordered
//! `(tile id, offset, length)` triples the stream needs to prepare, so the
//! stream never has to reach into decoder internals.

use serde::Serialize;
use tracing::warn;

use crate::error::ConfigError;

/// One tile a decode will touch, as reported by the collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileExtent {
    pub id: i64,
    pub offset: u64,
    pub length: u64,
}

/// A rectangle of pixels in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Capability the container-format collaborator exposes so a stream can
/// prepare every tile a region read needs.
pub trait RegionPlanner {
    /// Tiles covering `region`, in declaration order.
    ///
    /// `stream_length` is the resource length when known; it clamps estimated
    /// byte counts.
    fn plan_region(
        &self,
        region: PixelRegion,
        stream_length: Option<u64>,
    ) -> Result<Vec<TileExtent>, ConfigError>;
}

/// How samples of one pixel are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanarConfiguration {
    /// All samples of a pixel are interleaved in one tile.
    Chunky,
    /// Each band is stored in its own set of tiles.
    Planar,
}

/// Regular tile grid of one image.
#[derive(Debug, Clone)]
pub struct TileLayout {
    pub image_width: u32,
    pub image_height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    /// Bits per sample, one entry per band.
    pub bits_per_sample: Vec<u16>,
    pub planar: PlanarConfiguration,
    /// TileOffsets, indexed by tile index.
    pub offsets: Vec<u64>,
    /// TileByteCounts; `None` when the file omits them.
    pub byte_counts: Option<Vec<u64>>,
}

impl TileLayout {
    pub fn tiles_across(&self) -> u32 {
        self.image_width.div_ceil(self.tile_width)
    }

    pub fn tiles_down(&self) -> u32 {
        self.image_height.div_ceil(self.tile_height)
    }

    fn bands(&self) -> usize {
        match self.planar {
            PlanarConfiguration::Chunky => 1,
            PlanarConfiguration::Planar => self.bits_per_sample.len().max(1),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(ConfigError::InvalidLayout("tile dimensions must be non-zero".into()));
        }
        if self.image_width == 0 || self.image_height == 0 {
            return Err(ConfigError::InvalidLayout("image dimensions must be non-zero".into()));
        }
        if self.bits_per_sample.is_empty() {
            return Err(ConfigError::InvalidLayout("missing bits per sample".into()));
        }
        Ok(())
    }

    /// Byte count of tile `index`, from TileByteCounts or estimated from the
    /// tile geometry.
    pub fn byte_count(
        &self,
        index: usize,
        band: usize,
        stream_length: Option<u64>,
    ) -> Result<u64, ConfigError> {
        if let Some(counts) = &self.byte_counts {
            return counts
                .get(index)
                .copied()
                .ok_or(ConfigError::MissingTileMetadata {
                    field: "byte count",
                    tile_index: index,
                });
        }

        let bits_per_pixel: u64 = match self.planar {
            PlanarConfiguration::Chunky => self.bits_per_sample.iter().map(|&b| b as u64).sum(),
            PlanarConfiguration::Planar => self
                .bits_per_sample
                .get(band)
                .or_else(|| self.bits_per_sample.first())
                .map(|&b| b as u64)
                .unwrap_or(0),
        };
        let bytes_per_row = (self.tile_width as u64 * bits_per_pixel).div_ceil(8);
        let estimate = bytes_per_row * self.tile_height as u64;

        match stream_length {
            Some(len) => {
                let offset = self.offset(index)?;
                if offset >= len {
                    return Err(ConfigError::InvalidExtent {
                        id: index as i64,
                        offset,
                        length: estimate,
                    });
                }
                Ok(estimate.min(len - offset))
            }
            None => {
                warn!(
                    tile_index = index,
                    estimate, "stream length is unknown, cannot clamp estimated tile byte count"
                );
                Ok(estimate)
            }
        }
    }

    fn offset(&self, index: usize) -> Result<u64, ConfigError> {
        self.offsets
            .get(index)
            .copied()
            .ok_or(ConfigError::MissingTileMetadata {
                field: "offset",
                tile_index: index,
            })
    }
}

impl RegionPlanner for TileLayout {
    /// Row-major over the covered tiles. Planar layouts iterate band by band
    /// so that declaration order follows the file's ascending offsets.
    fn plan_region(
        &self,
        region: PixelRegion,
        stream_length: Option<u64>,
    ) -> Result<Vec<TileExtent>, ConfigError> {
        self.validate()?;
        if region.width == 0 || region.height == 0 {
            return Ok(Vec::new());
        }
        if region.x >= self.image_width || region.y >= self.image_height {
            return Err(ConfigError::InvalidLayout(format!(
                "region origin ({}, {}) outside {}x{} image",
                region.x, region.y, self.image_width, self.image_height
            )));
        }

        let across = self.tiles_across();
        let down = self.tiles_down();
        let last_x = region.x.saturating_add(region.width - 1).min(self.image_width - 1);
        let last_y = region.y.saturating_add(region.height - 1).min(self.image_height - 1);
        let (min_tx, max_tx) = (region.x / self.tile_width, last_x / self.tile_width);
        let (min_ty, max_ty) = (region.y / self.tile_height, last_y / self.tile_height);

        let per_band = across as usize * down as usize;
        let mut tiles = Vec::new();
        for band in 0..self.bands() {
            for ty in min_ty..=max_ty {
                for tx in min_tx..=max_tx {
                    let index = band * per_band + ty as usize * across as usize + tx as usize;
                    let offset = self.offset(index)?;
                    let length = self.byte_count(index, band, stream_length)?;
                    tiles.push(TileExtent {
                        id: index as i64,
                        offset,
                        length,
                    });
                }
            }
        }
        Ok(tiles)
    }
}
