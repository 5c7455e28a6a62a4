use thiserror::Error;

/// I/O errors that can occur when reading from remote storage
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Transport-level HTTP failure (DNS, TLS, reset connection, ...)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Server answered a range request with a non-success status
    #[error("HTTP {status} for range starting at offset {offset}")]
    HttpStatus { status: u16, offset: u64 },

    /// A single range request exceeded the per-request timeout
    #[error("Range request starting at offset {offset} timed out after {timeout_ms}ms")]
    Timeout { offset: u64, timeout_ms: u64 },

    /// Server returned fewer bytes than the range asked for
    #[error("Short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// The resource did not report its total length
    #[error("Size metadata unavailable for {0}")]
    SizeUnavailable(String),

    /// Resource identity could not be turned into a request target
    #[error("Invalid resource URI {uri}: {reason}")]
    InvalidResource { uri: String, reason: String },

    /// One range of a concurrent fetch failed, failing the whole join
    #[error("Partial range fetch failure for range {start}-{end}: {source}")]
    PartialFetch {
        start: u64,
        end: u64,
        #[source]
        source: Box<IoError>,
    },

    /// A fetch task panicked or was cancelled before completing
    #[error("Fetch task did not complete: {0}")]
    TaskFailed(String),
}

/// Caller-contract violations on the tile index and the read path
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileError {
    /// A tile id was registered twice in the same index
    #[error("Tile {0} is already registered")]
    DuplicateTile(i64),

    /// A read position falls outside every declared tile
    #[error("Position {0} is not covered by any registered tile")]
    PositionNotCovered(u64),

    /// A read window extends past the end of the tile that owns its start
    #[error(
        "Read of {length} bytes at {position} crosses the boundary of tile {tile_id} \
         ({tile_start}-{tile_end})"
    )]
    ReadCrossesTileBoundary {
        position: u64,
        length: u64,
        tile_id: i64,
        tile_start: u64,
        tile_end: u64,
    },

    /// Two registered extents claim the same bytes
    #[error("Tile {first} overlaps tile {second} at offset {offset}")]
    OverlappingTiles { first: i64, second: i64, offset: u64 },

    /// No tile with this id is registered
    #[error("Unknown tile {0}")]
    UnknownTile(i64),
}

/// Malformed configuration or collaborator-supplied sizing metadata
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A tile extent is empty or its end overflows u64
    #[error("Invalid extent for tile {id}: offset {offset}, length {length}")]
    InvalidExtent { id: i64, offset: u64, length: u64 },

    /// Required offset/byte-count metadata is missing for a tile
    #[error("Missing {field} for tile {tile_index}")]
    MissingTileMetadata {
        field: &'static str,
        tile_index: usize,
    },

    /// Tile layout geometry is unusable (zero-sized tiles, empty image, ...)
    #[error("Invalid tile layout: {0}")]
    InvalidLayout(String),

    /// A configuration value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors surfaced by [`crate::stream::RandomAccessTileStream`]
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Network or storage failure (bootstrap or prepare)
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Caller-contract violation
    #[error("Tile error: {0}")]
    Tile(#[from] TileError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A prepared tile vanished from the cache before it was read.
    ///
    /// The caller should prepare the tile again.
    #[error("Tile {tile_id} of {resource} is no longer cached; prepare it again")]
    TileEvicted { resource: String, tile_id: i64 },
}

impl StreamError {
    /// Whether this error belongs to the network-failure class (including
    /// evictions that require a re-fetch).
    pub fn is_network(&self) -> bool {
        matches!(self, StreamError::Io(_) | StreamError::TileEvicted { .. })
    }
}
