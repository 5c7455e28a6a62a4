//! Configuration management for cog-stream.
//!
//! This module provides a layered configuration system:
//! - Command-line arguments via clap
//! - Environment variables with `COG_CACHING_` / `COG_FETCH_` prefixes
//! - Sensible defaults for all settings
//!
//! Library users that do not parse a command line call
//! [`CacheConfig::from_env`] / [`FetchConfig::from_env`] and apply explicit
//! overrides with the `with_*` setters.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use cog_stream::config::CacheConfig;
//!
//! let config = CacheConfig::default()
//!     .with_heap_size(8 * 1024 * 1024)
//!     .with_time_to_live(Duration::from_secs(300));
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Environment Variables
//!
//! - `COG_CACHING_HEAP_SIZE` - Heap cache budget in bytes (default: 50MB)
//! - `COG_CACHING_MAX_ENTRIES` - Maximum cached entries (default: 10000)
//! - `COG_CACHING_USE_DISK` - Enable the disk tier (default: false)
//! - `COG_CACHING_USE_OFF_HEAP` - Accepted and ignored (no off-heap tier)
//! - `COG_CACHING_DISK_CACHE_SIZE` - Disk tier budget in bytes (default: 500MB)
//! - `COG_CACHING_DISK_PATH` - Disk tier directory (default: cog-cache)
//! - `COG_CACHING_TIME_TO_IDLE` - Idle expiry in seconds, 0 disables (default: 0)
//! - `COG_CACHING_TIME_TO_LIVE` - Age expiry in seconds, 0 disables (default: 0)
//! - `COG_FETCH_TIMEOUT` - Per-request timeout in seconds, fractions allowed (default: 5)
//! - `COG_FETCH_HEADER_SIZE` - Header bytes fetched at open (default: 16384)
//! - `COG_S3_ENDPOINT` / `COG_S3_REGION` - S3 client settings for `s3://` URIs

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser};

use crate::error::ConfigError;
use crate::tile::{CachePolicy, TileExtent, DEFAULT_HEAP_CAPACITY, DEFAULT_MAX_ENTRIES};

// =============================================================================
// Default Values
// =============================================================================

/// Default disk tier budget (500MB).
pub const DEFAULT_DISK_CACHE_SIZE: u64 = 500 * 1024 * 1024;

/// Default disk tier directory.
pub const DEFAULT_DISK_PATH: &str = "cog-cache";

/// Default per-request timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 5;

/// Default number of header bytes fetched when a stream opens.
pub const DEFAULT_HEADER_SIZE: u64 = 16384;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

// =============================================================================
// Cache Configuration
// =============================================================================

/// Settings of the shared tile cache.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Heap cache budget in bytes.
    #[arg(long = "cache-heap-size", default_value_t = DEFAULT_HEAP_CAPACITY, env = "COG_CACHING_HEAP_SIZE")]
    pub heap_size: usize,

    /// Maximum number of cached entries across all namespaces.
    #[arg(long = "cache-max-entries", default_value_t = DEFAULT_MAX_ENTRIES, env = "COG_CACHING_MAX_ENTRIES")]
    pub max_entries: usize,

    /// Write cached entries through to a local directory.
    #[arg(long = "cache-use-disk", env = "COG_CACHING_USE_DISK")]
    pub use_disk: bool,

    /// Off-heap tier; accepted for compatibility and ignored.
    #[arg(long = "cache-use-off-heap", env = "COG_CACHING_USE_OFF_HEAP")]
    pub use_off_heap: bool,

    /// Disk tier budget in bytes.
    #[arg(long = "cache-disk-size", default_value_t = DEFAULT_DISK_CACHE_SIZE, env = "COG_CACHING_DISK_CACHE_SIZE")]
    pub disk_cache_size: u64,

    /// Disk tier directory.
    #[arg(long = "cache-disk-path", default_value = DEFAULT_DISK_PATH, env = "COG_CACHING_DISK_PATH")]
    pub disk_path: PathBuf,

    /// Expire entries not read for this many seconds (0 disables).
    #[arg(long = "cache-time-to-idle", default_value_t = 0, env = "COG_CACHING_TIME_TO_IDLE")]
    pub time_to_idle_secs: u64,

    /// Expire entries this many seconds after insertion (0 disables).
    #[arg(long = "cache-time-to-live", default_value_t = 0, env = "COG_CACHING_TIME_TO_LIVE")]
    pub time_to_live_secs: u64,
}

#[derive(Parser)]
struct CacheEnv {
    #[command(flatten)]
    cache: CacheConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            heap_size: DEFAULT_HEAP_CAPACITY,
            max_entries: DEFAULT_MAX_ENTRIES,
            use_disk: false,
            use_off_heap: false,
            disk_cache_size: DEFAULT_DISK_CACHE_SIZE,
            disk_path: PathBuf::from(DEFAULT_DISK_PATH),
            time_to_idle_secs: 0,
            time_to_live_secs: 0,
        }
    }
}

impl CacheConfig {
    /// Resolve every setting from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        CacheEnv::try_parse_from(["cog-stream"])
            .map(|env| env.cache)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn with_heap_size(mut self, bytes: usize) -> Self {
        self.heap_size = bytes;
        self
    }

    pub fn with_max_entries(mut self, entries: usize) -> Self {
        self.max_entries = entries;
        self
    }

    /// Enable the disk tier at `path` with a byte budget.
    pub fn with_disk(mut self, path: impl Into<PathBuf>, budget: u64) -> Self {
        self.use_disk = true;
        self.disk_path = path.into();
        self.disk_cache_size = budget;
        self
    }

    pub fn with_time_to_idle(mut self, tti: Duration) -> Self {
        self.time_to_idle_secs = tti.as_secs();
        self
    }

    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live_secs = ttl.as_secs();
        self
    }

    pub fn time_to_idle(&self) -> Option<Duration> {
        (self.time_to_idle_secs > 0).then(|| Duration::from_secs(self.time_to_idle_secs))
    }

    pub fn time_to_live(&self) -> Option<Duration> {
        (self.time_to_live_secs > 0).then(|| Duration::from_secs(self.time_to_live_secs))
    }

    /// Eviction policy of the heap store.
    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            max_bytes: self.heap_size,
            max_entries: self.max_entries,
            time_to_idle: self.time_to_idle(),
            time_to_live: self.time_to_live(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heap_size == 0 {
            return Err(ConfigError::Invalid("cache heap size must be greater than 0".into()));
        }
        if self.max_entries == 0 {
            return Err(ConfigError::Invalid("cache max entries must be greater than 0".into()));
        }
        if self.use_disk {
            if self.disk_path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(
                    "disk cache enabled but no path set. Set --cache-disk-path or COG_CACHING_DISK_PATH"
                        .into(),
                ));
            }
            if self.disk_cache_size == 0 {
                return Err(ConfigError::Invalid("disk cache size must be greater than 0".into()));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Fetch Configuration
// =============================================================================

/// Settings of the range fetch client and stream bootstrap.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Per-request timeout in seconds, fractions allowed (stored in milliseconds).
    #[arg(
        long = "fetch-timeout",
        default_value = "5",
        value_parser = parse_timeout_secs,
        env = "COG_FETCH_TIMEOUT"
    )]
    pub timeout_ms: u64,

    /// Bytes fetched from the start of the resource when a stream opens.
    #[arg(long = "header-size", default_value_t = DEFAULT_HEADER_SIZE, env = "COG_FETCH_HEADER_SIZE")]
    pub header_size: u64,
}

#[derive(Parser)]
struct FetchEnv {
    #[command(flatten)]
    fetch: FetchConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_FETCH_TIMEOUT_SECS * 1000,
            header_size: DEFAULT_HEADER_SIZE,
        }
    }
}

impl FetchConfig {
    /// Resolve every setting from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        FetchEnv::try_parse_from(["cog-stream"])
            .map(|env| env.fetch)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Override the per-request timeout, rounded up to whole milliseconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX);
        self
    }

    pub fn with_header_size(mut self, bytes: u64) -> Self {
        self.header_size = bytes;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("fetch timeout must be greater than 0".into()));
        }
        if self.header_size == 0 {
            return Err(ConfigError::Invalid("header size must be greater than 0".into()));
        }
        Ok(())
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// A byte window to read after preparing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadWindow {
    pub position: u64,
    pub length: usize,
}

/// cog-stream - random-access reads over remote Cloud-Optimized GeoTIFFs.
///
/// Declares tiles of a remote image, fetches them with as few HTTP range
/// requests as possible and optionally reads a byte window from the prepared
/// tiles.
#[derive(Parser, Debug, Clone)]
#[command(name = "cog-stream")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Resource URI (http://, https:// or s3://bucket/key).
    pub uri: String,

    /// Tile to prepare, as ID:OFFSET:LENGTH. Repeat in ascending offset order.
    #[arg(short, long = "tile", value_name = "ID:OFFSET:LENGTH", value_parser = parse_tile_spec, allow_hyphen_values = true)]
    pub tiles: Vec<TileExtent>,

    /// Byte window to read after preparing, as POSITION:LENGTH.
    #[arg(long, value_name = "POS:LEN", value_parser = parse_read_window)]
    pub read: Option<ReadWindow>,

    /// Print the prepare report as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "COG_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "COG_S3_REGION")]
    pub s3_region: String,

    #[command(flatten)]
    pub cache: CacheConfig,

    #[command(flatten)]
    pub fetch: FetchConfig,
}

impl Cli {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.fetch.validate()
    }
}

/// Seconds, possibly fractional, to whole milliseconds.
fn parse_timeout_secs(s: &str) -> Result<u64, String> {
    let secs: f64 = s
        .trim()
        .parse()
        .map_err(|e| format!("invalid timeout '{s}': {e}"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("invalid timeout '{s}': must be a non-negative number of seconds"));
    }
    Ok((secs * 1000.0).round() as u64)
}

fn parse_tile_spec(s: &str) -> Result<TileExtent, String> {
    // The id may be negative, so split from the right
    let mut parts = s.rsplitn(3, ':');
    let (Some(length), Some(offset), Some(id)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected ID:OFFSET:LENGTH, got '{s}'"));
    };
    Ok(TileExtent {
        id: id.parse().map_err(|e| format!("invalid tile id '{id}': {e}"))?,
        offset: offset
            .parse()
            .map_err(|e| format!("invalid offset '{offset}': {e}"))?,
        length: length
            .parse()
            .map_err(|e| format!("invalid length '{length}': {e}"))?,
    })
}

fn parse_read_window(s: &str) -> Result<ReadWindow, String> {
    let (position, length) = s
        .split_once(':')
        .ok_or_else(|| format!("expected POS:LEN, got '{s}'"))?;
    Ok(ReadWindow {
        position: position
            .parse()
            .map_err(|e| format!("invalid position '{position}': {e}"))?,
        length: length
            .parse()
            .map_err(|e| format!("invalid length '{length}': {e}"))?,
    })
}

// =============================================================================
// Tests
// =============================================================================
