use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use url::Url;

use crate::error::IoError;

/// Opaque identity of a remote object, typically its URI.
///
/// Used both as the request target and as the cache-key namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(Arc<str>);

impl ResourceId {
    pub fn new(uri: impl Into<Arc<str>>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shared handle to the underlying string, for cache keys.
    pub fn as_arc(&self) -> Arc<str> {
        Arc::clone(&self.0)
    }

    /// Parse the identity as a URL.
    pub fn to_url(&self) -> Result<Url, IoError> {
        Url::parse(&self.0).map_err(|e| IoError::InvalidResource {
            uri: self.0.to_string(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// An inclusive byte range submitted to the network layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ContiguousRange {
    pub start: u64,
    pub end: u64,
}

impl ContiguousRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    /// Number of bytes covered by the range.
    #[inline]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false: a range covers at least one byte.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `[offset, offset + length)` lies entirely inside this range.
    pub fn contains_extent(&self, offset: u64, length: u64) -> bool {
        length > 0 && offset >= self.start && offset + (length - 1) <= self.end
    }

    /// Value for an HTTP `Range` header: "bytes=start-end" (inclusive).
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ContiguousRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Trait for reading byte ranges from remote resources.
///
/// Implementations must be thread-safe; one source serves every resource of
/// its scheme.
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Total length of the resource in bytes, from a metadata-only request.
    async fn content_length(&self, resource: &ResourceId) -> Result<u64, IoError>;

    /// Read the bytes of `range`.
    ///
    /// May return fewer bytes than requested when the range runs past the end
    /// of the resource; callers decide whether that is acceptable.
    async fn read_range(&self, resource: &ResourceId, range: ContiguousRange)
        -> Result<Bytes, IoError>;
}

// =============================================================================
// Endian Helper Functions
// =============================================================================
//
// The byte order of a TIFF stream is chosen by its header. The stream keeps it
// as a pass-through property and uses these helpers for typed reads.

/// Read a little-endian u16 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 2 bytes.
#[inline]
pub fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Read a big-endian u16 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 2 bytes.
#[inline]
pub fn read_u16_be(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

/// Read a little-endian u32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a big-endian u32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a little-endian u64 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 8 bytes.
#[inline]
pub fn read_u64_le(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Read a big-endian u64 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 8 bytes.
#[inline]
pub fn read_u64_be(bytes: &[u8]) -> u64 {
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}
