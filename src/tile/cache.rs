//! Shared cache for tile bytes, header bytes and resource sizes.
//!
//! # Namespaces
//!
//! One backing LRU store holds three kinds of entries:
//! - tile bytes keyed by `(resource, tile id)`
//! - header bytes keyed by resource
//! - total file size keyed by resource
//!
//! # Eviction
//!
//! The store is bounded by an entry count and a byte budget (least recently
//! used entries go first). Entries can also expire after a period without
//! access (time-to-idle) or a fixed time after insertion (time-to-live).
//! Expired entries read as misses.
//!
//! A miss is never an error: callers fetch again.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::disk::DiskTier;
use crate::config::CacheConfig;
use crate::error::ConfigError;
use crate::io::ResourceId;

/// Default heap budget: 50MB
pub const DEFAULT_HEAP_CAPACITY: usize = 50 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Bytes charged for a file-size entry.
const SIZE_ENTRY_WEIGHT: usize = std::mem::size_of::<u64>();

// =============================================================================
// Cache Keys
// =============================================================================

/// Key of a cached tile payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheEntryKey {
    /// Resource identity (URI)
    pub resource: Arc<str>,

    /// Decoder-assigned tile id
    pub tile_id: i64,
}

impl CacheEntryKey {
    pub fn new(resource: impl Into<Arc<str>>, tile_id: i64) -> Self {
        Self {
            resource: resource.into(),
            tile_id,
        }
    }
}

/// Key across all namespaces of the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum CacheKey {
    Tile(CacheEntryKey),
    Header(Arc<str>),
    FileSize(Arc<str>),
}

impl CacheKey {
    /// Stable textual form, used to name disk entries.
    pub(crate) fn storage_name(&self) -> String {
        match self {
            CacheKey::Tile(key) => format!("tile\n{}\n{}", key.resource, key.tile_id),
            CacheKey::Header(resource) => format!("header\n{resource}"),
            CacheKey::FileSize(resource) => format!("filesize\n{resource}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CacheValue {
    Bytes(Bytes),
    Size(u64),
}

impl CacheValue {
    fn weight(&self) -> usize {
        match self {
            CacheValue::Bytes(b) => b.len(),
            CacheValue::Size(_) => SIZE_ENTRY_WEIGHT,
        }
    }

    fn into_bytes(self) -> Option<Bytes> {
        match self {
            CacheValue::Bytes(b) => Some(b),
            CacheValue::Size(_) => None,
        }
    }

    fn into_size(self) -> Option<u64> {
        match self {
            CacheValue::Size(s) => Some(s),
            CacheValue::Bytes(_) => None,
        }
    }
}

// =============================================================================
// Eviction Policy
// =============================================================================

/// Bounds applied to the heap store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Maximum total bytes held
    pub max_bytes: usize,

    /// Maximum number of entries
    pub max_entries: usize,

    /// Expire entries not read for this long
    pub time_to_idle: Option<Duration>,

    /// Expire entries this long after insertion
    pub time_to_live: Option<Duration>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_HEAP_CAPACITY,
            max_entries: DEFAULT_MAX_ENTRIES,
            time_to_idle: None,
            time_to_live: None,
        }
    }
}

impl CachePolicy {
    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        if let Some(ttl) = self.time_to_live {
            if now.duration_since(entry.inserted) >= ttl {
                return true;
            }
        }
        if let Some(tti) = self.time_to_idle {
            if now.duration_since(entry.last_access) >= tti {
                return true;
            }
        }
        false
    }
}

struct Entry {
    value: CacheValue,
    inserted: Instant,
    last_access: Instant,
}

struct Store {
    lru: LruCache<CacheKey, Entry>,
    current_size: usize,
}

impl Store {
    fn insert(&mut self, key: CacheKey, value: CacheValue, now: Instant, max_bytes: usize) {
        let weight = value.weight();
        let entry = Entry {
            value,
            inserted: now,
            last_access: now,
        };

        // push returns either the replaced value for this key or the entry
        // evicted by the entry-count bound
        if let Some((_, old)) = self.lru.push(key, entry) {
            self.current_size = self.current_size.saturating_sub(old.value.weight());
        }
        self.current_size += weight;

        while self.current_size > max_bytes {
            match self.lru.pop_lru() {
                Some((_, evicted)) => {
                    self.current_size = self.current_size.saturating_sub(evicted.value.weight());
                }
                None => break,
            }
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<CacheValue> {
        let entry = self.lru.pop(key)?;
        self.current_size = self.current_size.saturating_sub(entry.value.weight());
        Some(entry.value)
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

/// Process-wide cache shared by every stream through an `Arc`.
///
/// # Example
///
/// ```
/// use cog_stream::tile::TileCache;
/// use cog_stream::io::ResourceId;
/// use bytes::Bytes;
///
/// #[tokio::main]
/// async fn main() {
///     let cache = TileCache::new();
///     let resource = ResourceId::from("https://example.com/cog.tif");
///
///     cache.put_tile(&resource, 7, Bytes::from_static(b"tile")).await;
///     assert!(cache.contains_tile(&resource, 7).await);
///     assert_eq!(cache.get_tile(&resource, 7).await, Some(Bytes::from_static(b"tile")));
/// }
/// ```
pub struct TileCache {
    store: RwLock<Store>,
    policy: CachePolicy,
    disk: Option<DiskTier>,
}

impl TileCache {
    /// Heap-only cache with the default policy (50MB, 10k entries, no expiry).
    pub fn new() -> Self {
        Self::with_policy(CachePolicy::default())
    }

    /// Heap-only cache with a byte budget.
    pub fn with_capacity(max_bytes: usize) -> Self {
        Self::with_policy(CachePolicy {
            max_bytes,
            ..CachePolicy::default()
        })
    }

    pub fn with_policy(policy: CachePolicy) -> Self {
        let entries = NonZeroUsize::new(policy.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            store: RwLock::new(Store {
                lru: LruCache::new(entries),
                current_size: 0,
            }),
            policy,
            disk: None,
        }
    }

    /// Build a cache from configuration, opening the disk tier when enabled.
    pub async fn from_config(config: &CacheConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        if config.use_off_heap {
            warn!("off-heap cache tier is not supported, ignoring");
        }

        let mut cache = Self::with_policy(config.policy());
        if config.use_disk {
            let dir = config.disk_path.clone();
            let disk = DiskTier::open(&dir, config.disk_cache_size, config.time_to_live())
                .await
                .map_err(|e| {
                    ConfigError::Invalid(format!("cannot open disk cache at {}: {e}", dir.display()))
                })?;
            debug!(path = %dir.display(), budget = config.disk_cache_size, "disk cache tier enabled");
            cache.disk = Some(disk);
        }
        Ok(cache)
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn has_disk_tier(&self) -> bool {
        self.disk.is_some()
    }

    // -------------------------------------------------------------------------
    // Tile namespace
    // -------------------------------------------------------------------------

    pub async fn get_tile(&self, resource: &ResourceId, tile_id: i64) -> Option<Bytes> {
        self.get(&tile_key(resource, tile_id)).await?.into_bytes()
    }

    pub async fn put_tile(&self, resource: &ResourceId, tile_id: i64, data: Bytes) {
        self.put(tile_key(resource, tile_id), CacheValue::Bytes(data))
            .await;
    }

    /// Insert several tiles of one resource under a single write lock, so a
    /// reader never observes half of them.
    pub async fn put_tiles(&self, resource: &ResourceId, tiles: Vec<(i64, Bytes)>) {
        let entries: Vec<(CacheKey, CacheValue)> = tiles
            .into_iter()
            .map(|(id, data)| (tile_key(resource, id), CacheValue::Bytes(data)))
            .collect();

        {
            let mut store = self.store.write().await;
            let now = Instant::now();
            for (key, value) in &entries {
                store.insert(key.clone(), value.clone(), now, self.policy.max_bytes);
            }
        }

        if let Some(disk) = &self.disk {
            for (key, value) in &entries {
                self.write_through(disk, key, value).await;
            }
        }
    }

    pub async fn contains_tile(&self, resource: &ResourceId, tile_id: i64) -> bool {
        self.contains(&tile_key(resource, tile_id)).await
    }

    pub async fn remove_tile(&self, resource: &ResourceId, tile_id: i64) -> Option<Bytes> {
        self.remove(&tile_key(resource, tile_id)).await?.into_bytes()
    }

    // -------------------------------------------------------------------------
    // Header namespace
    // -------------------------------------------------------------------------

    pub async fn get_header(&self, resource: &ResourceId) -> Option<Bytes> {
        self.get(&CacheKey::Header(resource.as_arc())).await?.into_bytes()
    }

    pub async fn put_header(&self, resource: &ResourceId, data: Bytes) {
        self.put(CacheKey::Header(resource.as_arc()), CacheValue::Bytes(data))
            .await;
    }

    pub async fn contains_header(&self, resource: &ResourceId) -> bool {
        self.contains(&CacheKey::Header(resource.as_arc())).await
    }

    pub async fn remove_header(&self, resource: &ResourceId) -> Option<Bytes> {
        self.remove(&CacheKey::Header(resource.as_arc())).await?.into_bytes()
    }

    // -------------------------------------------------------------------------
    // File-size namespace
    // -------------------------------------------------------------------------

    pub async fn get_file_size(&self, resource: &ResourceId) -> Option<u64> {
        self.get(&CacheKey::FileSize(resource.as_arc())).await?.into_size()
    }

    pub async fn put_file_size(&self, resource: &ResourceId, size: u64) {
        self.put(CacheKey::FileSize(resource.as_arc()), CacheValue::Size(size))
            .await;
    }

    pub async fn contains_file_size(&self, resource: &ResourceId) -> bool {
        self.contains(&CacheKey::FileSize(resource.as_arc())).await
    }

    // -------------------------------------------------------------------------
    // Whole-store operations
    // -------------------------------------------------------------------------

    /// Clear all entries from the cache (both tiers).
    pub async fn clear(&self) {
        {
            let mut store = self.store.write().await;
            store.lru.clear();
            store.current_size = 0;
        }
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.clear().await {
                warn!(error = %e, "failed to clear disk cache tier");
            }
        }
    }

    /// Number of entries held on the heap, across all namespaces.
    pub async fn len(&self) -> usize {
        self.store.read().await.lru.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.lru.is_empty()
    }

    /// Bytes held on the heap.
    pub async fn size(&self) -> usize {
        self.store.read().await.current_size
    }

    /// Heap byte budget.
    pub fn capacity(&self) -> usize {
        self.policy.max_bytes
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn get(&self, key: &CacheKey) -> Option<CacheValue> {
        {
            let mut store = self.store.write().await;
            let now = Instant::now();
            let expired = match store.lru.get_mut(key) {
                Some(entry) if !self.policy.is_expired(entry, now) => {
                    entry.last_access = now;
                    return Some(entry.value.clone());
                }
                Some(_) => true,
                None => false,
            };
            if expired {
                debug!(key = ?key, "cache entry expired");
                store.remove(key);
            }
        }

        let disk = self.disk.as_ref()?;
        let value = disk.load(key).await?;
        // Promote without writing back to disk
        let mut store = self.store.write().await;
        store.insert(key.clone(), value.clone(), Instant::now(), self.policy.max_bytes);
        Some(value)
    }

    async fn put(&self, key: CacheKey, value: CacheValue) {
        {
            let mut store = self.store.write().await;
            store.insert(key.clone(), value.clone(), Instant::now(), self.policy.max_bytes);
        }
        if let Some(disk) = &self.disk {
            self.write_through(disk, &key, &value).await;
        }
    }

    async fn contains(&self, key: &CacheKey) -> bool {
        {
            let store = self.store.read().await;
            if let Some(entry) = store.lru.peek(key) {
                if !self.policy.is_expired(entry, Instant::now()) {
                    return true;
                }
            }
        }
        match &self.disk {
            Some(disk) => disk.contains(key).await,
            None => false,
        }
    }

    async fn remove(&self, key: &CacheKey) -> Option<CacheValue> {
        let removed = self.store.write().await.remove(key);
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.remove(key).await {
                warn!(key = ?key, error = %e, "failed to remove disk cache entry");
            }
        }
        removed
    }

    async fn write_through(&self, disk: &DiskTier, key: &CacheKey, value: &CacheValue) {
        if let Err(e) = disk.store(key, value).await {
            warn!(key = ?key, error = %e, "failed to write disk cache entry");
        }
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

fn tile_key(resource: &ResourceId, tile_id: i64) -> CacheKey {
    CacheKey::Tile(CacheEntryKey::new(resource.as_arc(), tile_id))
}

// =============================================================================
// Tests
// =============================================================================
