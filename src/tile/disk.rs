//! Optional disk tier behind the heap cache.
//!
//! Each entry is one file named by the SHA-256 of its key. The first byte
//! tags the payload: `0` for raw bytes, `1` for a little-endian `u64` size.
//! An in-memory LRU index tracks file sizes so the directory stays within its
//! byte budget; it is rebuilt from file modification times when the tier is
//! opened, so entries survive restarts.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use lru::LruCache;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::cache::{CacheKey, CacheValue};

const TAG_BYTES: u8 = 0;
const TAG_SIZE: u8 = 1;
const ENTRY_EXTENSION: &str = "entry";
const TMP_EXTENSION: &str = "tmp";

struct DiskIndex {
    lru: LruCache<String, u64>,
    total: u64,
}

pub(crate) struct DiskTier {
    dir: PathBuf,
    max_bytes: u64,
    ttl: Option<Duration>,
    index: Mutex<DiskIndex>,
    next_tmp: AtomicU64,
}

impl DiskTier {
    /// Open (creating if needed) a disk tier rooted at `dir`.
    pub(crate) async fn open(dir: &Path, max_bytes: u64, ttl: Option<Duration>) -> io::Result<Self> {
        fs::create_dir_all(dir).await?;

        let mut found: Vec<(SystemTime, String, u64)> = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some(ENTRY_EXTENSION) => {}
                Some(TMP_EXTENSION) => {
                    // Left behind by an interrupted store
                    let _ = fs::remove_file(&path).await;
                    continue;
                }
                _ => continue,
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let metadata = entry.metadata().await?;
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, name.to_string(), metadata.len()));
        }

        // Oldest first so the most recently written files end up most recent
        found.sort();

        let mut index = DiskIndex {
            lru: LruCache::unbounded(),
            total: 0,
        };
        for (_, name, len) in found {
            index.total += len;
            index.lru.push(name, len);
        }

        let tier = Self {
            dir: dir.to_path_buf(),
            max_bytes,
            ttl,
            index: Mutex::new(index),
            next_tmp: AtomicU64::new(0),
        };

        let mut index = tier.index.lock().await;
        debug!(path = %dir.display(), entries = index.lru.len(), bytes = index.total, "indexed disk cache");
        tier.evict_over_budget(&mut index).await;
        drop(index);

        Ok(tier)
    }

    pub(crate) async fn store(&self, key: &CacheKey, value: &CacheValue) -> io::Result<()> {
        let name = entry_name(key);
        let encoded = encode(value);
        let len = encoded.len() as u64;

        if len > self.max_bytes {
            debug!(key = ?key, len, "entry larger than disk budget, not stored");
            return Ok(());
        }

        let path = self.dir.join(&name);
        // Unique per write so concurrent stores of one key never share a file
        let seq = self.next_tmp.fetch_add(1, Ordering::Relaxed);
        let tmp = self.dir.join(format!("{name}.{seq}.{TMP_EXTENSION}"));
        if let Err(e) = fs::write(&tmp, &encoded).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }

        // Rename under the lock so the index records the size of the file that won
        let mut index = self.index.lock().await;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        if let Some(old) = index.lru.push(name.clone(), len).filter(|(k, _)| *k == name) {
            index.total = index.total.saturating_sub(old.1);
        }
        index.total += len;
        self.evict_over_budget(&mut index).await;
        Ok(())
    }

    /// Read an entry. Missing, expired or unreadable entries are misses.
    pub(crate) async fn load(&self, key: &CacheKey) -> Option<CacheValue> {
        let name = entry_name(key);
        {
            let mut index = self.index.lock().await;
            index.lru.get(&name)?;
        }

        let path = self.dir.join(&name);
        if self.is_expired(&path).await {
            debug!(key = ?key, "disk cache entry expired");
            self.forget(&name).await;
            return None;
        }

        match fs::read(&path).await {
            Ok(raw) => match decode(raw) {
                Some(value) => Some(value),
                None => {
                    warn!(path = %path.display(), "corrupt disk cache entry, discarding");
                    self.forget(&name).await;
                    None
                }
            },
            Err(e) => {
                debug!(path = %path.display(), error = %e, "disk cache entry unreadable");
                self.forget(&name).await;
                None
            }
        }
    }

    pub(crate) async fn contains(&self, key: &CacheKey) -> bool {
        let name = entry_name(key);
        if !self.index.lock().await.lru.contains(&name) {
            return false;
        }
        !self.is_expired(&self.dir.join(&name)).await
    }

    pub(crate) async fn remove(&self, key: &CacheKey) -> io::Result<()> {
        let name = entry_name(key);
        let mut index = self.index.lock().await;
        if let Some(len) = index.lru.pop(&name) {
            index.total = index.total.saturating_sub(len);
            remove_file_if_exists(&self.dir.join(&name)).await?;
        }
        Ok(())
    }

    pub(crate) async fn clear(&self) -> io::Result<()> {
        let mut index = self.index.lock().await;
        while let Some((name, _)) = index.lru.pop_lru() {
            remove_file_if_exists(&self.dir.join(&name)).await?;
        }
        index.total = 0;
        Ok(())
    }

    async fn is_expired(&self, path: &Path) -> bool {
        let Some(ttl) = self.ttl else {
            return false;
        };
        match fs::metadata(path).await.and_then(|m| m.modified()) {
            // A modification time in the future counts as age zero
            Ok(modified) => modified.elapsed().unwrap_or(Duration::ZERO) >= ttl,
            Err(_) => true,
        }
    }

    async fn forget(&self, name: &str) {
        let mut index = self.index.lock().await;
        if let Some(len) = index.lru.pop(name) {
            index.total = index.total.saturating_sub(len);
        }
        if let Err(e) = remove_file_if_exists(&self.dir.join(name)).await {
            warn!(entry = name, error = %e, "failed to delete disk cache entry");
        }
    }

    async fn evict_over_budget(&self, index: &mut DiskIndex) {
        while index.total > self.max_bytes {
            let Some((name, len)) = index.lru.pop_lru() else {
                break;
            };
            index.total = index.total.saturating_sub(len);
            if let Err(e) = remove_file_if_exists(&self.dir.join(&name)).await {
                warn!(entry = %name, error = %e, "failed to evict disk cache entry");
            }
        }
    }
}

fn entry_name(key: &CacheKey) -> String {
    let digest = Sha256::digest(key.storage_name().as_bytes());
    format!("{}.{ENTRY_EXTENSION}", hex::encode(digest))
}

fn encode(value: &CacheValue) -> Vec<u8> {
    match value {
        CacheValue::Bytes(data) => {
            let mut out = Vec::with_capacity(data.len() + 1);
            out.push(TAG_BYTES);
            out.extend_from_slice(data);
            out
        }
        CacheValue::Size(size) => {
            let mut out = Vec::with_capacity(9);
            out.push(TAG_SIZE);
            out.extend_from_slice(&size.to_le_bytes());
            out
        }
    }
}

fn decode(raw: Vec<u8>) -> Option<CacheValue> {
    let (&tag, rest) = raw.split_first()?;
    match tag {
        TAG_BYTES => Some(CacheValue::Bytes(Bytes::copy_from_slice(rest))),
        TAG_SIZE => {
            let bytes: [u8; 8] = rest.try_into().ok()?;
            Some(CacheValue::Size(u64::from_le_bytes(bytes)))
        }
        _ => None,
    }
}

async fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
