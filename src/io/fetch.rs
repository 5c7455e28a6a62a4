use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info};

use super::range_source::{ContiguousRange, RangeSource, ResourceId};
use crate::error::{ConfigError, IoError};

/// Default per-request timeout: 5 seconds.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Executes range reads against a [`RangeSource`].
///
/// - `resolve_size` is memoized per resource for the lifetime of the client
/// - `fetch_range` is a single request, used to bootstrap header reads
/// - `fetch_ranges_concurrently` spawns one task per range and joins them all
///   before returning
///
/// The timeout applies to every individual request, never to a whole join.
pub struct RangeFetchClient {
    source: Arc<dyn RangeSource>,
    timeout: Duration,
    sizes: RwLock<HashMap<ResourceId, u64>>,
}

impl RangeFetchClient {
    /// Create a client with the default per-request timeout (5s).
    pub fn new(source: Arc<dyn RangeSource>) -> Self {
        Self {
            source,
            timeout: DEFAULT_FETCH_TIMEOUT,
            sizes: RwLock::new(HashMap::new()),
        }
    }

    /// Create a client with a custom per-request timeout.
    ///
    /// A zero timeout would disable the bound and is rejected.
    pub fn with_timeout(source: Arc<dyn RangeSource>, timeout: Duration) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "fetch timeout must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            source,
            timeout,
            sizes: RwLock::new(HashMap::new()),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Total byte length of `resource`. Only the first call per resource
    /// reaches the network.
    pub async fn resolve_size(&self, resource: &ResourceId) -> Result<u64, IoError> {
        if let Some(size) = self.sizes.read().await.get(resource) {
            return Ok(*size);
        }

        let size = match tokio::time::timeout(self.timeout, self.source.content_length(resource)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(IoError::Timeout {
                    offset: 0,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        };

        debug!(resource = %resource, size, "resolved resource size");
        self.sizes.write().await.insert(resource.clone(), size);
        Ok(size)
    }

    /// Single range read (inclusive `start..=end`).
    ///
    /// A body shorter than the range is returned as-is; bootstrap reads may
    /// legitimately run past the end of a small resource.
    pub async fn fetch_range(
        &self,
        resource: &ResourceId,
        start: u64,
        end: u64,
    ) -> Result<Bytes, IoError> {
        if end < start {
            return Err(IoError::RangeOutOfBounds {
                offset: start,
                requested: 0,
                size: end,
            });
        }
        let range = ContiguousRange::new(start, end);
        let bytes = fetch_with_timeout(self.source.as_ref(), resource, range, self.timeout).await?;
        debug!(resource = %resource, %range, received = bytes.len(), "fetched range");
        Ok(bytes)
    }

    /// Fetch every range concurrently and wait for all of them.
    ///
    /// Results are keyed by each range's start offset. The first failure fails
    /// the whole call with [`IoError::PartialFetch`]; requests already in
    /// flight are detached and allowed to finish on their own.
    pub async fn fetch_ranges_concurrently(
        &self,
        resource: &ResourceId,
        ranges: &[ContiguousRange],
    ) -> Result<HashMap<u64, Bytes>, IoError> {
        let started = Instant::now();
        let mut tasks = JoinSet::new();

        for &range in ranges {
            let source = Arc::clone(&self.source);
            let resource = resource.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let result = fetch_with_timeout(source.as_ref(), &resource, range, timeout)
                    .await
                    .and_then(|bytes| check_exact(range, bytes));
                (range, result)
            });
        }

        let mut results = HashMap::with_capacity(ranges.len());
        let mut total_bytes = 0usize;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((range, Ok(bytes))) => {
                    total_bytes += bytes.len();
                    results.insert(range.start, bytes);
                }
                Ok((range, Err(e))) => {
                    tasks.detach_all();
                    return Err(IoError::PartialFetch {
                        start: range.start,
                        end: range.end,
                        source: Box::new(e),
                    });
                }
                Err(join_err) => {
                    tasks.detach_all();
                    return Err(IoError::TaskFailed(join_err.to_string()));
                }
            }
        }

        info!(
            resource = %resource,
            ranges = ranges.len(),
            bytes = total_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "fetched all ranges"
        );

        Ok(results)
    }
}

async fn fetch_with_timeout(
    source: &dyn RangeSource,
    resource: &ResourceId,
    range: ContiguousRange,
    timeout: Duration,
) -> Result<Bytes, IoError> {
    debug!(resource = %resource, %range, "requesting range");
    match tokio::time::timeout(timeout, source.read_range(resource, range)).await {
        Ok(result) => result,
        Err(_) => Err(IoError::Timeout {
            offset: range.start,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Tile slicing relies on every merged range coming back whole.
fn check_exact(range: ContiguousRange, bytes: Bytes) -> Result<Bytes, IoError> {
    if bytes.len() as u64 != range.len() {
        return Err(IoError::ShortRead {
            offset: range.start,
            expected: range.len(),
            actual: bytes.len() as u64,
        });
    }
    Ok(bytes)
}
