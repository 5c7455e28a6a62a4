use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use http::{HeaderMap, StatusCode};
use tracing::debug;

use super::range_source::{ContiguousRange, RangeSource, ResourceId};
use crate::error::IoError;

/// Default TCP connect timeout for the HTTP client.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP(S) implementation of [`RangeSource`].
///
/// Sizes come from `HEAD` + `Content-Length`. Servers that omit it are probed
/// with a one-byte `Range` GET whose `Content-Range` carries the total length.
#[derive(Clone)]
pub struct HttpRangeSource {
    client: reqwest::Client,
}

impl HttpRangeSource {
    /// Create a source with its own client using the default connect timeout.
    pub fn new() -> Result<Self, IoError> {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self, IoError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| IoError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client (shares its connection pool).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn probe_length(&self, resource: &ResourceId) -> Result<u64, IoError> {
        let url = resource.to_url()?;
        let resp = self
            .client
            .get(url)
            .header(RANGE, ContiguousRange::new(0, 0).header_value())
            .send()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Err(IoError::NotFound(resource.to_string())),
            // An empty resource answers 416 with "bytes */0"
            StatusCode::PARTIAL_CONTENT | StatusCode::RANGE_NOT_SATISFIABLE => {
                content_range_total(resp.headers())
                    .ok_or_else(|| IoError::SizeUnavailable(resource.to_string()))
            }
            // Range ignored: the full body length is the size
            status if status.is_success() => header_u64(resp.headers(), CONTENT_LENGTH)
                .ok_or_else(|| IoError::SizeUnavailable(resource.to_string())),
            status => Err(IoError::HttpStatus {
                status: status.as_u16(),
                offset: 0,
            }),
        }
    }
}

#[async_trait]
impl RangeSource for HttpRangeSource {
    async fn content_length(&self, resource: &ResourceId) -> Result<u64, IoError> {
        let url = resource.to_url()?;
        let resp = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(IoError::NotFound(resource.to_string()));
        }

        // reqwest's content_length() reflects the (empty) HEAD body, so read
        // the header itself.
        if status.is_success() {
            if let Some(len) = header_u64(resp.headers(), CONTENT_LENGTH) {
                return Ok(len);
            }
        }

        debug!(
            resource = %resource,
            status = status.as_u16(),
            "HEAD gave no length, probing with a one-byte range request"
        );
        self.probe_length(resource).await
    }

    async fn read_range(
        &self,
        resource: &ResourceId,
        range: ContiguousRange,
    ) -> Result<Bytes, IoError> {
        let url = resource.to_url()?;
        let resp = self
            .client
            .get(url)
            .header(ACCEPT, "*/*")
            .header(RANGE, range.header_value())
            .send()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?;

        let status = resp.status();
        match status {
            StatusCode::PARTIAL_CONTENT | StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(IoError::NotFound(resource.to_string())),
            other => {
                return Err(IoError::HttpStatus {
                    status: other.as_u16(),
                    offset: range.start,
                })
            }
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?;

        if status == StatusCode::OK {
            // Server ignored the Range header and sent the whole object.
            debug!(resource = %resource, "server ignored Range header, slicing full body");
            return Ok(slice_full_body(body, range));
        }

        if body.len() as u64 > range.len() {
            return Ok(body.slice(..range.len() as usize));
        }
        Ok(body)
    }
}

fn header_u64(headers: &HeaderMap, name: http::header::HeaderName) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Total length from `Content-Range: bytes 0-0/12345`. `*` means unknown.
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_RANGE)?.to_str().ok()?;
    parse_content_range_total(value)
}

pub(crate) fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

fn slice_full_body(body: Bytes, range: ContiguousRange) -> Bytes {
    let len = body.len() as u64;
    if range.start >= len {
        return Bytes::new();
    }
    let end = std::cmp::min(range.end + 1, len);
    body.slice(range.start as usize..end as usize)
}
