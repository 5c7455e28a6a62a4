use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::range_source::{ContiguousRange, RangeSource, ResourceId};
use crate::error::IoError;

/// S3-backed implementation of [`RangeSource`].
///
/// Serves resources named `s3://bucket/key` from S3 or S3-compatible storage
/// (MinIO, etc.) using ranged `GetObject` calls.
#[derive(Clone)]
pub struct S3RangeSource {
    client: Client,
}

impl S3RangeSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Split `s3://bucket/key` into its bucket and key.
pub fn parse_s3_uri(resource: &ResourceId) -> Result<(String, String), IoError> {
    let invalid = |reason: &str| IoError::InvalidResource {
        uri: resource.to_string(),
        reason: reason.to_string(),
    };

    let rest = resource
        .as_str()
        .strip_prefix("s3://")
        .ok_or_else(|| invalid("expected an s3:// URI"))?;
    let (bucket, key) = rest
        .split_once('/')
        .ok_or_else(|| invalid("missing object key"))?;
    if bucket.is_empty() || key.is_empty() {
        return Err(invalid("empty bucket or key"));
    }
    Ok((bucket.to_string(), key.to_string()))
}

#[async_trait]
impl RangeSource for S3RangeSource {
    async fn content_length(&self, resource: &ResourceId) -> Result<u64, IoError> {
        let (bucket, key) = parse_s3_uri(resource)?;
        let head = self
            .client
            .head_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let is_not_found = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false);
                let status_is_404 = e
                    .raw_response()
                    .map(|r| r.status().as_u16() == 404)
                    .unwrap_or(false);

                if is_not_found || status_is_404 {
                    IoError::NotFound(resource.to_string())
                } else {
                    IoError::S3(e.to_string())
                }
            })?;

        match head.content_length() {
            Some(len) if len >= 0 => Ok(len as u64),
            _ => Err(IoError::SizeUnavailable(resource.to_string())),
        }
    }

    async fn read_range(
        &self,
        resource: &ResourceId,
        range: ContiguousRange,
    ) -> Result<Bytes, IoError> {
        let (bucket, key) = parse_s3_uri(resource)?;
        let resp = self
            .client
            .get_object()
            .bucket(&bucket)
            .key(&key)
            .range(range.header_value())
            .send()
            .await
            .map_err(|e| IoError::S3(e.to_string()))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| IoError::Connection(e.to_string()))?
            .into_bytes();

        Ok(data)
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // S3-compatible services usually need path-style addressing
    let s3_config = if endpoint_url.is_some() {
        aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build()
    } else {
        aws_sdk_s3::config::Builder::from(&sdk_config).build()
    };

    Client::from_conf(s3_config)
}
