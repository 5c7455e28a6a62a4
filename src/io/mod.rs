//! I/O layer: range sources and the concurrent fetch client.
//!
//! - [`RangeSource`]: transport abstraction (`content_length`, `read_range`)
//! - [`HttpRangeSource`]: plain HTTP(S) range requests
//! - [`S3RangeSource`]: `s3://bucket/key` objects through the AWS SDK
//! - [`RangeFetchClient`]: size memoization, per-request timeout and
//!   concurrent fetch with a join

mod fetch;
mod http_source;
mod range_source;
mod s3_source;

pub use fetch::{RangeFetchClient, DEFAULT_FETCH_TIMEOUT};
pub use http_source::{HttpRangeSource, DEFAULT_CONNECT_TIMEOUT};
pub use range_source::{
    read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le, ContiguousRange,
    RangeSource, ResourceId,
};
pub use s3_source::{create_s3_client, parse_s3_uri, S3RangeSource};
