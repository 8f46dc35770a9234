//! Byte-range fetching from the upstream file server

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{
    HeaderMap, HeaderName, CONTENT_LENGTH, CONTENT_RANGE, ETAG, IF_RANGE, LAST_MODIFIED, RANGE,
};
use reqwest::StatusCode;
use std::time::Duration;

use super::{TransferError, Validator};
use crate::config::DownloadConfig;

/// Body of a response, delivered in arbitrary-sized pieces
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, TransferError>>;

/// Metadata returned by a probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteMeta {
    pub total_size: Option<u64>,
    pub validator: Validator,
}

impl RemoteMeta {
    pub fn new(total_size: Option<u64>, last_modified: Option<String>, etag: Option<String>) -> Self {
        Self {
            total_size,
            validator: Validator {
                size: total_size,
                last_modified,
                etag,
            },
        }
    }

    fn from_headers(headers: &HeaderMap, total_size: Option<u64>) -> Self {
        Self::new(
            total_size,
            header_str(headers, &LAST_MODIFIED),
            header_str(headers, &ETAG),
        )
    }
}

/// Answer to a range request
pub struct RangeResponse {
    /// Offset of the first body byte. 0 when the server sent the whole entity.
    pub start: u64,
    /// Markers of the entity actually served
    pub meta: RemoteMeta,
    pub body: ByteStream,
}

/// Source of remote files that supports continuing from a byte offset
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Look up size and change markers without fetching the body
    async fn probe(&self, url: &str) -> Result<RemoteMeta, TransferError>;

    /// Fetch from `start` to the end. `if_range` asks the server to send the
    /// whole entity instead when it no longer matches.
    async fn fetch_range(
        &self,
        url: &str,
        start: u64,
        if_range: Option<&str>,
    ) -> Result<RangeResponse, TransferError>;
}

/// HTTP(S) fetcher built on reqwest
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &DownloadConfig) -> Result<Self, TransferError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RangeFetcher for HttpFetcher {
    async fn probe(&self, url: &str) -> Result<RemoteMeta, TransferError> {
        let response = self.client.head(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let headers = response.headers();
        Ok(RemoteMeta::from_headers(headers, header_u64(headers, &CONTENT_LENGTH)))
    }

    async fn fetch_range(
        &self,
        url: &str,
        start: u64,
        if_range: Option<&str>,
    ) -> Result<RangeResponse, TransferError> {
        let mut request = self.client.get(url);
        if start > 0 {
            request = request.header(RANGE, format!("bytes={}-", start));
            if let Some(value) = if_range {
                request = request.header(IF_RANGE, value);
            }
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        let (body_start, total) = match status {
            StatusCode::PARTIAL_CONTENT => {
                let (first, _last, total) = header_str(&headers, &CONTENT_RANGE)
                    .as_deref()
                    .and_then(parse_content_range)
                    .ok_or_else(|| {
                        TransferError::Network(format!("invalid Content-Range from {}", url))
                    })?;
                (first, total)
            }
            s if s.is_success() => (0, header_u64(&headers, &CONTENT_LENGTH)),
            s => {
                return Err(TransferError::Status {
                    url: url.to_string(),
                    status: s.as_u16(),
                })
            }
        };

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TransferError::from))
            .boxed();

        Ok(RangeResponse {
            start: body_start,
            meta: RemoteMeta::from_headers(&headers, total),
            body,
        })
    }
}

fn header_str(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn header_u64(headers: &HeaderMap, name: &HeaderName) -> Option<u64> {
    header_str(headers, name).and_then(|s| s.parse().ok())
}

/// Parse `bytes <first>-<last>/<total|*>`
pub fn parse_content_range(value: &str) -> Option<(u64, u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (first, last) = range.split_once('-')?;
    let first: u64 = first.trim().parse().ok()?;
    let last: u64 = last.trim().parse().ok()?;
    if last < first {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((first, last, total))
}
