use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, ETAG, HeaderMap, HeaderValue, IF_MATCH, RANGE};
use reqwest::{Client, Method, Response, StatusCode, Url};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::{RangeBody, RangeSource, check_range};
use crate::config::HttpOptions;
use crate::error::SourceError;

/// Adds authentication to outgoing requests.
pub trait RequestSigner: Send + Sync {
    /// Called for every request, including retries, just before it is sent.
    fn sign(&self, method: &Method, url: &Url, headers: &mut HeaderMap) -> Result<(), SourceError>;
}

/// HTTP Range reader for remote ZIP files
pub struct HttpRangeReader {
    shared: Arc<Shared>,
}

struct Shared {
    client: Client,
    url: Url,
    locator: String,
    signer: Option<Arc<dyn RequestSigner>>,
    size: u64,
    etag: Option<String>,
    transferred_bytes: AtomicU64,
    max_retry: u32,
}

impl HttpRangeReader {
    /// Create a new HTTP Range reader for a plain URL.
    pub async fn new(url: &str, options: &HttpOptions) -> Result<Self, SourceError> {
        let parsed = Url::parse(url)
            .map_err(|e| SourceError::Unreachable(format!("invalid URL {url}: {e}")))?;
        Self::connect(parsed, url.to_string(), options, None).await
    }

    /// Create a reader, optionally signing every request.
    ///
    /// This will send a HEAD request to verify Range support and get the object size.
    pub async fn connect(
        url: Url,
        locator: String,
        options: &HttpOptions,
        signer: Option<Arc<dyn RequestSigner>>,
    ) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(options.timeout).build()?;

        let mut shared = Shared {
            client,
            url,
            locator,
            signer,
            size: 0,
            etag: None,
            transferred_bytes: AtomicU64::new(0),
            max_retry: options.max_retry.max(1),
        };

        let resp = shared.send(Method::HEAD, None).await?;
        if !resp.status().is_success() {
            return Err(SourceError::Unreachable(format!(
                "HEAD {} failed with status: {}",
                shared.locator,
                resp.status()
            )));
        }

        let headers = resp.headers();
        match headers.get(ACCEPT_RANGES).and_then(|v| v.to_str().ok()) {
            Some(value) if !value.contains("bytes") => {
                return Err(SourceError::Unreachable(
                    "remote server does not support Range requests".to_string(),
                ));
            }
            Some(_) => {}
            None => debug!("no Accept-Ranges header, trying Range requests anyway"),
        }

        shared.size = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                SourceError::Unreachable("remote server did not return Content-Length".to_string())
            })?;
        shared.etag = headers
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        debug!(locator = %shared.locator, size = shared.size, etag = ?shared.etag, "opened remote object");
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.shared.transferred_bytes.load(Ordering::Relaxed)
    }

    pub fn etag(&self) -> Option<&str> {
        self.shared.etag.as_deref()
    }
}

impl Shared {
    fn request(
        &self,
        method: Method,
        range: Option<(u64, u64)>,
    ) -> Result<reqwest::RequestBuilder, SourceError> {
        let mut headers = HeaderMap::new();
        if let Some((start, end)) = range {
            headers.insert(RANGE, header_value(&format!("bytes={start}-{end}"))?);
            if let Some(etag) = &self.etag {
                headers.insert(IF_MATCH, header_value(etag)?);
            }
        }
        if let Some(signer) = &self.signer {
            signer.sign(&method, &self.url, &mut headers)?;
        }
        Ok(self.client.request(method, self.url.clone()).headers(headers))
    }

    async fn send(&self, method: Method, range: Option<(u64, u64)>) -> Result<Response, SourceError> {
        let mut retry_count = 0;
        loop {
            match self.request(method.clone(), range)?.send().await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        return Err(SourceError::Unreachable(format!(
                            "max retries exceeded: {e}"
                        )));
                    }
                    warn!("connection error, retry {}/{}: {}", retry_count, self.max_retry, e);
                    tokio::time::sleep(backoff(retry_count)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Issue a GET for the inclusive byte range `start..=end`.
    async fn get_range(&self, start: u64, end: u64) -> Result<Response, SourceError> {
        let resp = self.send(Method::GET, Some((start, end))).await?;
        match resp.status() {
            StatusCode::PARTIAL_CONTENT => Ok(resp),
            StatusCode::PRECONDITION_FAILED => Err(SourceError::Changed {
                expected: self.etag.clone().unwrap_or_default(),
            }),
            StatusCode::RANGE_NOT_SATISFIABLE => Err(SourceError::ShortRead {
                offset: start,
                wanted: end - start + 1,
                got: 0,
            }),
            status => Err(SourceError::Unreachable(format!(
                "range request failed with status: {status}"
            ))),
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue, SourceError> {
    HeaderValue::from_str(value)
        .map_err(|_| SourceError::Unreachable(format!("invalid header value: {value}")))
}

fn backoff(retry_count: u32) -> Duration {
    Duration::from_millis(500 * retry_count as u64)
}

#[async_trait]
impl RangeSource for HttpRangeReader {
    fn size(&self) -> u64 {
        self.shared.size
    }

    fn locator(&self) -> &str {
        &self.shared.locator
    }

    async fn open_range(&self, offset: u64, len: u64) -> Result<Box<dyn RangeBody>, SourceError> {
        check_range(offset, len, self.shared.size)?;
        Ok(Box::new(HttpBody {
            shared: Arc::clone(&self.shared),
            response: None,
            position: offset,
            end: offset + len,
            retry_count: 0,
        }))
    }
}

/// Body of one range request. A connection that drops mid-body is resumed
/// with a new request starting at the first byte not yet received.
struct HttpBody {
    shared: Arc<Shared>,
    response: Option<Response>,
    position: u64,
    end: u64,
    retry_count: u32,
}

impl HttpBody {
    async fn resume(&mut self, reason: String) -> Result<(), SourceError> {
        self.response = None;
        self.retry_count += 1;
        if self.retry_count >= self.shared.max_retry {
            return Err(SourceError::Unreachable(format!(
                "max retries exceeded at offset {}: {reason}",
                self.position
            )));
        }
        warn!(
            "transfer interrupted at offset {}, retry {}/{}: {}",
            self.position, self.retry_count, self.shared.max_retry, reason
        );
        tokio::time::sleep(backoff(self.retry_count)).await;
        Ok(())
    }
}

#[async_trait]
impl RangeBody for HttpBody {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, SourceError> {
        loop {
            if self.position >= self.end {
                return Ok(None);
            }
            if self.response.is_none() {
                let resp = self.shared.get_range(self.position, self.end - 1).await?;
                self.response = Some(resp);
            }
            let Some(response) = self.response.as_mut() else {
                continue;
            };

            match response.chunk().await {
                Ok(Some(bytes)) => {
                    let take = (bytes.len() as u64).min(self.end - self.position);
                    if take == 0 {
                        continue;
                    }
                    self.position += take;
                    self.retry_count = 0;
                    self.shared
                        .transferred_bytes
                        .fetch_add(take, Ordering::Relaxed);
                    trace!(bytes = take, position = self.position, "received chunk");
                    return Ok(Some(bytes.slice(..take as usize)));
                }
                Ok(None) => self.resume("body ended early".to_string()).await?,
                // A truncated plain body surfaces as a decode error.
                Err(e) if e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() => {
                    self.resume(e.to_string()).await?
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
