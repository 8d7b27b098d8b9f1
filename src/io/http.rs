use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

use super::{ByteSource, check_range};
use crate::error::{ZipError, ZipResult};

/// HTTP Range source for remote ZIP files.
///
/// Requests are driven on a private tokio runtime so callers see plain
/// blocking reads. Several threads may read concurrently.
pub struct HttpRangeSource {
    runtime: Runtime,
    client: Client,
    url: String,
    size: u64,
    transferred_bytes: AtomicU64,
    max_retry: u32,
}

fn http_err(err: impl std::fmt::Display) -> ZipError {
    ZipError::Http(err.to_string())
}

impl HttpRangeSource {
    /// Create a new HTTP Range source
    ///
    /// This will send a HEAD request to verify Range support and get file size
    pub fn new(url: String) -> ZipResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(http_err)?;

        // Send HEAD request to check capabilities
        let resp = runtime
            .block_on(client.head(&url).send())
            .map_err(http_err)?;

        if !resp.status().is_success() {
            return Err(ZipError::Http(format!(
                "request failed with status: {}",
                resp.status()
            )));
        }

        let accept_ranges = resp
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");

        if !accept_ranges.contains("bytes") {
            return Err(ZipError::Http(
                "remote server does not support Range requests".into(),
            ));
        }

        let size = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ZipError::Http("remote server did not return Content-Length".into()))?;

        debug!(%url, size, "opened remote archive");

        Ok(Self {
            runtime,
            client,
            url,
            size,
            transferred_bytes: AtomicU64::new(0),
            max_retry: 0,
        })
    }

    /// Retry timed-out or refused requests up to `max_retry` times.
    ///
    /// The default is zero: failures are reported to the caller as-is.
    pub fn with_max_retries(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    async fn fetch(&self, offset: u64, buf: &mut [u8]) -> ZipResult<()> {
        let end = offset + buf.len() as u64 - 1;
        let expected_size = buf.len();

        let mut received = 0;
        let mut retry_count = 0;

        while received < expected_size {
            let current_start = offset + received as u64;
            let range = format!("bytes={}-{}", current_start, end);

            let result = self
                .client
                .get(&self.url)
                .header("Range", &range)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    if resp.status() != reqwest::StatusCode::PARTIAL_CONTENT {
                        return Err(ZipError::Http(format!(
                            "range request failed with status: {}",
                            resp.status()
                        )));
                    }

                    let bytes = resp.bytes().await.map_err(http_err)?;
                    if bytes.is_empty() {
                        return Err(ZipError::TruncatedRead {
                            offset,
                            requested: expected_size,
                            available: received as u64,
                        });
                    }
                    let chunk_len = bytes.len().min(expected_size - received);
                    buf[received..received + chunk_len].copy_from_slice(&bytes[..chunk_len]);
                    received += chunk_len;

                    self.transferred_bytes
                        .fetch_add(chunk_len as u64, Ordering::Relaxed);
                }
                Err(e) if (e.is_timeout() || e.is_connect()) && retry_count < self.max_retry => {
                    retry_count += 1;
                    warn!(
                        retry_count,
                        max_retry = self.max_retry,
                        error = %e,
                        "connection error, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(http_err(e)),
            }
        }

        Ok(())
    }
}

impl ByteSource for HttpRangeSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> ZipResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        check_range(offset, buf.len(), self.size)?;
        self.runtime.block_on(self.fetch(offset, buf))
    }

    fn size(&self) -> u64 {
        self.size
    }
}
