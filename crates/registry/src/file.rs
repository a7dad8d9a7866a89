//! Read-only file handles over registry blobs.

use crate::fs::RegistryFs;
use crate::http;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::OnceCell;
use wharf_core::fs::{File, Metadata};
use wharf_core::{Deadline, Error, RETRY_ATTEMPTS, RETRY_SLEEP, Result};

/// A blob exposed as a random-access, read-only file.
///
/// The size is learned lazily on the first `metadata` or read and never
/// changes afterwards; blobs are immutable by digest.
pub struct RegistryFile {
    fs: RegistryFs,
    url: String,
    timeout: Option<Duration>,
    size: OnceCell<u64>,
}

impl RegistryFile {
    pub(crate) fn new(fs: RegistryFs, url: &str, timeout: Option<Duration>) -> Self {
        Self {
            fs,
            url: url.to_string(),
            timeout,
            size: OnceCell::new(),
        }
    }

    /// The blob URL this file reads from.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Size and mode. The size is fetched once per file instance.
    pub async fn metadata(&self) -> Result<Metadata> {
        let size = self.size.get_or_try_init(|| self.fetch_length()).await?;
        Ok(Metadata::regular_readonly(*size))
    }

    /// Learn the blob size from a one-byte ranged GET, retrying transient
    /// and auth failures. An auth failure retry re-resolves the endpoint
    /// after the poison-release in `get_data`.
    async fn fetch_length(&self) -> Result<u64> {
        let deadline = Deadline::after(self.timeout);
        let mut retries = RETRY_ATTEMPTS;
        loop {
            let err = match self.fs.get_data(&self.url, 0, 1, deadline).await {
                Ok(resp) => {
                    return http::resource_size(&resp).ok_or_else(|| {
                        Error::Protocol(format!(
                            "no content-range or content-length from {}",
                            self.url
                        ))
                    });
                }
                Err(e) => e,
            };
            if deadline.expired() {
                tracing::error!(url = %self.url, "blob size fetch timed out");
                return Err(Error::TimedOut(format!(
                    "blob size fetch timed out for {}",
                    self.url
                )));
            }
            if retries == 0 {
                tracing::error!(url = %self.url, error = %err, "failed to get blob size");
                return Err(if err.is_auth() {
                    Error::PermissionDenied(format!("authorization failed for {}", self.url))
                } else {
                    Error::NotFound(format!("failed to get blob size for {}: {err}", self.url))
                });
            }
            retries -= 1;
            tracing::warn!(url = %self.url, error = %err, "blob size fetch failed, retrying");
            tokio::time::sleep(RETRY_SLEEP).await;
        }
    }

    /// Read into a single buffer at `offset`.
    pub async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut bufs = [buf];
        self.read_vectored_at(&mut bufs, offset).await
    }

    /// Scatter read at `offset`. The requested count is clamped to the blob
    /// size; reads at or past the end return 0. Short reads are allowed:
    /// an HTTP response shorter than the requested range is returned as-is.
    pub async fn read_vectored_at(&self, bufs: &mut [&mut [u8]], offset: u64) -> Result<usize> {
        let size = self.metadata().await?.size;
        if offset >= size {
            return Ok(0);
        }
        let wanted: u64 = bufs.iter().map(|b| b.len() as u64).sum();
        let count = wanted.min(size - offset);
        if count == 0 {
            return Ok(0);
        }

        let deadline = Deadline::after(self.timeout);
        let mut retries = RETRY_ATTEMPTS;
        loop {
            tracing::debug!(url = %self.url, offset, count, "pulling blob range");
            let err = match self.fs.get_data(&self.url, offset, count, deadline).await {
                Ok(resp) => return read_into_bufs(resp, bufs, count as usize, &self.url).await,
                Err(e) => e,
            };
            if deadline.expired() {
                tracing::error!(url = %self.url, offset, "read timed out");
                return Err(Error::TimedOut(format!(
                    "read of {} at {offset} timed out",
                    self.url
                )));
            }
            if retries == 0 {
                tracing::error!(url = %self.url, offset, status = ?err.status(), "read failed");
                return Err(if err.is_auth() {
                    Error::PermissionDenied(format!("authorization failed for {}", self.url))
                } else {
                    Error::NotFound(format!("read of {} at {offset} failed: {err}", self.url))
                });
            }
            retries -= 1;
            tracing::warn!(url = %self.url, offset, status = ?err.status(), "ranged GET failed, retrying");
            tokio::time::sleep(RETRY_SLEEP).await;
        }
    }
}

/// Stream the response body into the scatter buffers, stopping at `limit`
/// bytes or the end of the body, whichever comes first.
async fn read_into_bufs(
    mut resp: reqwest::Response,
    bufs: &mut [&mut [u8]],
    limit: usize,
    url: &str,
) -> Result<usize> {
    let mut filled = 0;
    let mut iov = 0;
    let mut pos = 0;
    'body: while filled < limit {
        let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| http::transport_error(url, e))?
        else {
            break;
        };
        let mut chunk = &chunk[..];
        while !chunk.is_empty() && filled < limit {
            if iov == bufs.len() {
                break 'body;
            }
            let avail = bufs[iov].len() - pos;
            if avail == 0 {
                iov += 1;
                pos = 0;
                continue;
            }
            let n = chunk.len().min(avail).min(limit - filled);
            bufs[iov][pos..pos + n].copy_from_slice(&chunk[..n]);
            chunk = &chunk[n..];
            filled += n;
            pos += n;
        }
    }
    Ok(filled)
}

#[async_trait]
impl File for RegistryFile {
    async fn metadata(&self) -> Result<Metadata> {
        RegistryFile::metadata(self).await
    }

    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        RegistryFile::read_at(self, buf, offset).await
    }

    async fn read_vectored_at(&self, bufs: &mut [&mut [u8]], offset: u64) -> Result<usize> {
        RegistryFile::read_vectored_at(self, bufs, offset).await
    }
}
