//! Streaming uploads via the Registry V2 chunked upload protocol.
//!
//! The caller initiates the upload (`POST /v2/<name>/blobs/uploads/`) and
//! hands the returned upload URL to [`RegistryUploader`]. Writes must be
//! sequential; full chunks are PATCHed as they accumulate and `close`
//! finalizes with a `PUT …?digest=sha256:<hex>`. Authentication is Basic
//! only; the uploader performs no token negotiation, and a 401 aborts.

use crate::auth;
use crate::http::HttpClient;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wharf_core::fs::{File, Metadata};
use wharf_core::{
    ContentHash, ContentHasher, Credentials, Deadline, Error, RETRY_ATTEMPTS, RETRY_SLEEP, Result,
    UploadConfig,
};

/// Upload lifecycle: `Idle → Pushing → Finalized`, with `Failed` absorbing
/// any error. Terminal states reject further operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadState {
    /// No bytes written yet. `close` from here is a no-op.
    Idle,
    /// At least one write accepted.
    Pushing,
    /// Finalized with a digest PUT (or closed without writes).
    Finalized,
    /// A push or finalize failed; the session is dead.
    Failed,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Finalized | UploadState::Failed)
    }
}

/// Sequential, chunked uploader for a single blob.
pub struct RegistryUploader {
    http: HttpClient,
    upload_url: String,
    credentials: Credentials,
    chunk_size: usize,
    timeout: Option<Duration>,
    /// Optional local write-through copy of everything pushed.
    local: Option<tokio::fs::File>,
    state: UploadState,
    part_no: u64,
    total_pushed: u64,
    /// Bytes acknowledged by the registry; start offset of the next chunk.
    sent: u64,
    buffer: BytesMut,
    hasher: ContentHasher,
    digest: Option<ContentHash>,
}

impl RegistryUploader {
    /// Create an uploader for `upload_url` with Basic credentials.
    pub fn new(
        upload_url: impl Into<String>,
        credentials: Credentials,
        config: &UploadConfig,
    ) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(config.ca_file.as_deref())?,
            upload_url: upload_url.into(),
            credentials,
            chunk_size: config.chunk_size(),
            timeout: config.timeout(),
            local: None,
            state: UploadState::Idle,
            part_no: 0,
            total_pushed: 0,
            sent: 0,
            buffer: BytesMut::new(),
            hasher: ContentHasher::default(),
            digest: None,
        })
    }

    /// Mirror every accepted write into `file` as well.
    pub fn with_local_copy(mut self, file: tokio::fs::File) -> Self {
        self.local = Some(file);
        self
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Total bytes accepted by `write` so far.
    pub fn total_pushed(&self) -> u64 {
        self.total_pushed
    }

    /// The content digest, available after a successful finalize.
    pub fn digest(&self) -> Option<&ContentHash> {
        self.digest.as_ref()
    }

    /// Accept `buf` at `offset`. Writes must be strictly sequential
    /// (`offset` equal to the bytes accepted so far); anything else fails
    /// without touching the session state.
    pub async fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        match self.state {
            UploadState::Failed => {
                return Err(Error::InvalidInput("upload already failed".to_string()));
            }
            UploadState::Finalized => {
                return Err(Error::InvalidInput("upload already finalized".to_string()));
            }
            UploadState::Idle | UploadState::Pushing => {}
        }
        if offset != self.total_pushed {
            return Err(Error::InvalidInput(format!(
                "non-sequential write at {offset}, expected {}",
                self.total_pushed
            )));
        }
        self.state = UploadState::Pushing;

        if let Some(local) = self.local.as_mut() {
            if let Err(e) = local.write_all(buf).await {
                self.state = UploadState::Failed;
                return Err(e.into());
            }
        }
        self.hasher.update(buf);
        self.buffer.extend_from_slice(buf);
        self.total_pushed += buf.len() as u64;

        while self.buffer.len() >= self.chunk_size {
            let chunk = self.buffer.split_to(self.chunk_size).freeze();
            self.push_chunk(chunk).await?;
        }
        Ok(buf.len())
    }

    /// Flush the tail chunk and finalize with the digest PUT. Closing a
    /// session that never accepted a write skips the registry entirely.
    pub async fn close(&mut self) -> Result<()> {
        match self.state {
            UploadState::Failed => {
                return Err(Error::InvalidInput("upload already failed".to_string()));
            }
            UploadState::Finalized => {
                return Err(Error::InvalidInput("upload already finalized".to_string()));
            }
            UploadState::Idle => {
                self.state = UploadState::Finalized;
                return Ok(());
            }
            UploadState::Pushing => {}
        }

        if !self.buffer.is_empty() {
            let chunk = self.buffer.split().freeze();
            self.push_chunk(chunk).await?;
        }
        if let Some(local) = self.local.as_mut() {
            if let Err(e) = local.flush().await {
                self.state = UploadState::Failed;
                return Err(e.into());
            }
        }

        let digest = std::mem::take(&mut self.hasher).finalize();
        self.finalize(&digest).await?;
        self.digest = Some(digest);
        self.state = UploadState::Finalized;
        tracing::info!(
            url = %self.upload_url,
            parts = self.part_no,
            bytes = self.total_pushed,
            digest = %digest,
            "upload finalized"
        );
        Ok(())
    }

    async fn push_chunk(&mut self, chunk: Bytes) -> Result<()> {
        let start = self.sent;
        let end = start + chunk.len() as u64 - 1;
        let deadline = Deadline::after(self.timeout);
        let mut retries = RETRY_ATTEMPTS;
        loop {
            let req = self
                .http
                .patch(&self.upload_url)
                .header(CONTENT_RANGE, format!("{start}-{end}"))
                .header(CONTENT_LENGTH, chunk.len())
                .header(CONTENT_TYPE, "application/octet-stream")
                .header(AUTHORIZATION, auth::basic_header(&self.credentials))
                .body(chunk.clone());
            let err = match self.http.send(req, &self.upload_url, deadline).await {
                Ok(resp) if resp.status().is_success() => {
                    self.sent += chunk.len() as u64;
                    self.part_no += 1;
                    tracing::debug!(url = %self.upload_url, part = self.part_no, start, end, "chunk pushed");
                    return Ok(());
                }
                Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED => {
                    self.state = UploadState::Failed;
                    tracing::error!(url = %self.upload_url, start, status = 401_u16, "upload rejected");
                    return Err(Error::PermissionDenied(format!(
                        "upload to {} rejected",
                        self.upload_url
                    )));
                }
                Ok(resp) => Error::Status {
                    url: self.upload_url.clone(),
                    status: resp.status().as_u16(),
                },
                Err(e) => e,
            };
            if deadline.expired() {
                self.state = UploadState::Failed;
                tracing::error!(url = %self.upload_url, start, "chunk push timed out");
                return Err(Error::TimedOut(format!(
                    "chunk push to {} timed out",
                    self.upload_url
                )));
            }
            if retries == 0 {
                self.state = UploadState::Failed;
                tracing::error!(url = %self.upload_url, start, error = %err, "chunk push failed");
                return Err(err);
            }
            retries -= 1;
            tracing::warn!(url = %self.upload_url, start, error = %err, "chunk push failed, retrying");
            tokio::time::sleep(RETRY_SLEEP).await;
        }
    }

    async fn finalize(&mut self, digest: &ContentHash) -> Result<()> {
        let sep = if self.upload_url.contains('?') { '&' } else { '?' };
        let url = format!("{}{}digest={}", self.upload_url, sep, digest.digest());
        let deadline = Deadline::after(self.timeout);
        let mut retries = RETRY_ATTEMPTS;
        loop {
            let req = self
                .http
                .put(&url)
                .header(CONTENT_LENGTH, 0)
                .header(AUTHORIZATION, auth::basic_header(&self.credentials));
            let err = match self.http.send(req, &url, deadline).await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED => {
                    self.state = UploadState::Failed;
                    tracing::error!(url = %url, status = 401_u16, "finalize rejected");
                    return Err(Error::PermissionDenied(format!(
                        "finalize of {} rejected",
                        self.upload_url
                    )));
                }
                Ok(resp) => Error::Status {
                    url: url.clone(),
                    status: resp.status().as_u16(),
                },
                Err(e) => e,
            };
            if deadline.expired() {
                self.state = UploadState::Failed;
                return Err(Error::TimedOut(format!(
                    "finalize of {} timed out",
                    self.upload_url
                )));
            }
            if retries == 0 {
                self.state = UploadState::Failed;
                tracing::error!(url = %url, error = %err, "finalize failed");
                return Err(err);
            }
            retries -= 1;
            tracing::warn!(url = %url, error = %err, "finalize failed, retrying");
            tokio::time::sleep(RETRY_SLEEP).await;
        }
    }
}

#[async_trait]
impl File for RegistryUploader {
    async fn metadata(&self) -> Result<Metadata> {
        Err(Error::Unsupported("stat on an upload handle"))
    }

    async fn read_at(&self, _buf: &mut [u8], _offset: u64) -> Result<usize> {
        Err(Error::Unsupported("read"))
    }

    async fn read_vectored_at(&self, _bufs: &mut [&mut [u8]], _offset: u64) -> Result<usize> {
        Err(Error::Unsupported("readv"))
    }

    async fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        RegistryUploader::write(self, buf, offset).await
    }

    async fn close(&mut self) -> Result<()> {
        RegistryUploader::close(self).await
    }
}

/// Stream a local file to `upload_url` in chunk-sized reads and finalize.
/// Returns the content digest, or `None` for an empty file (nothing is
/// pushed and no finalize is issued).
pub async fn upload_file(
    path: impl AsRef<Path>,
    upload_url: &str,
    credentials: Credentials,
    config: &UploadConfig,
) -> Result<Option<ContentHash>> {
    let mut file = tokio::fs::File::open(path.as_ref()).await?;
    let mut uploader = RegistryUploader::new(upload_url, credentials, config)?;
    let mut buf = vec![0u8; uploader.chunk_size];
    let mut offset = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        uploader.write(&buf[..n], offset).await?;
        offset += n as u64;
    }
    uploader.close().await?;
    Ok(uploader.digest().copied())
}
