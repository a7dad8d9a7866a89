//! HTTP plumbing shared by the resolver, reader and uploader.
//!
//! One `reqwest` client is built per filesystem (and per uploader) with
//! redirect following disabled: redirects are protocol data for the
//! resolver, and never auto-following them guarantees an `Authorization`
//! header cannot ride a cross-host redirect. Proxy configuration is left to
//! the environment, as reqwest reports it.

use std::path::Path;
use wharf_core::{Deadline, Error, Result};

pub(crate) struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    /// Build a client with redirects disabled and an optional PEM trust
    /// anchor override.
    pub fn new(ca_file: Option<&Path>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
        if let Some(path) = ca_file {
            let pem = std::fs::read(path)?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                Error::InvalidInput(format!("invalid ca_file {}: {e}", path.display()))
            })?;
            builder = builder.add_root_certificate(cert);
        }
        let inner = builder
            .build()
            .map_err(|e| Error::InvalidInput(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { inner })
    }

    pub fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.inner.get(url)
    }

    pub fn patch(&self, url: &str) -> reqwest::RequestBuilder {
        self.inner.patch(url)
    }

    pub fn put(&self, url: &str) -> reqwest::RequestBuilder {
        self.inner.put(url)
    }

    /// Issue the request bounded by `deadline`. An already-elapsed deadline
    /// fails without touching the network.
    pub async fn send(
        &self,
        req: reqwest::RequestBuilder,
        url: &str,
        deadline: Deadline,
    ) -> Result<reqwest::Response> {
        if deadline.expired() {
            return Err(Error::TimedOut(format!(
                "deadline elapsed before request to {url}"
            )));
        }
        let req = match deadline.remaining() {
            Some(remaining) => req.timeout(remaining),
            None => req,
        };
        req.send().await.map_err(|e| transport_error(url, e))
    }
}

/// Map a reqwest transport failure onto the error taxonomy.
pub(crate) fn transport_error(url: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::TimedOut(format!("request to {url} timed out"))
    } else if err.is_connect() {
        Error::NotFound(format!("connection failed: {url}"))
    } else {
        Error::NotFound(format!("request to {url} failed: {err}"))
    }
}

/// `Range` header value for `count` bytes at `offset`.
pub(crate) fn range_header(offset: u64, count: u64) -> String {
    format!("bytes={}-{}", offset, offset + count - 1)
}

/// Total resource size as the HTTP client reports it: the total from
/// `Content-Range: bytes x-y/Z`, else `Content-Length`.
pub(crate) fn resource_size(resp: &reqwest::Response) -> Option<u64> {
    if let Some(value) = resp
        .headers()
        .get(reqwest::header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(total) = content_range_total(value) {
            return Some(total);
        }
    }
    resp.content_length()
}

fn content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

/// Read at most `cap` bytes of the response body.
pub(crate) async fn read_body_capped(
    mut resp: reqwest::Response,
    cap: usize,
    url: &str,
) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    while body.len() < cap {
        let Some(chunk) = resp.chunk().await.map_err(|e| transport_error(url, e))? else {
            break;
        };
        let take = chunk.len().min(cap - body.len());
        body.extend_from_slice(&chunk[..take]);
    }
    Ok(body)
}
