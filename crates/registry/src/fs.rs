//! The registry filesystem: endpoint resolution, the three caches, and
//! ranged blob fetches.

use crate::auth;
use crate::file::RegistryFile;
use crate::http::{self, HttpClient};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, LOCATION, RANGE, WWW_AUTHENTICATE};
use std::sync::Arc;
use std::time::Duration;
use wharf_cache::ExpiringCache;
use wharf_core::fs::{File, Filesystem, Metadata, OpenMode};
use wharf_core::{Challenge, CredentialProvider, Deadline, Error, RegistryConfig, Result, UrlInfo};

/// Read-only filesystem over registry blobs, addressed by blob URL.
///
/// Cloning is cheap and shares the HTTP client, the credential callback and
/// all three caches.
#[derive(Clone)]
pub struct RegistryFs {
    state: Arc<FsState>,
}

struct FsState {
    http: HttpClient,
    credentials: CredentialProvider,
    timeout: Option<Duration>,
    /// Accelerator prefix; empty disables acceleration. Swapped atomically,
    /// read on every fetch.
    accelerator: RwLock<Arc<str>>,
    /// Blob size per path.
    meta_size: ExpiringCache<String, u64>,
    /// Bearer token per auth scope. URLs sharing a scope share a token.
    scope_token: ExpiringCache<String, String>,
    /// Resolved endpoint per blob URL.
    url_info: ExpiringCache<String, UrlInfo>,
}

impl RegistryFs {
    /// Build a filesystem from configuration and a credential callback.
    ///
    /// The callback is invoked on every token cache miss with the blob URL
    /// as a hint. Cache TTLs below their floors are clamped up.
    pub fn new(config: &RegistryConfig, credentials: CredentialProvider) -> Result<Self> {
        Ok(Self {
            state: Arc::new(FsState {
                http: HttpClient::new(config.ca_file.as_deref())?,
                credentials,
                timeout: config.timeout(),
                accelerator: RwLock::new(Arc::from("")),
                meta_size: ExpiringCache::new(config.meta_ttl()),
                scope_token: ExpiringCache::new(config.token_ttl()),
                url_info: ExpiringCache::new(config.url_ttl()),
            }),
        })
    }

    /// Open a blob by URL. Stats it immediately so missing or unauthorized
    /// blobs fail here rather than on the first read.
    pub async fn open(&self, url: &str) -> Result<RegistryFile> {
        let file = RegistryFile::new(self.clone(), url, self.state.timeout);
        file.metadata().await?;
        Ok(file)
    }

    /// Stat a blob through the size cache without keeping a file open.
    pub async fn stat(&self, path: &str) -> Result<Metadata> {
        let mut stat_err = None;
        let size = self
            .state
            .meta_size
            .acquire(path.to_string(), async {
                match self.open(path).await {
                    Ok(file) => match file.metadata().await {
                        Ok(meta) => Some(meta.size),
                        Err(e) => {
                            stat_err = Some(e);
                            None
                        }
                    },
                    Err(e) => {
                        stat_err = Some(e);
                        None
                    }
                }
            })
            .await;
        match size {
            Some(size) => Ok(Metadata::regular_readonly(*size)),
            None => {
                Err(stat_err.unwrap_or_else(|| Error::NotFound(format!("failed to stat {path}"))))
            }
        }
    }

    /// Replace the accelerator prefix. `""` disables acceleration. Takes
    /// effect on the next fetch; no cache is invalidated.
    pub fn set_accelerator_address(&self, addr: &str) {
        *self.state.accelerator.write() = Arc::from(addr);
    }

    fn accelerator_address(&self) -> Arc<str> {
        self.state.accelerator.read().clone()
    }

    /// Ranged GET against the resolved endpoint for `url`.
    ///
    /// Resolution runs under single-flight on cache miss. A 200/206 releases
    /// the cached endpoint cleanly and hands the response to the caller to
    /// stream; anything else poisons it so the next attempt re-resolves.
    /// No retries at this layer.
    pub(crate) async fn get_data(
        &self,
        url: &str,
        offset: u64,
        count: u64,
        deadline: Deadline,
    ) -> Result<reqwest::Response> {
        let mut resolve_err = None;
        let info = self
            .state
            .url_info
            .acquire(url.to_string(), async {
                match self.resolve_url(url, deadline).await {
                    Ok(info) => Some(info),
                    Err(e) => {
                        resolve_err = Some(e);
                        None
                    }
                }
            })
            .await;
        let Some(info) = info else {
            return Err(resolve_err
                .unwrap_or_else(|| Error::NotFound(format!("failed to resolve {url}"))));
        };

        let accelerator = self.accelerator_address();
        let effective = info.effective_url(url);
        let target = if accelerator.is_empty() {
            effective.to_string()
        } else {
            let target = format!("{accelerator}/{effective}");
            tracing::debug!(url = %target, "fetching through accelerator");
            target
        };

        let mut req = self
            .state
            .http
            .get(&target)
            .header(RANGE, http::range_header(offset, count));
        if let Some(bearer) = info.bearer() {
            req = req.header(AUTHORIZATION, format!("Bearer {bearer}"));
        }
        let resp = match self.state.http.send(req, &target, deadline).await {
            Ok(resp) => resp,
            Err(e) => {
                info.poison();
                return Err(e);
            }
        };
        let status = resp.status();
        if status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT {
            drop(info);
            return Ok(resp);
        }
        info.poison();
        tracing::error!(url, offset, status = status.as_u16(), "blob fetch failed");
        Err(Error::Status {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }

    /// Resolve how reads against `url` must be issued: probe for a
    /// challenge, acquire a scope token, and re-issue to learn whether the
    /// registry serves the blob itself or redirects to a blob store.
    async fn resolve_url(&self, url: &str, deadline: Deadline) -> Result<UrlInfo> {
        let req = self.state.http.get(url).header(RANGE, "bytes=0-0");
        let resp = self.state.http.send(req, url, deadline).await?;
        let status = resp.status();
        if status != StatusCode::UNAUTHORIZED && status != StatusCode::FORBIDDEN {
            if status.is_success() {
                // Public blob, no token needed.
                return Ok(UrlInfo::Origin { bearer: None });
            }
            return Err(Error::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let header = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                Error::Protocol(format!("no www-authenticate header in response from {url}"))
            })?;
        let challenge = Challenge::parse(header)?;
        drop(resp);

        let mut token_err = None;
        let token = self
            .state
            .scope_token
            .acquire(challenge.scope.clone(), async {
                let credentials = (self.state.credentials)(url);
                match auth::fetch_token(&self.state.http, &challenge, &credentials, deadline).await
                {
                    Ok(token) => Some(token),
                    Err(e) => {
                        token_err = Some(e);
                        None
                    }
                }
            })
            .await;
        let Some(token) = token else {
            tracing::error!(url, scope = %challenge.scope, "failed to obtain token");
            // Whatever went wrong at the realm (refused credentials, an
            // unreachable endpoint, a tokenless body), the caller sees an
            // auth failure so its retry classification lands on EPERM.
            return Err(match token_err {
                Some(e) => {
                    Error::PermissionDenied(format!("failed to obtain token for {url}: {e}"))
                }
                None => Error::PermissionDenied(format!("failed to obtain token for {url}")),
            });
        };

        let req = self
            .state
            .http
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", &*token));
        let resp = match self.state.http.send(req, url, deadline).await {
            Ok(resp) => resp,
            Err(e) => {
                token.poison();
                return Err(e);
            }
        };
        let status = resp.status();
        if status.is_redirection() {
            // Auth passed; reads go to the foreign location, unauthenticated.
            let location = resp
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::Protocol(format!("redirect from {url} without a location header"))
                })?;
            return Ok(UrlInfo::Redirect { location });
        }
        if status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT {
            // The handle derefs to the cached String; this clones the token
            // out of the cache, not the handle.
            let bearer = (!token.is_empty()).then(|| String::clone(&token));
            return Ok(UrlInfo::Origin { bearer });
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            tracing::warn!(url, status = status.as_u16(), "token invalid, will refresh on next resolve");
        }
        token.poison();
        tracing::error!(url, status = status.as_u16(), "failed to resolve endpoint");
        Err(Error::Status {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}

#[async_trait]
impl Filesystem for RegistryFs {
    async fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn File>> {
        if mode != OpenMode::Read {
            return Err(Error::Unsupported("open for writing"));
        }
        Ok(Box::new(RegistryFs::open(self, path).await?))
    }

    async fn stat(&self, path: &str) -> Result<Metadata> {
        RegistryFs::stat(self, path).await
    }
}
