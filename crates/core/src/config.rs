//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Floor for the per-path file size cache TTL (seconds).
pub const MIN_META_TTL_SECS: u64 = 300;

/// Floor for the per-scope bearer token cache TTL (seconds).
pub const MIN_TOKEN_TTL_SECS: u64 = 30;

/// Floor for the per-URL resolved endpoint cache TTL (seconds).
pub const MIN_URL_TTL_SECS: u64 = 300;

/// Default upload chunk size: 1 MiB.
pub const DEFAULT_UPLOAD_CHUNK_SIZE: u64 = 1024 * 1024;

/// Maximum upload chunk size: 4 MiB.
pub const MAX_UPLOAD_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Minimum upload chunk size: 1 MiB.
pub const MIN_UPLOAD_CHUNK_SIZE: u64 = 1024 * 1024;

/// Registry filesystem configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// PEM bundle overriding the TLS trust anchors. `None` uses system roots.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Default deadline for a whole filesystem operation, in milliseconds.
    /// `None` means unbounded.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// File size cache TTL in seconds. Values below the floor are clamped up.
    #[serde(default = "default_meta_ttl_secs")]
    pub meta_ttl_secs: u64,
    /// Bearer token cache TTL in seconds. Values below the floor are clamped up.
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
    /// Resolved endpoint cache TTL in seconds. Values below the floor are clamped up.
    #[serde(default = "default_url_ttl_secs")]
    pub url_ttl_secs: u64,
}

fn default_meta_ttl_secs() -> u64 {
    MIN_META_TTL_SECS
}

fn default_token_ttl_secs() -> u64 {
    MIN_TOKEN_TTL_SECS
}

fn default_url_ttl_secs() -> u64 {
    MIN_URL_TTL_SECS
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ca_file: None,
            timeout_ms: None,
            meta_ttl_secs: default_meta_ttl_secs(),
            token_ttl_secs: default_token_ttl_secs(),
            url_ttl_secs: default_url_ttl_secs(),
        }
    }
}

impl RegistryConfig {
    /// The operation deadline as a Duration, if bounded.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// File size cache TTL, clamped to its floor.
    pub fn meta_ttl(&self) -> Duration {
        Duration::from_secs(self.meta_ttl_secs.max(MIN_META_TTL_SECS))
    }

    /// Token cache TTL, clamped to its floor.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs.max(MIN_TOKEN_TTL_SECS))
    }

    /// Resolved endpoint cache TTL, clamped to its floor.
    pub fn url_ttl(&self) -> Duration {
        Duration::from_secs(self.url_ttl_secs.max(MIN_URL_TTL_SECS))
    }
}

/// Uploader configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// PEM bundle overriding the TLS trust anchors. `None` uses system roots.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Chunk size for PATCH requests, in bytes. Clamped to [1 MiB, 4 MiB].
    #[serde(default = "default_upload_chunk_size")]
    pub chunk_size: u64,
    /// Deadline for each chunk push, in milliseconds. `None` means unbounded.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_upload_chunk_size() -> u64 {
    DEFAULT_UPLOAD_CHUNK_SIZE
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            ca_file: None,
            chunk_size: default_upload_chunk_size(),
            timeout_ms: None,
        }
    }
}

impl UploadConfig {
    /// The effective chunk size, clamped to the valid range.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
            .clamp(MIN_UPLOAD_CHUNK_SIZE, MAX_UPLOAD_CHUNK_SIZE) as usize
    }

    /// The per-push deadline as a Duration, if bounded.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
