//! Core domain types and shared logic for the wharf registry filesystem.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Bearer challenge parsing and the composed token endpoint URL
//! - Resolved blob endpoints (redirect vs. origin mode)
//! - Credentials and the credential callback
//! - The error taxonomy and its errno mapping
//! - Deadline bookkeeping for retries
//! - Content hashing for upload finalization
//! - The filesystem/file traits consumed by the image-mount layer

pub mod challenge;
pub mod config;
pub mod credentials;
pub mod deadline;
pub mod error;
pub mod fs;
pub mod hash;
pub mod url_info;

pub use challenge::Challenge;
pub use config::{RegistryConfig, UploadConfig};
pub use credentials::{CredentialProvider, Credentials};
pub use deadline::{Deadline, RETRY_ATTEMPTS, RETRY_SLEEP};
pub use error::{Error, Result};
pub use fs::{File, FileKind, Filesystem, Metadata, OpenMode};
pub use hash::{ContentHash, ContentHasher};
pub use url_info::UrlInfo;
