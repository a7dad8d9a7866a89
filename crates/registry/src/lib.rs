//! Read-only virtual filesystem over OCI/Docker registry blobs.
//!
//! Blobs are exposed as random-access files whose reads map to HTTP range
//! requests. The filesystem handles the Registry V2 bearer challenge dance,
//! caches tokens per auth scope and resolved endpoints per URL under
//! single-flight construction, and optionally rewrites every fetch through
//! a P2P accelerator prefix. [`RegistryUploader`] covers the write
//! direction: chunked PATCH uploads finalized with a digest PUT.

mod auth;
mod http;

pub mod file;
pub mod fs;
pub mod uploader;

pub use file::RegistryFile;
pub use fs::RegistryFs;
pub use uploader::{RegistryUploader, UploadState, upload_file};
