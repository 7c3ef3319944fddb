//! Stowage Storage Library
//!
//! The adapter layer: one [`StorageAdapter`] per backend type, the
//! [`AdapterRegistry`] that maps type tags to constructors, and the
//! [`StorageManager`] that resolves channels to cached adapters.
//!
//! # Object key format
//!
//! Every backend uses the same physical layout:
//!
//! - **Originals**: `files/{shard}/{tenant_id}/{folder}/{filename}`
//! - **Thumbnails**: `thumbnails/{shard}/{tenant_id}/{folder}/{stem}.{ext}`
//!
//! The shard is `tenant_id mod 256` as two hex digits. Human-facing URLs use
//! the logical path (`{folder}/{filename}`), which never exposes the shard or
//! tenant segments. Keys must not contain `..` or a leading `/`.

#[cfg(feature = "storage-azure")]
pub mod azure;
#[cfg(feature = "storage-ftp")]
pub mod ftp;
#[cfg(any(
    feature = "storage-webdav",
    feature = "storage-azure",
    feature = "storage-upyun"
))]
pub(crate) mod http;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod manager;
pub mod registry;
#[cfg(feature = "storage-s3")]
pub mod s3;
#[cfg(feature = "storage-s3-compat")]
pub mod s3_compat;
pub mod signing;
#[cfg(feature = "storage-ssh")]
pub mod ssh;
pub mod traits;
pub mod upload;
#[cfg(feature = "storage-upyun")]
pub mod upyun;
pub mod url_policy;
#[cfg(feature = "storage-webdav")]
pub mod webdav;

// Re-export commonly used types
#[cfg(feature = "storage-azure")]
pub use azure::AzureBlobStorage;
#[cfg(feature = "storage-ftp")]
pub use ftp::FtpStorage;
pub use keys::{KeyBuilder, ObjectKeys};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use manager::StorageManager;
pub use registry::{AdapterConstructor, AdapterRegistry};
#[cfg(feature = "storage-s3")]
pub use s3::{S3Preset, S3Storage};
#[cfg(feature = "storage-s3-compat")]
pub use s3_compat::S3CompatStorage;
#[cfg(feature = "storage-ssh")]
pub use ssh::SshStorage;
pub use stowage_core::{BackendType, StorageError, StorageResult};
pub use traits::{collect_stream, AdapterContext, ByteStream, StorageAdapter};
#[cfg(feature = "storage-upyun")]
pub use upyun::UpyunStorage;
pub use url_policy::UrlPolicy;
#[cfg(feature = "storage-webdav")]
pub use webdav::WebDavStorage;
