//! Stowage Services Layer
//!
//! [`StorageService`] is the single entry point collaborators use: it runs
//! upload validation, routes requests through the [`StorageManager`],
//! attaches the resolved channel id to results, applies the proxy policy to
//! URLs and emits usage events. The storage, processing and infrastructure
//! types callers need are re-exported from here.

pub mod storage_service;
pub mod types;

pub use storage_service::StorageService;
pub use types::{FileRef, FileUpload, StoredFile};

#[cfg(feature = "usage-queue")]
pub use stowage_infra::{UsageQueue, UsageWorker};
pub use stowage_processing::{sanitize_filename, UploadValidator, ValidationError};
pub use stowage_storage::{
    AdapterRegistry, BackendType, ByteStream, StorageAdapter, StorageError, StorageManager,
    StorageResult,
};
