//! Stowage Core Library
//!
//! This crate provides the domain models, error types, configuration and
//! collaborator traits shared across all stowage components.

pub mod config;
pub mod error;
pub mod hooks;
pub mod models;
pub mod repository;
pub mod storage_types;

// Re-export commonly used types
pub use config::{Settings, SettingsHandle};
pub use error::{BoxError, ErrorKind, LogLevel, StorageError, StorageResult};
pub use hooks::{
    ChannelRepository, EncodedImage, ImageInfo, ImagePipeline, NoOpUsageReporter, UsageReporter,
};
pub use models::{
    Capabilities, Channel, ChannelConfig, ChannelStatus, ObjectAcl, PrecomputedThumbnail,
    ProcessingOptions, UploadRequest, UploadResult, UploadSource, UrlOptions, UsageEvent,
    STANDARD_IMAGE_FORMATS,
};
pub use repository::InMemoryChannelRepository;
pub use storage_types::BackendType;
