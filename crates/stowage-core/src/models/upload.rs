use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Where the upload bytes come from.
#[derive(Debug, Clone)]
pub enum UploadSource {
    Bytes(Bytes),
    /// Read from a local file at upload time.
    File(PathBuf),
}

/// Image processing options for an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    /// Encode quality (1-100) used when compressing.
    pub quality: u8,
    /// Bounding box for compression; 0 means unbounded.
    pub max_width: u32,
    pub max_height: u32,
    pub compress: bool,
    /// Target byte size for compression; `None` only re-encodes.
    pub target_size: Option<u64>,
    pub convert_heic: bool,
    pub generate_thumbnail: bool,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub thumbnail_quality: u8,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            quality: 85,
            max_width: 0,
            max_height: 0,
            compress: false,
            target_size: None,
            convert_heic: false,
            generate_thumbnail: false,
            thumbnail_width: 300,
            thumbnail_height: 300,
            thumbnail_quality: 80,
        }
    }
}

/// Thumbnail bytes produced ahead of time by the caller.
#[derive(Debug, Clone)]
pub struct PrecomputedThumbnail {
    pub data: Bytes,
    pub format: String,
}

/// Adapter-level upload request.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub source: UploadSource,
    /// Already-processed buffer; takes precedence over `source`.
    pub processed: Option<Bytes>,
    pub tenant_id: i64,
    pub folder: String,
    pub filename: String,
    /// Fixed content type; inferred from the filename or detected format when absent.
    pub content_type: Option<String>,
    pub options: ProcessingOptions,
    pub thumbnail: Option<PrecomputedThumbnail>,
}

impl UploadRequest {
    pub fn from_bytes(
        tenant_id: i64,
        folder: impl Into<String>,
        filename: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            source: UploadSource::Bytes(data.into()),
            processed: None,
            tenant_id,
            folder: folder.into(),
            filename: filename.into(),
            content_type: None,
            options: ProcessingOptions::default(),
            thumbnail: None,
        }
    }

    pub fn with_options(mut self, options: ProcessingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: PrecomputedThumbnail) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }
}

/// Canonical result of a successful upload.
///
/// `original_path` and `logical_path` are never empty. A failed thumbnail is
/// reported through `thumbnail_generation_failed` and never fails the upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// Physical object key.
    pub original_path: String,
    /// Human-facing path, free of shard and tenant segments.
    pub logical_path: String,
    /// Logical URL (`/` + logical path).
    pub url: String,
    /// Direct backend URL (filesystem path for local backends).
    pub full_url: String,
    pub thumbnail_path: Option<String>,
    pub thumbnail_url: Option<String>,
    pub full_thumbnail_url: Option<String>,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    /// Lowercase hex SHA-256 of the bytes actually written.
    pub hash: String,
    pub content_type: String,
    pub format: String,
    pub thumbnail_generation_failed: bool,
    pub thumbnail_failure_reason: Option<String>,
}
