//! Collaborator interfaces
//!
//! The storage layer consumes three external collaborators through these
//! traits: the channel repository, the image pipeline and the usage reporter.
//! Each has a small default implementation so the core runs without the
//! surrounding application.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;
use crate::models::{Channel, ProcessingOptions, UsageEvent};

/// Read-only access to configured channels.
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    /// Channel and its configuration by id.
    async fn get_channel(&self, channel_id: i64) -> StorageResult<Option<Channel>>;

    /// The channel currently flagged as default, if any.
    async fn get_default_channel(&self) -> StorageResult<Option<Channel>>;

    /// All enabled channels.
    async fn list_channels(&self) -> StorageResult<Vec<Channel>>;
}

/// Format and dimensions detected from image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Lowercase format name (`jpeg`, `png`, ...).
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub content_type: String,
}

/// Encoded output of a pipeline step.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub data: Bytes,
    pub format: String,
}

/// Narrow call contract of the image codec engine.
///
/// Implementations are black boxes turning bytes + dimensions + quality into
/// bytes + format, or failing.
#[async_trait]
pub trait ImagePipeline: Send + Sync {
    /// Convert HEIC/HEIF bytes to JPEG.
    async fn convert_heic_to_jpeg(&self, data: Bytes) -> StorageResult<Bytes>;

    /// Re-encode (and optionally downscale) towards `options.target_size`.
    async fn compress(&self, data: Bytes, options: &ProcessingOptions) -> StorageResult<EncodedImage>;

    /// Detect format and dimensions without a full decode where possible.
    fn detect(&self, data: &[u8]) -> Option<ImageInfo>;

    /// Generate a thumbnail, falling back to a lower-fidelity encode when
    /// the primary attempt fails. Errors only when both attempts fail.
    async fn generate_thumbnail(
        &self,
        data: Bytes,
        width: u32,
        height: u32,
        quality: u8,
    ) -> StorageResult<EncodedImage>;
}

/// Trait for reporting usage statistics
///
/// Called from the background drain worker, never from the request path.
#[async_trait]
pub trait UsageReporter: Send + Sync {
    async fn report(&self, event: UsageEvent) -> Result<(), String>;
}

/// No-op implementation for when usage tracking is disabled
pub struct NoOpUsageReporter;

#[async_trait]
impl UsageReporter for NoOpUsageReporter {
    async fn report(&self, _event: UsageEvent) -> Result<(), String> {
        Ok(())
    }
}
