//! Request and result shapes of the storage facade.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use stowage_core::{PrecomputedThumbnail, ProcessingOptions, UploadRequest, UploadResult};

/// One file handed to the facade for storage.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub tenant_id: i64,
    pub folder: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
    pub options: ProcessingOptions,
    pub thumbnail: Option<PrecomputedThumbnail>,
}

impl FileUpload {
    pub fn new(
        tenant_id: i64,
        folder: impl Into<String>,
        filename: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            tenant_id,
            folder: folder.into(),
            filename: filename.into(),
            content_type: None,
            data: data.into(),
            options: ProcessingOptions::default(),
            thumbnail: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_options(mut self, options: ProcessingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: PrecomputedThumbnail) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }

    pub(crate) fn into_request(self) -> UploadRequest {
        let mut request = UploadRequest::from_bytes(self.tenant_id, self.folder, self.filename, self.data)
            .with_options(self.options);
        request.content_type = self.content_type;
        request.thumbnail = self.thumbnail;
        request
    }
}

/// Upload result plus the channel that stored it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub channel_id: i64,
    pub tenant_id: i64,
    #[serde(flatten)]
    pub upload: UploadResult,
}

/// Enough of a stored file to delete it and account for the freed bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub channel_id: i64,
    pub tenant_id: i64,
    pub original_path: String,
    pub thumbnail_path: Option<String>,
    pub size: u64,
}

impl From<&StoredFile> for FileRef {
    fn from(file: &StoredFile) -> Self {
        Self {
            channel_id: file.channel_id,
            tenant_id: file.tenant_id,
            original_path: file.upload.original_path.clone(),
            thumbnail_path: file.upload.thumbnail_path.clone(),
            size: file.upload.size,
        }
    }
}
