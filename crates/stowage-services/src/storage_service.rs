//! Storage facade
//!
//! Collaborators never talk to adapters or the manager directly. The facade
//! validates uploads before any bytes reach a backend, reports usage after
//! successful writes and deletes, and decides whether a caller gets a direct
//! backend URL or a proxy URL.

use std::collections::BTreeMap;
use std::sync::Arc;

use stowage_core::{StorageError, StorageResult, UrlOptions, UsageEvent};
use stowage_processing::UploadValidator;
use stowage_storage::keys::validate_key;
use stowage_storage::url_policy::encode_key;
use stowage_storage::{ByteStream, StorageManager};

#[cfg(feature = "usage-queue")]
use anyhow::Context;
#[cfg(feature = "usage-queue")]
use stowage_core::{ChannelRepository, Settings, UsageReporter};
#[cfg(feature = "usage-queue")]
use stowage_infra::{UsageQueue, UsageWorker};
#[cfg(feature = "usage-queue")]
use stowage_processing::DefaultImagePipeline;
#[cfg(feature = "usage-queue")]
use stowage_storage::AdapterRegistry;

use crate::types::{FileRef, FileUpload, StoredFile};

pub struct StorageService {
    manager: Arc<StorageManager>,
    validator: UploadValidator,
    #[cfg(feature = "usage-queue")]
    usage: Option<UsageQueue>,
}

impl StorageService {
    /// Facade over `manager`, validating against the manager's upload limit.
    pub fn new(manager: Arc<StorageManager>) -> Self {
        let max_size = usize::try_from(manager.settings().max_upload_bytes).unwrap_or(usize::MAX);
        Self {
            manager,
            validator: UploadValidator::new(max_size),
            #[cfg(feature = "usage-queue")]
            usage: None,
        }
    }

    /// Build the default stack from `settings`: every compiled-in backend,
    /// the default image pipeline, and a usage queue draining into
    /// `reporter`. Must run inside a Tokio runtime.
    #[cfg(feature = "usage-queue")]
    pub fn bootstrap(
        settings: Settings,
        repository: Arc<dyn ChannelRepository>,
        reporter: Arc<dyn UsageReporter>,
    ) -> anyhow::Result<(Self, UsageWorker)> {
        settings.validate().context("invalid storage settings")?;
        let settings = Arc::new(settings);

        let registry = AdapterRegistry::with_defaults();
        tracing::info!(backends = ?registry.tags(), "Storage registry ready");

        let manager = StorageManager::new(
            repository,
            Arc::new(registry),
            Arc::new(DefaultImagePipeline::new()),
            settings.clone(),
        );
        let (queue, worker) = UsageQueue::spawn(reporter, settings.usage_queue_capacity);

        Ok((Self::new(Arc::new(manager)).with_usage_queue(queue), worker))
    }

    pub fn with_validator(mut self, validator: UploadValidator) -> Self {
        self.validator = validator;
        self
    }

    #[cfg(feature = "usage-queue")]
    pub fn with_usage_queue(mut self, queue: UsageQueue) -> Self {
        self.usage = Some(queue);
        self
    }

    pub fn manager(&self) -> &Arc<StorageManager> {
        &self.manager
    }

    fn validate(&self, file: &FileUpload) -> StorageResult<()> {
        self.validator
            .validate_all(&file.filename, file.content_type.as_deref(), &file.data)
            .map_err(|e| {
                tracing::warn!(
                    error = %e,
                    tenant_id = file.tenant_id,
                    filename = %file.filename,
                    size_bytes = file.data.len(),
                    "Upload rejected by validation"
                );
                StorageError::from(e)
            })
    }

    #[cfg(feature = "usage-queue")]
    fn record(&self, event: UsageEvent) {
        if let Some(queue) = &self.usage {
            queue.push(event);
        }
    }

    #[cfg(not(feature = "usage-queue"))]
    fn record(&self, _event: UsageEvent) {}

    fn stored(&self, channel_id: i64, tenant_id: i64, upload: stowage_core::UploadResult) -> StoredFile {
        self.record(UsageEvent::stored(tenant_id, channel_id, upload.size));
        StoredFile {
            channel_id,
            tenant_id,
            upload,
        }
    }

    /// Validate and store one file on `channel_id`, or on the default channel.
    pub async fn upload(&self, channel_id: Option<i64>, file: FileUpload) -> StorageResult<StoredFile> {
        self.validate(&file)?;
        let tenant_id = file.tenant_id;

        let (channel_id, upload) = self
            .manager
            .upload_with_best(channel_id, file.into_request())
            .await?;

        tracing::info!(
            channel_id = channel_id,
            tenant_id = tenant_id,
            key = %upload.original_path,
            size_bytes = upload.size,
            "File stored"
        );
        Ok(self.stored(channel_id, tenant_id, upload))
    }

    /// Store several files on one channel.
    ///
    /// Validation and upload failures are reported per item, in input order;
    /// only a failure to resolve the channel fails the whole batch.
    pub async fn batch_upload(
        &self,
        channel_id: Option<i64>,
        files: Vec<FileUpload>,
    ) -> StorageResult<(i64, Vec<StorageResult<StoredFile>>)> {
        let mut outcomes: Vec<Option<StorageResult<StoredFile>>> = Vec::with_capacity(files.len());
        let mut pending = Vec::new();
        let mut requests = Vec::new();

        for (index, file) in files.into_iter().enumerate() {
            match self.validate(&file) {
                Ok(()) => {
                    pending.push((index, file.tenant_id));
                    requests.push(file.into_request());
                    outcomes.push(None);
                }
                Err(e) => outcomes.push(Some(Err(e))),
            }
        }

        let (channel_id, results) = self.manager.batch_upload(channel_id, requests).await?;
        for ((index, tenant_id), result) in pending.into_iter().zip(results) {
            outcomes[index] = Some(result.map(|upload| self.stored(channel_id, tenant_id, upload)));
        }

        let outcomes = outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| Err(StorageError::internal("batch item produced no result")))
            })
            .collect();
        Ok((channel_id, outcomes))
    }

    /// Delete a stored file and its thumbnail.
    ///
    /// A failed thumbnail delete is logged; the original decides the result.
    pub async fn delete_file(&self, file: &FileRef) -> StorageResult<()> {
        let adapter = self.manager.get_adapter(file.channel_id).await?;
        adapter.delete(&file.original_path).await?;

        if let Some(thumbnail) = &file.thumbnail_path {
            if let Err(e) = adapter.delete(thumbnail).await {
                tracing::warn!(
                    error = %e,
                    channel_id = file.channel_id,
                    key = %thumbnail,
                    "Thumbnail delete failed"
                );
            }
        }

        self.record(UsageEvent::deleted(file.tenant_id, file.channel_id, file.size));
        tracing::info!(
            channel_id = file.channel_id,
            tenant_id = file.tenant_id,
            key = %file.original_path,
            "File deleted"
        );
        Ok(())
    }

    pub async fn read_file(&self, channel_id: i64, key: &str) -> StorageResult<ByteStream> {
        self.manager.read_file(channel_id, key).await
    }

    pub async fn exists(&self, channel_id: i64, key: &str) -> StorageResult<bool> {
        self.manager.exists(channel_id, key).await
    }

    /// URL a client should use for `key`.
    ///
    /// Proxy URLs are returned when the privacy setting forces proxying, when
    /// the channel sets `allow_direct=false`, or when the backend cannot
    /// expose a direct URL for a private object.
    pub async fn file_url(&self, channel_id: i64, key: &str) -> StorageResult<String> {
        validate_key(key)?;
        if self.manager.settings().force_proxy {
            return Ok(self.proxy_url(channel_id, key));
        }

        let channel = self.manager.channel(channel_id).await?;
        if !channel.config.get_bool("allow_direct", true) {
            return Ok(self.proxy_url(channel_id, key));
        }

        match self.manager.get_url(channel_id, key, &UrlOptions::default()).await {
            Ok(url) => Ok(url),
            Err(e) if e.is_permission() => {
                tracing::debug!(
                    error = %e,
                    channel_id = channel_id,
                    key = %key,
                    "Direct URL unavailable, serving through proxy"
                );
                Ok(self.proxy_url(channel_id, key))
            }
            Err(e) => Err(e),
        }
    }

    fn proxy_url(&self, channel_id: i64, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.manager.settings().proxy_base_url.trim_end_matches('/'),
            channel_id,
            encode_key(key)
        )
    }

    pub async fn health_check_all(&self) -> StorageResult<BTreeMap<i64, StorageResult<()>>> {
        self.manager.health_check_all().await
    }

    /// Drop the cached adapter so the channel's configuration is re-read.
    pub async fn refresh_channel(&self, channel_id: i64) {
        self.manager.refresh_adapter(channel_id).await;
    }
}
