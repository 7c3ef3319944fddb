//! Storage manager
//!
//! Resolves channel ids to live adapters. Adapters are built on first use
//! through the [`AdapterRegistry`] and cached until an explicit refresh; the
//! default channel choice is cached the same way so it stays stable between
//! calls.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use stowage_core::{
    Channel, ChannelRepository, ImagePipeline, ObjectAcl, Settings, StorageError, StorageResult,
    UploadRequest, UploadResult, UrlOptions,
};
use tokio::sync::RwLock;

use crate::registry::AdapterRegistry;
use crate::traits::{AdapterContext, ByteStream, StorageAdapter};

const DEFAULT_BATCH_CONCURRENCY: usize = 4;

/// Cached adapters plus refresh counters.
///
/// An adapter is only cached when no refresh touched its channel while it was
/// being built.
#[derive(Default)]
struct AdapterCache {
    adapters: HashMap<i64, Arc<dyn StorageAdapter>>,
    /// Bumped per channel by `refresh_adapter`.
    generations: HashMap<i64, u64>,
    /// Bumped by `refresh_all`.
    epoch: u64,
}

impl AdapterCache {
    fn stamp(&self, channel_id: i64) -> (u64, u64) {
        (
            self.epoch,
            self.generations.get(&channel_id).copied().unwrap_or(0),
        )
    }
}

pub struct StorageManager {
    repository: Arc<dyn ChannelRepository>,
    registry: Arc<AdapterRegistry>,
    ctx: AdapterContext,
    cache: RwLock<AdapterCache>,
    default_channel: RwLock<Option<i64>>,
    batch_concurrency: usize,
}

impl StorageManager {
    pub fn new(
        repository: Arc<dyn ChannelRepository>,
        registry: Arc<AdapterRegistry>,
        pipeline: Arc<dyn ImagePipeline>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            repository,
            registry,
            ctx: AdapterContext::new(pipeline, settings),
            cache: RwLock::new(AdapterCache::default()),
            default_channel: RwLock::new(None),
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }

    /// Upper bound on concurrent uploads within one batch.
    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency.max(1);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.ctx.settings
    }

    /// Live adapter for `channel_id`, initializing it on first use.
    pub async fn get_adapter(&self, channel_id: i64) -> StorageResult<Arc<dyn StorageAdapter>> {
        let stamp = {
            let cache = self.cache.read().await;
            if let Some(adapter) = cache.adapters.get(&channel_id) {
                return Ok(adapter.clone());
            }
            cache.stamp(channel_id)
        };

        let channel = self.channel(channel_id).await?;
        if !channel.status.enabled {
            return Err(StorageError::internal(format!(
                "storage channel {} is disabled",
                channel_id
            )));
        }

        let start = Instant::now();
        let adapter = self
            .registry
            .create(&channel, self.ctx.clone())
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    channel_id = channel_id,
                    backend = %channel.backend_type,
                    "Storage adapter initialization failed"
                );
                e
            })?;

        let mut cache = self.cache.write().await;
        if cache.stamp(channel_id) != stamp {
            tracing::debug!(
                channel_id = channel_id,
                "Channel refreshed during initialization, adapter not cached"
            );
            return Ok(adapter);
        }
        // Another task may have initialized the same channel meanwhile.
        if let Some(existing) = cache.adapters.get(&channel_id) {
            return Ok(existing.clone());
        }
        cache.adapters.insert(channel_id, adapter.clone());

        tracing::info!(
            channel_id = channel_id,
            backend = %adapter.backend_type(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Storage adapter initialized"
        );
        Ok(adapter)
    }

    /// Current channel record from the repository; never cached.
    pub async fn channel(&self, channel_id: i64) -> StorageResult<Channel> {
        self.repository
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| StorageError::not_found(format!("storage channel {} not found", channel_id)))
    }

    /// Id of the default channel; cached until a refresh.
    pub async fn default_channel_id(&self) -> StorageResult<i64> {
        if let Some(id) = *self.default_channel.read().await {
            return Ok(id);
        }

        let channel = self
            .repository
            .get_default_channel()
            .await?
            .ok_or_else(|| StorageError::internal("no default storage channel configured"))?;
        if !channel.status.enabled {
            return Err(StorageError::internal(format!(
                "default storage channel {} is disabled",
                channel.id
            )));
        }

        let mut cached = self.default_channel.write().await;
        Ok(*cached.get_or_insert(channel.id))
    }

    /// Explicit channel, or the default one when `channel_id` is `None`.
    pub async fn resolve_channel(&self, channel_id: Option<i64>) -> StorageResult<i64> {
        match channel_id {
            Some(id) => Ok(id),
            None => self.default_channel_id().await,
        }
    }

    pub async fn upload(&self, channel_id: i64, request: UploadRequest) -> StorageResult<UploadResult> {
        let adapter = self.get_adapter(channel_id).await?;
        adapter.upload(request).await.map_err(|e| {
            tracing::error!(error = %e, channel_id = channel_id, "Upload failed");
            e
        })
    }

    /// Upload to `channel_id`, or to the default channel. Returns the channel
    /// actually used.
    pub async fn upload_with_best(
        &self,
        channel_id: Option<i64>,
        request: UploadRequest,
    ) -> StorageResult<(i64, UploadResult)> {
        let channel_id = self.resolve_channel(channel_id).await?;
        let result = self.upload(channel_id, request).await?;
        Ok((channel_id, result))
    }

    /// Upload every request to one channel. Resolution failures fail the
    /// whole batch; upload failures are reported per item, in input order.
    pub async fn batch_upload(
        &self,
        channel_id: Option<i64>,
        requests: Vec<UploadRequest>,
    ) -> StorageResult<(i64, Vec<StorageResult<UploadResult>>)> {
        let channel_id = self.resolve_channel(channel_id).await?;
        let adapter = self.get_adapter(channel_id).await?;
        let total = requests.len();

        let results: Vec<StorageResult<UploadResult>> = stream::iter(requests)
            .map(|request| {
                let adapter = adapter.clone();
                async move { adapter.upload(request).await }
            })
            .buffered(self.batch_concurrency)
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        tracing::info!(
            channel_id = channel_id,
            total = total,
            failed = failed,
            "Batch upload finished"
        );
        Ok((channel_id, results))
    }

    pub async fn delete(&self, channel_id: i64, key: &str) -> StorageResult<()> {
        self.get_adapter(channel_id).await?.delete(key).await
    }

    pub async fn exists(&self, channel_id: i64, key: &str) -> StorageResult<bool> {
        self.get_adapter(channel_id).await?.exists(key).await
    }

    pub async fn read_file(&self, channel_id: i64, key: &str) -> StorageResult<ByteStream> {
        self.get_adapter(channel_id).await?.read_file(key).await
    }

    pub async fn get_url(&self, channel_id: i64, key: &str, options: &UrlOptions) -> StorageResult<String> {
        self.get_adapter(channel_id).await?.get_url(key, options).await
    }

    pub async fn set_object_acl(&self, channel_id: i64, key: &str, acl: ObjectAcl) -> StorageResult<()> {
        self.get_adapter(channel_id).await?.set_object_acl(key, acl).await
    }

    /// Evict the cached adapter so the next use re-reads its configuration.
    pub async fn refresh_adapter(&self, channel_id: i64) {
        {
            let mut cache = self.cache.write().await;
            cache.adapters.remove(&channel_id);
            *cache.generations.entry(channel_id).or_default() += 1;
        }
        let mut default_channel = self.default_channel.write().await;
        if *default_channel == Some(channel_id) {
            *default_channel = None;
        }
        tracing::info!(channel_id = channel_id, "Storage adapter refreshed");
    }

    /// Drop every cached adapter and the cached default choice.
    pub async fn refresh_all(&self) {
        {
            let mut cache = self.cache.write().await;
            cache.adapters.clear();
            cache.generations.clear();
            cache.epoch += 1;
        }
        *self.default_channel.write().await = None;
        tracing::info!("All storage adapters refreshed");
    }

    /// Health of every enabled channel. Initialization failures are reported
    /// for their channel; they never abort the sweep.
    pub async fn health_check_all(&self) -> StorageResult<BTreeMap<i64, StorageResult<()>>> {
        let channels = self.repository.list_channels().await?;

        let checks = channels
            .into_iter()
            .filter(|channel| channel.status.enabled)
            .map(|channel| async move {
                let result = match self.get_adapter(channel.id).await {
                    Ok(adapter) => adapter.health_check().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = &result {
                    tracing::warn!(
                        error = %e,
                        channel_id = channel.id,
                        backend = %channel.backend_type,
                        "Storage health check failed"
                    );
                }
                (channel.id, result)
            });

        Ok(futures::future::join_all(checks).await.into_iter().collect())
    }

    /// Number of cached adapters.
    pub async fn cached_adapters(&self) -> usize {
        self.cache.read().await.adapters.len()
    }
}
