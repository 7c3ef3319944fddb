//! In-memory channel repository
//!
//! Used by tests and by deployments that keep channel definitions in a JSON
//! file rather than a database.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::hooks::ChannelRepository;
use crate::models::Channel;

#[derive(Default)]
pub struct InMemoryChannelRepository {
    channels: RwLock<BTreeMap<i64, Channel>>,
}

impl InMemoryChannelRepository {
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            channels: RwLock::new(channels.into_iter().map(|c| (c.id, c)).collect()),
        }
    }

    /// Load a JSON array of channels.
    pub async fn from_json_file(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            StorageError::internal(format!("failed to read channel file {}", path.display()))
                .with_source(e)
        })?;
        let channels: Vec<Channel> = serde_json::from_str(&raw).map_err(|e| {
            StorageError::internal(format!("failed to parse channel file {}", path.display()))
                .with_source(e)
        })?;
        tracing::info!(
            path = %path.display(),
            channels = channels.len(),
            "Loaded channel definitions"
        );
        Ok(Self::new(channels))
    }

    /// Insert or replace a channel. Cached adapters are not invalidated;
    /// callers refresh the manager explicitly.
    pub async fn upsert(&self, channel: Channel) {
        self.channels.write().await.insert(channel.id, channel);
    }

    pub async fn remove(&self, channel_id: i64) -> Option<Channel> {
        self.channels.write().await.remove(&channel_id)
    }
}

#[async_trait]
impl ChannelRepository for InMemoryChannelRepository {
    async fn get_channel(&self, channel_id: i64) -> StorageResult<Option<Channel>> {
        Ok(self.channels.read().await.get(&channel_id).cloned())
    }

    async fn get_default_channel(&self) -> StorageResult<Option<Channel>> {
        // BTreeMap order makes the lowest id win when several are flagged.
        Ok(self
            .channels
            .read()
            .await
            .values()
            .find(|c| c.status.enabled && c.status.is_default)
            .cloned())
    }

    async fn list_channels(&self) -> StorageResult<Vec<Channel>> {
        Ok(self
            .channels
            .read()
            .await
            .values()
            .filter(|c| c.status.enabled)
            .cloned()
            .collect())
    }
}
