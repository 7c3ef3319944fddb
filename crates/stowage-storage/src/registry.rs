//! Adapter registry
//!
//! Maps a channel's backend type tag to an async constructor. The registry is
//! an explicit value built at startup and handed to the manager; nothing
//! registers itself. Vendor aliases of the S3 family are plain entries that
//! share one constructor.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use stowage_core::{Channel, ChannelConfig, StorageError, StorageResult};

use crate::traits::{AdapterContext, StorageAdapter};

/// Boxed future returned by a constructor.
pub type AdapterFuture = Pin<Box<dyn Future<Output = StorageResult<Arc<dyn StorageAdapter>>> + Send>>;

/// Builds a fully validated adapter from `(tag, config, context)`.
pub type AdapterConstructor =
    Arc<dyn Fn(String, ChannelConfig, AdapterContext) -> AdapterFuture + Send + Sync>;

/// Erase a constructed adapter.
pub fn boxed<A: StorageAdapter + 'static>(adapter: A) -> StorageResult<Arc<dyn StorageAdapter>> {
    Ok(Arc::new(adapter))
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    constructors: HashMap<String, AdapterConstructor>,
}

impl AdapterRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every backend compiled into this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "storage-local")]
        registry.register("local", |_tag, config, ctx| async move {
            boxed(crate::local::LocalStorage::new(&config, ctx).await?)
        });

        #[cfg(feature = "storage-s3")]
        for tag in crate::s3::S3_FAMILY_TAGS {
            registry.register(tag, |tag, config, ctx| async move {
                boxed(crate::s3::S3Storage::new(&tag, &config, ctx).await?)
            });
        }

        #[cfg(feature = "storage-s3-compat")]
        for tag in ["s3_compat", "s3-compat"] {
            registry.register(tag, |_tag, config, ctx| async move {
                boxed(crate::s3_compat::S3CompatStorage::new(&config, ctx).await?)
            });
        }

        #[cfg(feature = "storage-ftp")]
        for tag in ["ftp", "ftps"] {
            registry.register(tag, |tag, config, ctx| async move {
                boxed(crate::ftp::FtpStorage::new(&tag, &config, ctx).await?)
            });
        }

        #[cfg(feature = "storage-ssh")]
        registry.register("ssh", |_tag, config, ctx| async move {
            boxed(crate::ssh::SshStorage::new(&config, ctx).await?)
        });

        #[cfg(feature = "storage-webdav")]
        registry.register("webdav", |_tag, config, ctx| async move {
            boxed(crate::webdav::WebDavStorage::new(&config, ctx).await?)
        });

        #[cfg(feature = "storage-azure")]
        registry.register("azure", |_tag, config, ctx| async move {
            boxed(crate::azure::AzureBlobStorage::new(&config, ctx).await?)
        });

        #[cfg(feature = "storage-upyun")]
        registry.register("upyun", |_tag, config, ctx| async move {
            boxed(crate::upyun::UpyunStorage::new(&config, ctx).await?)
        });

        registry
    }

    /// Register (or replace) the constructor for `tag`. Tags are
    /// case-insensitive.
    pub fn register<F, Fut>(&mut self, tag: &str, constructor: F)
    where
        F: Fn(String, ChannelConfig, AdapterContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StorageResult<Arc<dyn StorageAdapter>>> + Send + 'static,
    {
        let constructor: AdapterConstructor =
            Arc::new(move |tag, config, ctx| Box::pin(constructor(tag, config, ctx)));
        self.constructors.insert(tag.to_lowercase(), constructor);
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.constructors.contains_key(&tag.to_lowercase())
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Build and validate the adapter for `channel`.
    pub async fn create(
        &self,
        channel: &Channel,
        ctx: AdapterContext,
    ) -> StorageResult<Arc<dyn StorageAdapter>> {
        let tag = channel.backend_type.trim().to_lowercase();
        let constructor = self.constructors.get(&tag).ok_or_else(|| {
            StorageError::internal(format!(
                "storage backend '{}' is not registered (channel {})",
                channel.backend_type, channel.id
            ))
        })?;
        constructor(tag, channel.config.clone(), ctx).await
    }
}
