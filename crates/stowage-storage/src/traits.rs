//! Storage adapter trait
//!
//! Every backend implements [`StorageAdapter`]. Adapters are constructed
//! fully validated (construction is the `Initialize` step) and are safe for
//! concurrent use afterwards; their configuration never changes.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use stowage_core::{
    BackendType, Capabilities, ImagePipeline, ObjectAcl, Settings, StorageError, StorageResult,
    UploadRequest, UploadResult, UrlOptions,
};

use crate::keys::KeyBuilder;
use crate::url_policy::UrlPolicy;

/// Streamed object body.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Collaborators every adapter shares.
#[derive(Clone)]
pub struct AdapterContext {
    pub pipeline: Arc<dyn ImagePipeline>,
    pub keys: KeyBuilder,
    pub settings: Arc<Settings>,
}

impl AdapterContext {
    pub fn new(pipeline: Arc<dyn ImagePipeline>, settings: Arc<Settings>) -> Self {
        Self {
            pipeline,
            keys: KeyBuilder::new(),
            settings,
        }
    }
}

/// Storage adapter trait
///
/// The object-level operations (`put_object`, `delete`, `exists`,
/// `read_file`) are backend specific. `upload` and `get_url` have shared
/// default implementations built on top of them.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    fn backend_type(&self) -> BackendType;

    /// Static feature flags; identical for every instance of a type.
    fn capabilities(&self) -> Capabilities;

    fn context(&self) -> &AdapterContext;

    /// Configured access control of the channel.
    fn access_control(&self) -> ObjectAcl {
        ObjectAcl::PublicRead
    }

    /// Write `data` under `key`, creating parents as needed.
    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Full upload flow: processing, key building, write, thumbnail, hash.
    async fn upload(&self, request: UploadRequest) -> StorageResult<UploadResult> {
        crate::upload::execute(self, request).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    async fn read_file(&self, key: &str) -> StorageResult<ByteStream>;

    /// Unsigned direct URL (filesystem path for local backends).
    fn public_url(&self, key: &str) -> String;

    /// Expiring URL; only called when `supports_signed_url` is set.
    async fn signed_url(&self, _key: &str, _expires_in: Duration) -> StorageResult<String> {
        Err(StorageError::internal(format!(
            "{} backend does not support signed URLs",
            self.backend_type()
        )))
    }

    async fn get_url(&self, key: &str, options: &UrlOptions) -> StorageResult<String> {
        match UrlPolicy::decide(self.backend_type(), self.access_control(), &self.capabilities()) {
            UrlPolicy::LocalPath | UrlPolicy::Direct => Ok(self.public_url(key)),
            UrlPolicy::Signed => {
                let expires_in = options
                    .expires_in
                    .unwrap_or(self.context().settings.presign_expiry);
                self.signed_url(key, expires_in).await
            }
            UrlPolicy::Unavailable => Err(StorageError::permission(format!(
                "private {} channel cannot expose a direct URL",
                self.backend_type()
            ))),
        }
    }

    /// Per-object ACL update; a no-op where the backend has no such concept.
    async fn set_object_acl(&self, _key: &str, _acl: ObjectAcl) -> StorageResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<()>;
}

/// Buffer a whole stream.
pub async fn collect_stream(mut stream: ByteStream) -> StorageResult<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Single-chunk stream over an in-memory body.
pub fn once_stream(data: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}
