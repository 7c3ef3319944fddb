use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use stowage_core::{
    BackendType, Capabilities, ChannelConfig, StorageError, StorageResult, STANDARD_IMAGE_FORMATS,
};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use crate::keys::validate_key;
use crate::traits::{AdapterContext, ByteStream, StorageAdapter};
use crate::url_policy::encode_key;

const CAPABILITIES: Capabilities = Capabilities {
    supports_signed_url: false,
    supports_cdn: false,
    supports_resize: true,
    supports_acl: false,
    max_file_size: 0,
    supported_formats: STANDARD_IMAGE_FORMATS,
};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Local filesystem storage implementation
pub struct LocalStorage {
    base_path: PathBuf,
    /// Served URL prefix; only used when direct links are allowed.
    base_url: Option<String>,
    ctx: AdapterContext,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Config keys
    /// * `base_path` - Root directory for file storage (required)
    /// * `base_url` - Base URL for serving files (e.g., "http://localhost:3000/media")
    /// * `allow_direct` - Use `base_url` links instead of filesystem paths (default true)
    pub async fn new(config: &ChannelConfig, ctx: AdapterContext) -> StorageResult<Self> {
        config.require(&["base_path"])?;
        let base_path = PathBuf::from(config.required("base_path")?);
        let base_url = config
            .get("base_url")
            .filter(|_| config.get_bool("allow_direct", true))
            .map(|url| url.trim_end_matches('/').to_string());

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::internal(format!(
                "Failed to create storage directory {}",
                base_path.display()
            ))
            .with_source(e)
        })?;

        Ok(LocalStorage {
            base_path,
            base_url,
            ctx,
        })
    }

    /// Convert storage key to filesystem path with security validation
    ///
    /// Rejects keys that would escape the base storage directory, including
    /// through symlinks that already exist on disk. For paths that do not
    /// exist yet, the nearest existing ancestor must resolve inside the base.
    async fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        validate_key(storage_key)?;

        let path = self.base_path.join(storage_key);

        let base_canonical = fs::canonicalize(&self.base_path).await.map_err(|e| {
            StorageError::internal("Failed to canonicalize base path").with_source(e)
        })?;

        let mut current = path.as_path();
        let resolved = loop {
            match fs::canonicalize(current).await {
                Ok(canonical) => break canonical,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => match current.parent() {
                    Some(parent) => current = parent,
                    None => break base_canonical.clone(),
                },
                Err(e) => {
                    return Err(StorageError::from(e)
                        .context(format!("resolving {}", current.display())))
                }
            }
        };

        if resolved.strip_prefix(&base_canonical).is_err() {
            return Err(StorageError::permission(
                "Storage key resolves outside storage directory",
            ));
        }

        Ok(path)
    }

    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for LocalStorage {
    fn backend_type(&self) -> BackendType {
        BackendType::Local
    }

    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    async fn put_object(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        let path = self.key_to_path(key).await?;
        let size = data.len();

        self.ensure_parent_dir(&path).await?;

        let start = std::time::Instant::now();

        // Write to a sibling temp file and rename so readers never see a
        // partially written object.
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = path.with_file_name(format!(
            ".{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let write = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &path).await
        };

        if let Err(e) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            tracing::error!(
                error = %e,
                path = %path.display(),
                key = %key,
                size_bytes = size,
                "Local storage write failed"
            );
            return Err(StorageError::from(e).context(format!("writing {}", path.display())));
        }

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key).await?;
        let start = std::time::Instant::now();

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(StorageError::from(e).context(format!("deleting {}", path.display())))
            }
        }

        tracing::info!(
            path = %path.display(),
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key).await?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_file(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.key_to_path(key).await?;
        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::not_found(format!("file not found: {}", key))
            } else {
                StorageError::from(e).context(format!("opening {}", path.display()))
            }
        })?;

        tracing::debug!(path = %path.display(), key = %key, "Local storage read started");

        let stream = ReaderStream::new(file).map(|chunk| chunk.map_err(StorageError::from));
        Ok(Box::pin(stream))
    }

    fn public_url(&self, key: &str) -> String {
        match &self.base_url {
            Some(base_url) => format!("{}/{}", base_url, encode_key(key)),
            None => self.base_path.join(key).to_string_lossy().into_owned(),
        }
    }

    async fn health_check(&self) -> StorageResult<()> {
        let probe = self
            .base_path
            .join(format!(".stowage-health-{}", std::process::id()));
        fs::write(&probe, b"ok").await.map_err(|e| {
            StorageError::from(e).context(format!(
                "storage directory {} is not writable",
                self.base_path.display()
            ))
        })?;
        let _ = fs::remove_file(&probe).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::collect_stream;
    use std::sync::Arc;
    use stowage_core::{Settings, UrlOptions};
    use stowage_processing::DefaultImagePipeline;

    fn ctx() -> AdapterContext {
        AdapterContext::new(Arc::new(DefaultImagePipeline), Arc::new(Settings::default()))
    }

    async fn storage(dir: &tempfile::TempDir) -> LocalStorage {
        let config: ChannelConfig = [("base_path", dir.path().to_string_lossy().to_string())]
            .into_iter()
            .collect();
        LocalStorage::new(&config, ctx()).await.unwrap()
    }

    #[tokio::test]
    async fn test_missing_base_path_is_internal() {
        let err = LocalStorage::new(&ChannelConfig::new(), ctx())
            .await
            .err()
            .unwrap();
        assert!(err.is_internal());
    }

    #[tokio::test]
    async fn test_put_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir).await;

        storage
            .put_object("files/00/1/a.bin", Bytes::from_static(b"hello"), "text/plain")
            .await
            .unwrap();
        assert!(storage.exists("files/00/1/a.bin").await.unwrap());

        let body = collect_stream(storage.read_file("files/00/1/a.bin").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&body[..], b"hello");

        storage.delete("files/00/1/a.bin").await.unwrap();
        assert!(!storage.exists("files/00/1/a.bin").await.unwrap());
        // Deleting twice is fine.
        storage.delete("files/00/1/a.bin").await.unwrap();
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir).await;
        storage
            .put_object("k/a.bin", Bytes::from_static(b"x"), "application/octet-stream")
            .await
            .unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("k"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["a.bin".to_string()]);
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir).await;
        assert!(storage.read_file("../etc/passwd").await.is_err());
        assert!(storage.exists("/etc/passwd").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rejects_new_path_under_escaping_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let storage = storage(&dir).await;

        let err = storage
            .put_object("link/nested/new.jpg", Bytes::from_static(b"x"), "image/jpeg")
            .await
            .err()
            .unwrap();
        assert!(err.is_permission());
        assert!(!outside.path().join("nested").exists());
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir).await;
        let err = storage.read_file("files/none.jpg").await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_url_is_filesystem_path_without_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir).await;
        let url = storage
            .get_url("files/00/1/a.jpg", &UrlOptions::default())
            .await
            .unwrap();
        assert_eq!(url, dir.path().join("files/00/1/a.jpg").to_string_lossy());
    }

    #[tokio::test]
    async fn test_url_uses_base_url_when_direct_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let config: ChannelConfig = [
            ("base_path", dir.path().to_string_lossy().to_string()),
            ("base_url", "http://localhost:3000/media/".to_string()),
        ]
        .into_iter()
        .collect();
        let storage = LocalStorage::new(&config, ctx()).await.unwrap();
        assert_eq!(
            storage.public_url("files/a b.jpg"),
            "http://localhost:3000/media/files/a%20b.jpg"
        );
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = tempfile::tempdir().unwrap();
        storage(&dir).await.health_check().await.unwrap();
    }
}
