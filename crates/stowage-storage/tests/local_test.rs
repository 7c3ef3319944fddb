//! End-to-end upload flow against the local filesystem adapter.

mod helpers;

use std::sync::Arc;

use bytes::Bytes;
use helpers::fixtures::{create_test_jpeg, jpeg_of_size, FailingThumbnailPipeline};
use stowage_core::{ChannelConfig, ImagePipeline, ProcessingOptions, UploadRequest};
use stowage_storage::{collect_stream, LocalStorage, StorageAdapter};

async fn local_storage(dir: &tempfile::TempDir, ctx: stowage_storage::AdapterContext) -> LocalStorage {
    let config: ChannelConfig = [("base_path", dir.path().to_string_lossy().to_string())]
        .into_iter()
        .collect();
    LocalStorage::new(&config, ctx).await.expect("local storage")
}

#[tokio::test]
async fn test_upload_jpeg_for_tenant() {
    let dir = tempfile::tempdir().unwrap();
    let storage = local_storage(&dir, helpers::context()).await;
    let data = jpeg_of_size(1000);

    let result = storage
        .upload(UploadRequest::from_bytes(7, "", "photo.jpg", data.clone()))
        .await
        .unwrap();

    assert_eq!(result.size, 1000);
    assert!(result.width > 0 && result.height > 0);
    assert_eq!(result.format, "jpeg");
    assert_eq!(result.content_type, "image/jpeg");
    assert_eq!(result.original_path, "files/07/7/photo.jpg");
    assert_eq!(result.logical_path, "photo.jpg");
    assert_eq!(result.url, "/photo.jpg");
    assert_eq!(result.hash.len(), 64);
    assert!(!result.thumbnail_generation_failed);

    let on_disk = std::fs::read(dir.path().join(&result.original_path)).unwrap();
    assert_eq!(on_disk.len(), 1000);
    assert_eq!(on_disk, data);
    assert_eq!(
        result.full_url,
        dir.path().join(&result.original_path).to_string_lossy()
    );
}

#[tokio::test]
async fn test_uploaded_bytes_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let storage = local_storage(&dir, helpers::context()).await;
    let data = create_test_jpeg(32, 24);

    let result = storage
        .upload(UploadRequest::from_bytes(300, "albums/2024", "a.jpg", data.clone()))
        .await
        .unwrap();
    assert_eq!(result.original_path, "files/2c/300/albums/2024/a.jpg");
    assert_eq!((result.width, result.height), (32, 24));

    let body = collect_stream(storage.read_file(&result.original_path).await.unwrap())
        .await
        .unwrap();
    assert_eq!(body, Bytes::from(data));
}

#[tokio::test]
async fn test_thumbnail_is_stored_next_to_original() {
    let dir = tempfile::tempdir().unwrap();
    let storage = local_storage(&dir, helpers::context()).await;
    let options = ProcessingOptions {
        generate_thumbnail: true,
        thumbnail_width: 16,
        thumbnail_height: 16,
        ..ProcessingOptions::default()
    };

    let result = storage
        .upload(UploadRequest::from_bytes(1, "", "big.jpg", create_test_jpeg(64, 64)).with_options(options))
        .await
        .unwrap();

    let thumb = result.thumbnail_path.expect("thumbnail path");
    assert!(thumb.starts_with("thumbnails/01/1/big."));
    assert!(dir.path().join(&thumb).is_file());
    assert!(result.thumbnail_url.unwrap().starts_with("/thumbnails/big."));
}

#[tokio::test]
async fn test_thumbnail_failure_keeps_original() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = helpers::context_with(Arc::new(FailingThumbnailPipeline));
    let storage = local_storage(&dir, ctx).await;
    let options = ProcessingOptions {
        generate_thumbnail: true,
        ..ProcessingOptions::default()
    };

    let result = storage
        .upload(UploadRequest::from_bytes(7, "", "photo.jpg", jpeg_of_size(1000)).with_options(options))
        .await
        .unwrap();

    assert!(result.thumbnail_generation_failed);
    assert!(!result.thumbnail_failure_reason.unwrap_or_default().is_empty());
    assert!(!result.original_path.is_empty());
    assert!(result.thumbnail_path.is_none());
    assert!(dir.path().join(&result.original_path).is_file());
}

#[tokio::test]
async fn test_filename_with_separator_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let storage = local_storage(&dir, helpers::context()).await;
    let err = storage
        .upload(UploadRequest::from_bytes(7, "", "../evil.jpg", jpeg_of_size(1000)))
        .await
        .err()
        .unwrap();
    assert!(err.is_invalid_format());
}

/// Pipeline whose HEIC conversion always yields a JPEG.
struct HeicToJpegPipeline;

#[async_trait::async_trait]
impl ImagePipeline for HeicToJpegPipeline {
    async fn convert_heic_to_jpeg(&self, _data: Bytes) -> stowage_core::StorageResult<Bytes> {
        Ok(Bytes::from(create_test_jpeg(12, 12)))
    }

    async fn compress(
        &self,
        data: Bytes,
        options: &ProcessingOptions,
    ) -> stowage_core::StorageResult<stowage_core::EncodedImage> {
        stowage_processing::DefaultImagePipeline.compress(data, options).await
    }

    fn detect(&self, data: &[u8]) -> Option<stowage_core::ImageInfo> {
        stowage_processing::DefaultImagePipeline.detect(data)
    }

    async fn generate_thumbnail(
        &self,
        data: Bytes,
        width: u32,
        height: u32,
        quality: u8,
    ) -> stowage_core::StorageResult<stowage_core::EncodedImage> {
        stowage_processing::DefaultImagePipeline
            .generate_thumbnail(data, width, height, quality)
            .await
    }
}

#[tokio::test]
async fn test_converted_heic_is_stored_under_jpeg_name() {
    let dir = tempfile::tempdir().unwrap();
    let storage = local_storage(&dir, helpers::context_with(Arc::new(HeicToJpegPipeline))).await;
    let mut heic = vec![0, 0, 0, 24];
    heic.extend_from_slice(b"ftypheic");
    heic.extend_from_slice(&[0; 16]);
    let options = ProcessingOptions {
        convert_heic: true,
        ..ProcessingOptions::default()
    };

    let result = storage
        .upload(
            UploadRequest::from_bytes(7, "", "photo.heic", heic)
                .with_content_type("image/heic")
                .with_options(options),
        )
        .await
        .unwrap();

    assert_eq!(result.original_path, "files/07/7/photo.jpg");
    assert_eq!(result.logical_path, "photo.jpg");
    assert_eq!(result.format, "jpeg");
    assert_eq!(result.content_type, "image/jpeg");
    assert!(dir.path().join("files/07/7/photo.jpg").exists());
}
