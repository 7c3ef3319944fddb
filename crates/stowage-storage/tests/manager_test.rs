//! Channel resolution, caching and batch uploads through the manager.

mod helpers;

use std::sync::Arc;

use helpers::fixtures::{create_test_jpeg, jpeg_of_size};
use stowage_core::{Channel, InMemoryChannelRepository, Settings, UploadRequest};
use stowage_processing::DefaultImagePipeline;
use stowage_storage::{AdapterRegistry, StorageManager};

fn local_channel(id: i64, dir: &tempfile::TempDir) -> Channel {
    Channel::new(id, format!("local-{}", id), "local")
        .with_config("base_path", dir.path().join(id.to_string()).to_string_lossy().to_string())
}

fn manager(channels: Vec<Channel>) -> StorageManager {
    StorageManager::new(
        Arc::new(InMemoryChannelRepository::new(channels)),
        Arc::new(AdapterRegistry::with_defaults()),
        Arc::new(DefaultImagePipeline),
        Arc::new(Settings::default()),
    )
}

#[tokio::test]
async fn test_upload_with_best_without_default_is_internal() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(vec![local_channel(1, &dir)]);

    let err = manager
        .upload_with_best(None, UploadRequest::from_bytes(7, "", "a.jpg", jpeg_of_size(1000)))
        .await
        .err()
        .unwrap();
    assert!(err.is_internal());
}

#[tokio::test]
async fn test_upload_with_best_uses_default_channel() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(vec![local_channel(1, &dir), local_channel(2, &dir).as_default()]);

    let (channel_id, result) = manager
        .upload_with_best(None, UploadRequest::from_bytes(7, "", "a.jpg", jpeg_of_size(1000)))
        .await
        .unwrap();
    assert_eq!(channel_id, 2);
    assert!(dir.path().join("2").join(&result.original_path).is_file());

    let (explicit, _) = manager
        .upload_with_best(Some(1), UploadRequest::from_bytes(7, "", "b.jpg", jpeg_of_size(1000)))
        .await
        .unwrap();
    assert_eq!(explicit, 1);
}

#[tokio::test]
async fn test_routed_operations() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(vec![local_channel(1, &dir).as_default()]);

    let result = manager
        .upload(1, UploadRequest::from_bytes(3, "x", "a.jpg", create_test_jpeg(8, 8)))
        .await
        .unwrap();
    assert!(manager.exists(1, &result.original_path).await.unwrap());

    manager.delete(1, &result.original_path).await.unwrap();
    assert!(!manager.exists(1, &result.original_path).await.unwrap());
    assert!(manager
        .read_file(1, &result.original_path)
        .await
        .err()
        .unwrap()
        .is_not_found());
}

#[tokio::test]
async fn test_batch_upload_reports_per_item() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(vec![local_channel(1, &dir).as_default()]).with_batch_concurrency(2);

    let requests = vec![
        UploadRequest::from_bytes(1, "", "a.jpg", create_test_jpeg(8, 8)),
        UploadRequest::from_bytes(1, "", "", create_test_jpeg(8, 8)),
        UploadRequest::from_bytes(1, "", "c.jpg", create_test_jpeg(8, 8)),
    ];
    let (channel_id, results) = manager.batch_upload(None, requests).await.unwrap();

    assert_eq!(channel_id, 1);
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().logical_path, "a.jpg");
    assert!(results[1].as_ref().err().unwrap().is_invalid_format());
    assert_eq!(results[2].as_ref().unwrap().logical_path, "c.jpg");
}

#[tokio::test]
async fn test_batch_upload_to_unknown_channel_fails_whole_batch() {
    let manager = manager(Vec::new());
    let err = manager
        .batch_upload(Some(9), vec![UploadRequest::from_bytes(1, "", "a.jpg", create_test_jpeg(8, 8))])
        .await
        .err()
        .unwrap();
    assert!(err.is_not_found());
}
