//! Storage facade: validation, channel attribution, usage events and URLs.

mod helpers;

use std::sync::Arc;

use helpers::{create_test_jpeg, local_channel, service, RecordingReporter};
use stowage_core::{Channel, Settings};
use stowage_services::{FileRef, FileUpload};

#[tokio::test]
async fn test_upload_attaches_channel_and_reports_usage() {
    let dir = tempfile::tempdir().unwrap();
    let reporter = Arc::new(RecordingReporter::default());
    let (service, worker) = service(
        vec![local_channel(1, &dir), local_channel(2, &dir).as_default()],
        Settings::default(),
        reporter.clone(),
    );

    let stored = service
        .upload(None, FileUpload::new(7, "trips", "a.jpg", create_test_jpeg(16, 16)))
        .await
        .unwrap();
    assert_eq!(stored.channel_id, 2);
    assert_eq!(stored.tenant_id, 7);
    assert_eq!(stored.upload.logical_path, "trips/a.jpg");
    assert!(service.exists(2, &stored.upload.original_path).await.unwrap());

    service.delete_file(&FileRef::from(&stored)).await.unwrap();
    assert!(!service.exists(2, &stored.upload.original_path).await.unwrap());

    drop(service);
    worker.join().await;

    let events = reporter.events.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].channel_id, 2);
    assert_eq!(events[0].bytes_delta, stored.upload.size as i64);
    assert_eq!(events[0].files_delta, 1);
    assert_eq!(events[1].bytes_delta, -(stored.upload.size as i64));
}

#[tokio::test]
async fn test_short_header_is_rejected_before_storage() {
    let dir = tempfile::tempdir().unwrap();
    let reporter = Arc::new(RecordingReporter::default());
    let (service, _worker) = service(
        vec![local_channel(1, &dir).as_default()],
        Settings::default(),
        reporter,
    );

    let err = service
        .upload(None, FileUpload::new(7, "", "x.jpg", vec![0xFF, 0xD8]))
        .await
        .err()
        .unwrap();
    assert!(err.is_invalid_format());
    assert!(err.message().contains("Insufficient header length"));
    assert!(!dir.path().join("1").join("files").exists());
}

#[tokio::test]
async fn test_oversized_upload_is_quota_exceeded() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        max_upload_bytes: 100,
        ..Settings::default()
    };
    let (service, _worker) = service(
        vec![local_channel(1, &dir).as_default()],
        settings,
        Arc::new(RecordingReporter::default()),
    );

    let err = service
        .upload(Some(1), FileUpload::new(7, "", "big.jpg", create_test_jpeg(64, 64)))
        .await
        .err()
        .unwrap();
    assert!(err.is_quota_exceeded());
}

#[tokio::test]
async fn test_batch_upload_keeps_order_and_isolates_failures() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _worker) = service(
        vec![local_channel(1, &dir).as_default()],
        Settings::default(),
        Arc::new(RecordingReporter::default()),
    );

    let files = vec![
        FileUpload::new(1, "", "a.jpg", create_test_jpeg(8, 8)),
        FileUpload::new(1, "", "CON.jpg", create_test_jpeg(8, 8)),
        FileUpload::new(1, "", "b.png", create_test_jpeg(8, 8)),
        FileUpload::new(1, "", "c.jpg", create_test_jpeg(8, 8)),
    ];
    let (channel_id, results) = service.batch_upload(None, files).await.unwrap();

    assert_eq!(channel_id, 1);
    assert_eq!(results.len(), 4);
    assert_eq!(results[0].as_ref().unwrap().upload.logical_path, "a.jpg");
    assert!(results[1].as_ref().err().unwrap().is_invalid_format());
    assert!(results[2].as_ref().err().unwrap().is_invalid_format());
    assert_eq!(results[3].as_ref().unwrap().upload.logical_path, "c.jpg");
}

#[tokio::test]
async fn test_file_url_policy() {
    let dir = tempfile::tempdir().unwrap();
    let channels = vec![
        local_channel(1, &dir).with_config("base_url", "http://cdn.local/media"),
        local_channel(2, &dir)
            .with_config("base_url", "http://cdn.local/media")
            .with_config("allow_direct", "false"),
        Channel::new(3, "dav", "webdav")
            .with_config("endpoint", "https://dav.example.com")
            .with_config("username", "u")
            .with_config("password", "p")
            .with_config("access_control", "private"),
    ];
    let (service, _worker) = service(channels, Settings::default(), Arc::new(RecordingReporter::default()));

    assert_eq!(
        service.file_url(1, "files/07/7/a b.jpg").await.unwrap(),
        "http://cdn.local/media/files/07/7/a%20b.jpg"
    );
    assert_eq!(
        service.file_url(2, "files/07/7/a.jpg").await.unwrap(),
        "/api/files/2/files/07/7/a.jpg"
    );
    // Private backend without signing support falls back to the proxy.
    assert_eq!(
        service.file_url(3, "files/07/7/a.jpg").await.unwrap(),
        "/api/files/3/files/07/7/a.jpg"
    );
    assert!(service.file_url(1, "../etc/passwd").await.is_err());
    assert!(service.file_url(9, "a.jpg").await.err().unwrap().is_not_found());
}

#[tokio::test]
async fn test_force_proxy_never_exposes_direct_urls() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        force_proxy: true,
        proxy_base_url: "https://app.example.com/files/".to_string(),
        ..Settings::default()
    };
    let (service, _worker) = service(
        vec![local_channel(1, &dir).with_config("base_url", "http://cdn.local/media")],
        settings,
        Arc::new(RecordingReporter::default()),
    );

    assert_eq!(
        service.file_url(1, "files/01/1/a.jpg").await.unwrap(),
        "https://app.example.com/files/1/files/01/1/a.jpg"
    );
}

#[tokio::test]
async fn test_health_check_all_covers_enabled_channels() {
    let dir = tempfile::tempdir().unwrap();
    let (service, _worker) = service(
        vec![
            local_channel(1, &dir),
            Channel::new(2, "s3", "s3"),
            local_channel(3, &dir).disabled(),
        ],
        Settings::default(),
        Arc::new(RecordingReporter::default()),
    );

    let report = service.health_check_all().await.unwrap();
    assert_eq!(report.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    assert!(report[&1].is_ok());
    assert!(report[&2].as_ref().err().unwrap().is_internal());
}

#[test]
fn test_stored_file_serializes_flat() {
    let stored = stowage_services::StoredFile {
        channel_id: 4,
        tenant_id: 7,
        upload: stowage_core::UploadResult {
            original_path: "files/07/7/a.jpg".to_string(),
            logical_path: "a.jpg".to_string(),
            ..Default::default()
        },
    };
    let json = serde_json::to_value(&stored).unwrap();
    assert_eq!(json["channel_id"], 4);
    assert_eq!(json["original_path"], "files/07/7/a.jpg");
}
