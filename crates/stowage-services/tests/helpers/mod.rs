//! Test helpers for stowage-services integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{ImageBuffer, Rgb};
use stowage_core::{Channel, InMemoryChannelRepository, Settings, UsageEvent, UsageReporter};
use stowage_processing::DefaultImagePipeline;
use stowage_services::{AdapterRegistry, StorageManager, StorageService, UsageQueue, UsageWorker};

/// Create a small JPEG for testing
pub fn create_test_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 200u8]));
    let mut buffer = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, 80);
    encoder.encode_image(&img).expect("Failed to encode JPEG");
    buffer
}

/// Usage reporter that keeps every event.
#[derive(Default)]
pub struct RecordingReporter {
    pub events: Mutex<Vec<UsageEvent>>,
}

#[async_trait]
impl UsageReporter for RecordingReporter {
    async fn report(&self, event: UsageEvent) -> Result<(), String> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

pub fn local_channel(id: i64, dir: &tempfile::TempDir) -> Channel {
    Channel::new(id, format!("local-{}", id), "local")
        .with_config("base_path", dir.path().join(id.to_string()).to_string_lossy().to_string())
}

/// Service over `channels` with a usage queue feeding `reporter`.
pub fn service(
    channels: Vec<Channel>,
    settings: Settings,
    reporter: Arc<RecordingReporter>,
) -> (StorageService, UsageWorker) {
    let manager = StorageManager::new(
        Arc::new(InMemoryChannelRepository::new(channels)),
        Arc::new(AdapterRegistry::with_defaults()),
        Arc::new(DefaultImagePipeline::new()),
        Arc::new(settings),
    );
    let (queue, worker) = UsageQueue::spawn(reporter, 64);
    (StorageService::new(Arc::new(manager)).with_usage_queue(queue), worker)
}
