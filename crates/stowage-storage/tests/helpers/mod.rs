//! Test helpers for stowage-storage integration tests

#![allow(dead_code)]

pub mod fake_ftp;
pub mod fake_http;
pub mod fixtures;

use std::sync::Arc;

use stowage_core::{ImagePipeline, Settings};
use stowage_processing::DefaultImagePipeline;
use stowage_storage::AdapterContext;

/// Adapter context backed by the default pipeline and default settings.
pub fn context() -> AdapterContext {
    AdapterContext::new(Arc::new(DefaultImagePipeline), Arc::new(Settings::default()))
}

/// Adapter context with a custom pipeline.
pub fn context_with(pipeline: Arc<dyn ImagePipeline>) -> AdapterContext {
    AdapterContext::new(pipeline, Arc::new(Settings::default()))
}
