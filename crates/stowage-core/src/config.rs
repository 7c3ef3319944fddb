//! Configuration module
//!
//! [`Settings`] is built once at process start and shared as `Arc<Settings>`.
//! When hot reload is needed, [`SettingsHandle`] swaps a whole immutable
//! snapshot; readers never observe a half-updated configuration.

use std::env;
use std::sync::{Arc, RwLock};
use std::time::Duration;

// Common constants
const PRESIGN_EXPIRY_SECS: u64 = 3600;
const MAX_UPLOAD_MB: u64 = 20;
const THUMBNAIL_SIZE: u32 = 300;
const THUMBNAIL_QUALITY: u8 = 80;
const USAGE_QUEUE_CAPACITY: usize = 1024;
const CONNECT_TIMEOUT_SECS: u64 = 30;
const PROXY_BASE_URL: &str = "/api/files";
const LOG_FILTER: &str = "stowage=info";

/// Process-wide storage settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Default lifetime of signed URLs.
    pub presign_expiry: Duration,
    pub max_upload_bytes: u64,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub thumbnail_quality: u8,
    pub usage_queue_capacity: usize,
    /// Privacy setting: never expose direct backend URLs.
    pub force_proxy: bool,
    pub proxy_base_url: String,
    /// Bound on connection establishment for every adapter.
    pub connect_timeout: Duration,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            presign_expiry: Duration::from_secs(PRESIGN_EXPIRY_SECS),
            max_upload_bytes: MAX_UPLOAD_MB * 1024 * 1024,
            thumbnail_width: THUMBNAIL_SIZE,
            thumbnail_height: THUMBNAIL_SIZE,
            thumbnail_quality: THUMBNAIL_QUALITY,
            usage_queue_capacity: USAGE_QUEUE_CAPACITY,
            force_proxy: false,
            proxy_base_url: PROXY_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            log_filter: LOG_FILTER.to_string(),
        }
    }
}

impl Settings {
    /// Read settings from the environment (and `.env` when present).
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let defaults = Settings::default();

        let settings = Settings {
            presign_expiry: Duration::from_secs(
                env::var("STOWAGE_PRESIGN_EXPIRY_SECS")
                    .unwrap_or_else(|_| PRESIGN_EXPIRY_SECS.to_string())
                    .parse()
                    .unwrap_or(PRESIGN_EXPIRY_SECS),
            ),
            max_upload_bytes: env::var("STOWAGE_MAX_UPLOAD_MB")
                .unwrap_or_else(|_| MAX_UPLOAD_MB.to_string())
                .parse::<u64>()
                .unwrap_or(MAX_UPLOAD_MB)
                * 1024
                * 1024,
            thumbnail_width: env::var("STOWAGE_THUMBNAIL_WIDTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.thumbnail_width),
            thumbnail_height: env::var("STOWAGE_THUMBNAIL_HEIGHT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.thumbnail_height),
            thumbnail_quality: env::var("STOWAGE_THUMBNAIL_QUALITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.thumbnail_quality),
            usage_queue_capacity: env::var("STOWAGE_USAGE_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(USAGE_QUEUE_CAPACITY)
                .max(1),
            force_proxy: env::var("STOWAGE_FORCE_PROXY")
                .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(false),
            proxy_base_url: env::var("STOWAGE_PROXY_BASE_URL")
                .unwrap_or_else(|_| PROXY_BASE_URL.to_string()),
            connect_timeout: Duration::from_secs(
                env::var("STOWAGE_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(CONNECT_TIMEOUT_SECS),
            ),
            log_filter: env::var("RUST_LOG").unwrap_or_else(|_| LOG_FILTER.to_string()),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.presign_expiry.is_zero() {
            return Err(anyhow::anyhow!("STOWAGE_PRESIGN_EXPIRY_SECS must be positive"));
        }
        // S3 and Azure both cap presigned URLs at seven days.
        if self.presign_expiry > Duration::from_secs(7 * 24 * 3600) {
            return Err(anyhow::anyhow!(
                "STOWAGE_PRESIGN_EXPIRY_SECS cannot exceed 604800 (7 days)"
            ));
        }
        if self.thumbnail_quality == 0 || self.thumbnail_quality > 100 {
            return Err(anyhow::anyhow!("STOWAGE_THUMBNAIL_QUALITY must be within 1..=100"));
        }
        if self.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("STOWAGE_MAX_UPLOAD_MB must be positive"));
        }
        Ok(())
    }
}

/// Atomically swappable settings snapshot.
#[derive(Clone)]
pub struct SettingsHandle {
    current: Arc<RwLock<Arc<Settings>>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    /// Current snapshot; stays valid even if a reload happens afterwards.
    pub fn load(&self) -> Arc<Settings> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the snapshot after validating it.
    pub fn store(&self, settings: Settings) -> Result<(), anyhow::Error> {
        settings.validate()?;
        let next = Arc::new(settings);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        tracing::info!("Storage settings reloaded");
        Ok(())
    }
}
