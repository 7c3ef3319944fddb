//! Stowage Infrastructure Library
//!
//! Shared infrastructure for the storage layer:
//! - Telemetry initialization
//! - Bounded usage-statistics queue with a background drain worker

#[cfg(feature = "observability-basic")]
pub mod telemetry;

#[cfg(feature = "usage-queue")]
pub mod usage;

// Re-export commonly used types
#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry};

#[cfg(feature = "usage-queue")]
pub use usage::{UsageQueue, UsageWorker};
