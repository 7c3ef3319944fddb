//! Tracing initialization
//!
//! `RUST_LOG` wins over the configured filter when it is set.

mod init_basic;

pub use init_basic::{init_telemetry, shutdown_telemetry};
