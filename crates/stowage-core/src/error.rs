//! Error types module
//!
//! Every storage operation reports failures as a [`StorageError`]: a stable
//! [`ErrorKind`] category callers branch on, a human readable message and an
//! optional wrapped cause.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io;

/// Boxed cause carried by a [`StorageError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like missing objects
    Debug,
    /// Warning level - for recoverable issues like quota limits
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Stable error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Permission,
    QuotaExceeded,
    InvalidFormat,
    Network,
    Internal,
}

impl ErrorKind {
    /// Machine-readable error code (e.g., "not_found")
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Permission => "permission",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::InvalidFormat => "invalid_format",
            ErrorKind::Network => "network",
            ErrorKind::Internal => "internal",
        }
    }

    /// Whether this error is recoverable (can be retried)
    pub fn is_recoverable(self) -> bool {
        matches!(self, ErrorKind::Network)
    }

    /// Log level for this error
    pub fn log_level(self) -> LogLevel {
        match self {
            ErrorKind::NotFound | ErrorKind::InvalidFormat => LogLevel::Debug,
            ErrorKind::Permission | ErrorKind::QuotaExceeded | ErrorKind::Network => LogLevel::Warn,
            ErrorKind::Internal => LogLevel::Error,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Storage operation error
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StorageError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, message)
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QuotaExceeded, message)
    }

    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidFormat, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach the underlying cause.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_permission(&self) -> bool {
        self.kind == ErrorKind::Permission
    }

    pub fn is_quota_exceeded(&self) -> bool {
        self.kind == ErrorKind::QuotaExceeded
    }

    pub fn is_invalid_format(&self) -> bool {
        self.kind == ErrorKind::InvalidFormat
    }

    pub fn is_network(&self) -> bool {
        self.kind == ErrorKind::Network
    }

    pub fn is_internal(&self) -> bool {
        self.kind == ErrorKind::Internal
    }

    /// Map an HTTP status returned by a REST backend to a category.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            404 => ErrorKind::NotFound,
            401 | 403 => ErrorKind::Permission,
            413 | 507 => ErrorKind::QuotaExceeded,
            400 | 415 | 422 => ErrorKind::InvalidFormat,
            _ => ErrorKind::Network,
        };
        Self::new(kind, message)
    }

    /// Prefix the message with operation context, keeping kind and source.
    pub fn context(mut self, context: impl Display) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::Permission,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::TimedOut
            | io::ErrorKind::UnexpectedEof => ErrorKind::Network,
            _ => ErrorKind::Internal,
        };
        StorageError::new(kind, format!("IO error: {}", err)).with_source(err)
    }
}
