use serde::{Deserialize, Serialize};

/// Usage/statistics side effect emitted after a write or delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub tenant_id: i64,
    pub channel_id: i64,
    /// Signed byte delta: positive on store, negative on delete.
    pub bytes_delta: i64,
    pub files_delta: i64,
}

impl UsageEvent {
    pub fn stored(tenant_id: i64, channel_id: i64, bytes: u64) -> Self {
        Self {
            tenant_id,
            channel_id,
            bytes_delta: i64::try_from(bytes).unwrap_or(i64::MAX),
            files_delta: 1,
        }
    }

    pub fn deleted(tenant_id: i64, channel_id: i64, bytes: u64) -> Self {
        Self {
            tenant_id,
            channel_id,
            bytes_delta: -i64::try_from(bytes).unwrap_or(i64::MAX),
            files_delta: -1,
        }
    }
}
