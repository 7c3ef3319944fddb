use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Channel status flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    pub enabled: bool,
    pub is_default: bool,
}

impl Default for ChannelStatus {
    fn default() -> Self {
        Self {
            enabled: true,
            is_default: false,
        }
    }
}

/// A configured backend instance.
///
/// `backend_type` is the raw type tag (including vendor aliases such as `r2`);
/// the registry resolves it to a constructor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub backend_type: String,
    #[serde(default)]
    pub status: ChannelStatus,
    #[serde(default)]
    pub config: ChannelConfig,
}

impl Channel {
    pub fn new(id: i64, name: impl Into<String>, backend_type: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            backend_type: backend_type.into(),
            status: ChannelStatus::default(),
            config: ChannelConfig::default(),
        }
    }

    pub fn with_config(mut self, key: &str, value: impl Into<String>) -> Self {
        self.config.insert(key, value);
        self
    }

    pub fn as_default(mut self) -> Self {
        self.status.is_default = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.status.enabled = false;
        self
    }
}

/// Free-form key/value configuration of a channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelConfig(HashMap<String, String>);

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Non-empty, trimmed value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Interpret `key` as a boolean flag (`true/1/yes/on`).
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
            None => default,
        }
    }

    pub fn get_parsed<T: FromStr>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.get(key) {
            Some(v) => v.parse::<T>().map(Some).map_err(|_| {
                StorageError::internal(format!("invalid value for config key '{}': {}", key, v))
            }),
            None => Ok(None),
        }
    }

    /// Fail closed when any required key is missing.
    ///
    /// Every missing key is reported, not just the first one.
    pub fn require(&self, keys: &[&str]) -> StorageResult<()> {
        let missing: Vec<&str> = keys
            .iter()
            .copied()
            .filter(|k| self.get(k).is_none())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(StorageError::internal(format!(
                "missing required config keys: {}",
                missing.join(", ")
            )))
        }
    }

    /// Value of a key already checked by [`ChannelConfig::require`].
    pub fn required(&self, key: &str) -> StorageResult<String> {
        self.get(key)
            .map(str::to_string)
            .ok_or_else(|| StorageError::internal(format!("missing required config key: {}", key)))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ChannelConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
