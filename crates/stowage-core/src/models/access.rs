use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Two-valued access control shared by channel config (`access_control`) and
/// per-object ACL updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ObjectAcl {
    #[default]
    #[serde(rename = "public-read")]
    PublicRead,
    #[serde(rename = "private")]
    Private,
}

impl ObjectAcl {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectAcl::PublicRead => "public-read",
            ObjectAcl::Private => "private",
        }
    }

    pub fn is_private(self) -> bool {
        self == ObjectAcl::Private
    }
}

impl FromStr for ObjectAcl {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "public-read" | "public" => Ok(ObjectAcl::PublicRead),
            "private" => Ok(ObjectAcl::Private),
            _ => Err(anyhow::anyhow!("Invalid access control: {}", s)),
        }
    }
}

impl Display for ObjectAcl {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Options for `get_url`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UrlOptions {
    /// Signed URL lifetime; the channel or settings default applies when `None`.
    pub expires_in: Option<Duration>,
}

impl UrlOptions {
    pub fn expiring(expires_in: Duration) -> Self {
        Self {
            expires_in: Some(expires_in),
        }
    }
}
