use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Storage backend types
///
/// Closed set of adapter implementations. Vendor names that share an
/// implementation (e.g. `r2`, `minio`) are registry aliases that resolve to
/// one of these variants; see `stowage_storage::registry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    Local,
    S3,
    S3Compat,
    Ftp,
    Ssh,
    WebDav,
    Azure,
    Upyun,
}

impl BackendType {
    pub const ALL: [BackendType; 8] = [
        BackendType::Local,
        BackendType::S3,
        BackendType::S3Compat,
        BackendType::Ftp,
        BackendType::Ssh,
        BackendType::WebDav,
        BackendType::Azure,
        BackendType::Upyun,
    ];

    /// Canonical type tag used in channel records.
    pub fn as_str(self) -> &'static str {
        match self {
            BackendType::Local => "local",
            BackendType::S3 => "s3",
            BackendType::S3Compat => "s3_compat",
            BackendType::Ftp => "ftp",
            BackendType::Ssh => "ssh",
            BackendType::WebDav => "webdav",
            BackendType::Azure => "azure",
            BackendType::Upyun => "upyun",
        }
    }

    /// Local backends always resolve URLs to a filesystem path.
    pub fn is_local(self) -> bool {
        matches!(self, BackendType::Local)
    }
}

impl FromStr for BackendType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(BackendType::Local),
            "s3" => Ok(BackendType::S3),
            "s3_compat" | "s3-compat" => Ok(BackendType::S3Compat),
            "ftp" | "ftps" => Ok(BackendType::Ftp),
            "ssh" => Ok(BackendType::Ssh),
            "webdav" => Ok(BackendType::WebDav),
            "azure" => Ok(BackendType::Azure),
            "upyun" => Ok(BackendType::Upyun),
            _ => Err(anyhow::anyhow!("Invalid storage backend: {}", s)),
        }
    }
}

impl Display for BackendType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}
