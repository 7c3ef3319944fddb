//! Shared key generation for storage backends.
//!
//! Physical key: `files/{shard}/{tenant_id}/{folder}/{filename}` where the
//! shard is `tenant_id mod 256` in two hex digits. Thumbnails mirror the
//! layout under `thumbnails/`. The logical path (`{folder}/{filename}`) is
//! what users see and never contains the shard or tenant segments.

use stowage_core::{StorageError, StorageResult};

pub const FILES_PREFIX: &str = "files";
pub const THUMBNAILS_PREFIX: &str = "thumbnails";
const SHARD_COUNT: i64 = 256;

/// Keys computed for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKeys {
    pub object_key: String,
    pub logical_path: String,
    /// `{shard}/{tenant_id}`.
    shard_path: String,
    folder: String,
    filename: String,
}

impl ObjectKeys {
    /// Thumbnail key; the extension follows the thumbnail's own format.
    pub fn thumbnail_key(&self, format: &str) -> String {
        format!(
            "{}/{}/{}",
            THUMBNAILS_PREFIX,
            self.shard_path,
            join_folder(&self.folder, &thumbnail_filename(&self.filename, format))
        )
    }

    pub fn thumbnail_logical_path(&self, format: &str) -> String {
        format!(
            "{}/{}",
            THUMBNAILS_PREFIX,
            join_folder(&self.folder, &thumbnail_filename(&self.filename, format))
        )
    }
}

fn join_folder(folder: &str, filename: &str) -> String {
    if folder.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", folder, filename)
    }
}

fn thumbnail_filename(filename: &str, format: &str) -> String {
    let stem = match filename.rfind('.') {
        Some(idx) if idx > 0 => &filename[..idx],
        _ => filename,
    };
    let ext = match format {
        "jpeg" | "" => "jpg",
        other => other,
    };
    format!("{}.{}", stem, ext)
}

/// Deterministic builder for physical keys and logical paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyBuilder;

impl KeyBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Two-hex-digit shard bounding per-directory fan-out.
    pub fn shard(tenant_id: i64) -> String {
        format!("{:02x}", tenant_id.rem_euclid(SHARD_COUNT))
    }

    /// Collapse empty segments and reject anything that could escape the
    /// tenant prefix.
    pub fn normalize_folder(folder: &str) -> StorageResult<String> {
        let mut segments = Vec::new();
        for segment in folder.split(['/', '\\']) {
            let segment = segment.trim();
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(StorageError::invalid_format(format!(
                        "folder path must not contain '..': {}",
                        folder
                    )))
                }
                s if s.chars().any(char::is_control) => {
                    return Err(StorageError::invalid_format(
                        "folder path contains control characters",
                    ))
                }
                s => segments.push(s),
            }
        }
        Ok(segments.join("/"))
    }

    pub fn build(&self, tenant_id: i64, folder: &str, filename: &str) -> StorageResult<ObjectKeys> {
        let filename = filename.trim();
        if filename.is_empty() || filename == "." || filename == ".." {
            return Err(StorageError::invalid_format("filename must not be empty"));
        }
        if filename.contains('/') || filename.contains('\\') {
            return Err(StorageError::invalid_format(format!(
                "filename must not contain path separators: {}",
                filename
            )));
        }

        let folder = Self::normalize_folder(folder)?;
        let shard_path = format!("{}/{}", Self::shard(tenant_id), tenant_id);
        let logical_path = join_folder(&folder, filename);

        Ok(ObjectKeys {
            object_key: format!("{}/{}/{}", FILES_PREFIX, shard_path, logical_path),
            logical_path,
            shard_path,
            folder,
            filename: filename.to_string(),
        })
    }
}

/// Logical URL for a logical path.
pub fn logical_url(logical_path: &str) -> String {
    format!("/{}", logical_path.trim_start_matches('/'))
}

/// Reject keys that could address anything outside the adapter root.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::invalid_format("object key must not be empty"));
    }
    if key.starts_with('/') || key.split('/').any(|s| s == "..") || key.contains('\\') {
        return Err(StorageError::invalid_format(format!(
            "object key contains invalid segments: {}",
            key
        )));
    }
    Ok(())
}
