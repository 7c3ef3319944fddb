use serde::Serialize;

/// Image formats every adapter accepts.
pub const STANDARD_IMAGE_FORMATS: &[&str] = &[
    "jpeg", "png", "gif", "webp", "bmp", "tiff", "ico", "heic", "svg", "avif",
];

/// Static per-adapter feature flags.
///
/// Built once per adapter type and never mutated, so callers can adapt
/// behavior without matching on backend identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub supports_signed_url: bool,
    pub supports_cdn: bool,
    pub supports_resize: bool,
    pub supports_acl: bool,
    /// Maximum object size in bytes; 0 means no backend limit.
    pub max_file_size: u64,
    pub supported_formats: &'static [&'static str],
}

impl Capabilities {
    pub const fn basic(max_file_size: u64) -> Self {
        Self {
            supports_signed_url: false,
            supports_cdn: false,
            supports_resize: false,
            supports_acl: false,
            max_file_size,
            supported_formats: STANDARD_IMAGE_FORMATS,
        }
    }

    pub fn supports_format(&self, format: &str) -> bool {
        let format = format.to_lowercase();
        let format = if format == "jpg" { "jpeg" } else { format.as_str() };
        self.supported_formats.iter().any(|f| *f == format)
    }
}
