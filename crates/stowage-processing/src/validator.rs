use std::path::Path;

use stowage_core::StorageError;

/// Default maximum filename length in bytes.
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Device names Windows refuses as file stems, compared case-insensitively.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Common validation errors for uploads
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("File too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: usize, max: usize },

    #[error("Empty file")]
    EmptyFile,

    #[error("Insufficient header length for {format}: {actual} bytes (need at least {required})")]
    InsufficientHeader {
        format: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("File content does not match declared format {format}")]
    HeaderMismatch { format: &'static str },

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Filename too long: {length} bytes (max: {max} bytes)")]
    FilenameTooLong { length: usize, max: usize },

    #[error("Reserved filename: {0}")]
    ReservedFilename(String),

    #[error("Content-Type '{content_type}' does not match extension '{extension}'")]
    ContentTypeMismatch {
        content_type: String,
        extension: String,
    },
}

impl From<ValidationError> for StorageError {
    fn from(err: ValidationError) -> Self {
        let message = err.to_string();
        match err {
            ValidationError::FileTooLarge { .. } => StorageError::quota_exceeded(message),
            _ => StorageError::invalid_format(message),
        }
    }
}

/// Magic-byte signature of one format.
struct FormatSignature {
    name: &'static str,
    extensions: &'static [&'static str],
    min_header: usize,
    matches: fn(&[u8]) -> bool,
}

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JP2_MAGIC: &[u8] = &[
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];
const HEIC_BRANDS: &[&[u8]] = &[
    b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"mif1", b"msf1",
];

fn is_jpeg(h: &[u8]) -> bool {
    h.starts_with(&[0xFF, 0xD8, 0xFF])
}

fn is_png(h: &[u8]) -> bool {
    h.starts_with(PNG_MAGIC)
}

fn is_gif(h: &[u8]) -> bool {
    h.starts_with(b"GIF87a") || h.starts_with(b"GIF89a")
}

fn is_bmp(h: &[u8]) -> bool {
    h.starts_with(b"BM")
}

fn is_webp(h: &[u8]) -> bool {
    h.starts_with(b"RIFF") && &h[8..12] == b"WEBP"
}

fn is_tiff(h: &[u8]) -> bool {
    h.starts_with(b"II*\0") || h.starts_with(b"MM\0*")
}

fn is_ico(h: &[u8]) -> bool {
    h.starts_with(&[0x00, 0x00, 0x01, 0x00])
}

fn is_heic(h: &[u8]) -> bool {
    &h[4..8] == b"ftyp" && HEIC_BRANDS.iter().any(|brand| &h[8..12] == *brand)
}

fn is_svg(h: &[u8]) -> bool {
    let window = &h[..h.len().min(1024)];
    let text = String::from_utf8_lossy(window);
    let text = text.trim_start_matches('\u{feff}').trim_start().to_lowercase();
    text.starts_with("<svg") || (text.starts_with("<?xml") && text.contains("<svg"))
}

fn is_jp2(h: &[u8]) -> bool {
    h.starts_with(JP2_MAGIC) || h.starts_with(&[0xFF, 0x4F, 0xFF, 0x51])
}

/// TGA has no magic number; check the header's colour-map and image-type bytes.
fn is_tga(h: &[u8]) -> bool {
    matches!(h[1], 0 | 1) && matches!(h[2], 1 | 2 | 3 | 9 | 10 | 11)
}

const SIGNATURES: &[FormatSignature] = &[
    FormatSignature { name: "jpeg", extensions: &["jpg", "jpeg", "jpe", "jfif"], min_header: 3, matches: is_jpeg },
    FormatSignature { name: "png", extensions: &["png"], min_header: 8, matches: is_png },
    FormatSignature { name: "apng", extensions: &["apng"], min_header: 8, matches: is_png },
    FormatSignature { name: "gif", extensions: &["gif"], min_header: 6, matches: is_gif },
    FormatSignature { name: "bmp", extensions: &["bmp", "dib"], min_header: 2, matches: is_bmp },
    FormatSignature { name: "webp", extensions: &["webp"], min_header: 12, matches: is_webp },
    FormatSignature { name: "tiff", extensions: &["tif", "tiff"], min_header: 4, matches: is_tiff },
    FormatSignature { name: "ico", extensions: &["ico"], min_header: 4, matches: is_ico },
    FormatSignature { name: "heic", extensions: &["heic", "heif"], min_header: 12, matches: is_heic },
    FormatSignature { name: "svg", extensions: &["svg"], min_header: 4, matches: is_svg },
    FormatSignature { name: "jp2", extensions: &["jp2", "j2k", "jpf", "jpx"], min_header: 4, matches: is_jp2 },
    FormatSignature { name: "tga", extensions: &["tga"], min_header: 18, matches: is_tga },
];

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

fn signature_for_extension(extension: &str) -> Option<&'static FormatSignature> {
    SIGNATURES
        .iter()
        .find(|sig| sig.extensions.contains(&extension))
}

/// Pre-upload validator
///
/// Runs size, filename and magic-byte checks before bytes reach an adapter.
pub struct UploadValidator {
    max_file_size: usize,
    max_filename_length: usize,
}

impl UploadValidator {
    pub fn new(max_file_size: usize) -> Self {
        Self {
            max_file_size,
            max_filename_length: MAX_FILENAME_LENGTH,
        }
    }

    pub fn with_max_filename_length(mut self, max: usize) -> Self {
        self.max_filename_length = max;
        self
    }

    /// Validate file size
    pub fn validate_file_size(&self, size: usize) -> Result<(), ValidationError> {
        if size == 0 {
            return Err(ValidationError::EmptyFile);
        }

        if size > self.max_file_size {
            return Err(ValidationError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }

        Ok(())
    }

    /// Reject reserved device names, forbidden characters and overlong names.
    pub fn validate_filename(&self, filename: &str) -> Result<(), ValidationError> {
        if filename.trim().is_empty() {
            return Err(ValidationError::InvalidFilename("filename is empty".to_string()));
        }

        if filename.len() > self.max_filename_length {
            return Err(ValidationError::FilenameTooLong {
                length: filename.len(),
                max: self.max_filename_length,
            });
        }

        if let Some(c) = filename
            .chars()
            .find(|c| FORBIDDEN_CHARS.contains(c) || c.is_control())
        {
            return Err(ValidationError::InvalidFilename(format!(
                "forbidden character {:?} in {}",
                c, filename
            )));
        }

        if filename == "." || filename == ".." || filename.ends_with('.') || filename.ends_with(' ') {
            return Err(ValidationError::InvalidFilename(filename.to_string()));
        }

        if is_reserved_name(filename) {
            return Err(ValidationError::ReservedFilename(filename.to_string()));
        }

        Ok(())
    }

    /// Check the leading bytes against the format implied by the extension.
    ///
    /// Extensions outside the known image formats pass through unchecked.
    pub fn validate_magic_bytes(&self, filename: &str, data: &[u8]) -> Result<(), ValidationError> {
        let Some(extension) = extension_of(filename) else {
            return Ok(());
        };
        let Some(signature) = signature_for_extension(&extension) else {
            tracing::debug!(extension = %extension, "Unknown format, skipping magic-byte check");
            return Ok(());
        };

        if data.len() < signature.min_header {
            return Err(ValidationError::InsufficientHeader {
                format: signature.name,
                required: signature.min_header,
                actual: data.len(),
            });
        }

        if !(signature.matches)(data) {
            return Err(ValidationError::HeaderMismatch {
                format: signature.name,
            });
        }

        Ok(())
    }

    /// Validate that Content-Type matches the file extension for image formats.
    pub fn validate_extension_content_type_match(
        &self,
        filename: &str,
        content_type: &str,
    ) -> Result<(), ValidationError> {
        let Some(extension) = extension_of(filename) else {
            return Ok(());
        };
        let normalized = content_type.to_lowercase();

        let expected: &[&str] = match extension.as_str() {
            "jpg" | "jpeg" | "jpe" | "jfif" => &["image/jpeg", "image/pjpeg"],
            "png" => &["image/png"],
            "apng" => &["image/apng", "image/png"],
            "gif" => &["image/gif"],
            "webp" => &["image/webp"],
            "bmp" | "dib" => &["image/bmp", "image/x-ms-bmp"],
            "tif" | "tiff" => &["image/tiff"],
            "ico" => &["image/x-icon", "image/vnd.microsoft.icon"],
            "heic" | "heif" => &["image/heic", "image/heif"],
            "svg" => &["image/svg+xml"],
            "jp2" | "j2k" | "jpf" | "jpx" => &["image/jp2", "image/jpx", "image/j2k"],
            "tga" => &["image/x-tga", "image/x-targa", "image/tga"],
            _ => return Ok(()),
        };

        if !expected
            .iter()
            .any(|ct| normalized == *ct || normalized.starts_with(&format!("{};", ct)))
        {
            return Err(ValidationError::ContentTypeMismatch {
                content_type: content_type.to_string(),
                extension,
            });
        }

        Ok(())
    }

    /// Validate all aspects of an upload.
    pub fn validate_all(
        &self,
        filename: &str,
        content_type: Option<&str>,
        data: &[u8],
    ) -> Result<(), ValidationError> {
        self.validate_filename(filename)?;
        self.validate_magic_bytes(filename, data)?;
        self.validate_file_size(data.len())?;
        if let Some(content_type) = content_type {
            self.validate_extension_content_type_match(filename, content_type)?;
        }
        Ok(())
    }
}

fn is_reserved_name(filename: &str) -> bool {
    let stem = filename.split('.').next().unwrap_or(filename).trim();
    RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
}

/// Make `filename` safe to store, preserving its extension.
///
/// Forbidden and control characters become `_`, reserved device names get a
/// `_` prefix, and names longer than `max_len` bytes are truncated on a char
/// boundary before the extension. When `max_len` leaves no room for
/// the stem, the whole name is cut instead.
pub fn sanitize_filename(filename: &str, max_len: usize) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename)
        .trim();

    let mut cleaned: String = base
        .chars()
        .map(|c| {
            if FORBIDDEN_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    cleaned = cleaned.trim_end_matches(['.', ' ']).to_string();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        cleaned = "file".to_string();
    }
    if is_reserved_name(&cleaned) {
        cleaned.insert(0, '_');
    }

    if cleaned.len() <= max_len {
        return cleaned;
    }

    let (stem, extension) = match cleaned.rfind('.') {
        Some(idx) if idx > 0 && cleaned.len() - idx <= 16 => {
            (&cleaned[..idx], &cleaned[idx..])
        }
        _ => (cleaned.as_str(), ""),
    };
    // No room for any of the stem: cut the whole name instead.
    if extension.len() >= max_len {
        return truncate_on_boundary(&cleaned, max_len).to_string();
    }
    let stem = truncate_on_boundary(stem, max_len - extension.len());
    format!("{}{}", stem, extension)
}

fn truncate_on_boundary(s: &str, max_len: usize) -> &str {
    let mut end = max_len.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
