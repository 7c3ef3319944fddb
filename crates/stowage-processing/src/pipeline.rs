//! Default image pipeline built on the `image` crate.
//!
//! Decoding and encoding are CPU-bound and run on the blocking pool.

use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use stowage_core::{EncodedImage, ImageInfo, ImagePipeline, ProcessingOptions, StorageError, StorageResult};

/// Quality floor when stepping down towards a target size.
const MIN_COMPRESS_QUALITY: u8 = 30;
const COMPRESS_QUALITY_STEP: u8 = 10;
/// Quality of the lower-fidelity thumbnail encode.
const FALLBACK_THUMBNAIL_QUALITY: u8 = 60;

/// Lowercase name for a detected format.
pub fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Png => "png",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        ImageFormat::Bmp => "bmp",
        ImageFormat::Tiff => "tiff",
        ImageFormat::Ico => "ico",
        ImageFormat::Avif => "avif",
        ImageFormat::Tga => "tga",
        ImageFormat::Pnm => "pnm",
        ImageFormat::Dds => "dds",
        ImageFormat::Hdr => "hdr",
        ImageFormat::OpenExr => "exr",
        ImageFormat::Farbfeld => "farbfeld",
        ImageFormat::Qoi => "qoi",
        _ => "unknown",
    }
}

/// Content type for a lowercase format name.
pub fn content_type_for_format(format: &str) -> &'static str {
    match format {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "apng" => "image/apng",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        "ico" => "image/x-icon",
        "avif" => "image/avif",
        "heic" => "image/heic",
        "svg" => "image/svg+xml",
        "jp2" => "image/jp2",
        "tga" => "image/x-tga",
        _ => "application/octet-stream",
    }
}

fn looks_like_heic(data: &[u8]) -> bool {
    data.len() >= 12
        && &data[4..8] == b"ftyp"
        && matches!(&data[8..12], b"heic" | b"heix" | b"hevc" | b"hevx" | b"mif1" | b"msf1")
}

fn looks_like_svg(data: &[u8]) -> bool {
    let window = String::from_utf8_lossy(&data[..data.len().min(512)]).to_lowercase();
    let trimmed = window.trim_start_matches('\u{feff}').trim_start();
    trimmed.starts_with("<svg") || (trimmed.starts_with("<?xml") && trimmed.contains("<svg"))
}

fn decode(data: &[u8], lift_limits: bool) -> StorageResult<DynamicImage> {
    let mut reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| StorageError::invalid_format("failed to read image header").with_source(e))?;
    if lift_limits {
        reader.no_limits();
    }
    reader
        .decode()
        .map_err(|e| StorageError::invalid_format("failed to decode image").with_source(e))
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> StorageResult<Vec<u8>> {
    let mut buf = Vec::new();
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)))
        .map_err(|e| StorageError::internal("failed to encode JPEG").with_source(e))?;
    Ok(buf)
}

fn encode_png(img: &DynamicImage) -> StorageResult<Vec<u8>> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| StorageError::internal("failed to encode PNG").with_source(e))?;
    Ok(buf)
}

fn fit_within(img: DynamicImage, max_width: u32, max_height: u32) -> (DynamicImage, bool) {
    let (width, height) = img.dimensions();
    let max_width = if max_width == 0 { width } else { max_width };
    let max_height = if max_height == 0 { height } else { max_height };
    if width <= max_width && height <= max_height {
        return (img, false);
    }
    (img.resize(max_width, max_height, FilterType::Lanczos3), true)
}

fn compress_blocking(data: Bytes, options: ProcessingOptions) -> StorageResult<EncodedImage> {
    let img = decode(&data, false)?;
    let had_alpha = img.color().has_alpha();
    let (img, resized) = fit_within(img, options.max_width, options.max_height);

    let (encoded, format) = if had_alpha {
        (encode_png(&img)?, "png")
    } else {
        let mut quality = options.quality.clamp(1, 100);
        let mut encoded = encode_jpeg(&img, quality)?;
        if let Some(target) = options.target_size {
            while encoded.len() as u64 > target && quality > MIN_COMPRESS_QUALITY {
                quality = quality.saturating_sub(COMPRESS_QUALITY_STEP).max(MIN_COMPRESS_QUALITY);
                encoded = encode_jpeg(&img, quality)?;
            }
        }
        (encoded, "jpeg")
    };

    // Re-encoding must not grow an image that did not need resizing.
    if !resized && encoded.len() >= data.len() {
        let original_format = image::guess_format(&data)
            .map(format_name)
            .unwrap_or("unknown");
        return Ok(EncodedImage {
            data,
            format: original_format.to_string(),
        });
    }

    Ok(EncodedImage {
        data: Bytes::from(encoded),
        format: format.to_string(),
    })
}

fn thumbnail_attempt(
    data: &[u8],
    width: u32,
    height: u32,
    quality: u8,
    fallback: bool,
) -> StorageResult<EncodedImage> {
    let img = decode(data, fallback)?;
    let thumb = if fallback {
        img.resize(width.max(1), height.max(1), FilterType::Nearest)
    } else {
        img.thumbnail(width.max(1), height.max(1))
    };
    let encoded = encode_jpeg(&thumb, quality)?;
    Ok(EncodedImage {
        data: Bytes::from(encoded),
        format: "jpeg".to_string(),
    })
}

/// `image`-backed implementation of [`ImagePipeline`].
#[derive(Debug, Clone, Default)]
pub struct DefaultImagePipeline;

impl DefaultImagePipeline {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImagePipeline for DefaultImagePipeline {
    async fn convert_heic_to_jpeg(&self, data: Bytes) -> StorageResult<Bytes> {
        if !looks_like_heic(&data) {
            return Ok(data);
        }
        // No HEVC decoder is linked in; callers keep the original bytes.
        Err(StorageError::invalid_format(
            "HEIC decoding is not available in the default image pipeline",
        ))
    }

    async fn compress(&self, data: Bytes, options: &ProcessingOptions) -> StorageResult<EncodedImage> {
        let options = options.clone();
        let start = std::time::Instant::now();
        let original_size = data.len();
        let result = tokio::task::spawn_blocking(move || compress_blocking(data, options))
            .await
            .map_err(|e| StorageError::internal("compression task failed").with_source(e))??;

        tracing::debug!(
            original_size,
            compressed_size = result.data.len(),
            format = %result.format,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Image compressed"
        );
        Ok(result)
    }

    fn detect(&self, data: &[u8]) -> Option<ImageInfo> {
        if looks_like_heic(data) {
            return Some(ImageInfo {
                format: "heic".to_string(),
                width: 0,
                height: 0,
                content_type: content_type_for_format("heic").to_string(),
            });
        }
        if looks_like_svg(data) {
            return Some(ImageInfo {
                format: "svg".to_string(),
                width: 0,
                height: 0,
                content_type: content_type_for_format("svg").to_string(),
            });
        }

        let reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .ok()?;
        let format = reader.format()?;
        let (width, height) = reader.into_dimensions().ok()?;
        let name = format_name(format);
        Some(ImageInfo {
            format: name.to_string(),
            width,
            height,
            content_type: content_type_for_format(name).to_string(),
        })
    }

    async fn generate_thumbnail(
        &self,
        data: Bytes,
        width: u32,
        height: u32,
        quality: u8,
    ) -> StorageResult<EncodedImage> {
        tokio::task::spawn_blocking(move || {
            thumbnail_attempt(&data, width, height, quality, false).or_else(|primary| {
                tracing::warn!(
                    error = %primary,
                    "Thumbnail generation failed, retrying with fallback encode"
                );
                thumbnail_attempt(&data, width, height, FALLBACK_THUMBNAIL_QUALITY, true)
                    .map_err(|fallback| fallback.context(format!("primary attempt: {}", primary)))
            })
        })
        .await
        .map_err(|e| StorageError::internal("thumbnail task failed").with_source(e))?
    }
}
