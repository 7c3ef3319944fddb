//! Test fixtures for creating sample images and pipelines

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageBuffer, Rgb};
use stowage_core::{EncodedImage, ImageInfo, ImagePipeline, ProcessingOptions, StorageError, StorageResult};

/// Encode a small JPEG.
pub fn create_test_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 16 % 256) as u8, (y * 16 % 256) as u8, 128u8])
    });
    let mut buffer = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, 80);
    encoder.encode_image(&img).expect("Failed to encode JPEG");
    buffer
}

/// A decodable JPEG of exactly `len` bytes.
///
/// The encoded image is padded with a COM segment right after SOI, which
/// decoders skip.
pub fn jpeg_of_size(len: usize) -> Vec<u8> {
    let encoded = create_test_jpeg(8, 8);
    assert!(
        encoded.len() + 4 <= len,
        "base JPEG is {} bytes, cannot pad to {}",
        encoded.len(),
        len
    );

    let payload = len - encoded.len() - 4;
    let segment_len = u16::try_from(payload + 2).expect("COM segment too large");

    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(&encoded[..2]);
    out.extend_from_slice(&[0xFF, 0xFE]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend(std::iter::repeat(b'x').take(payload));
    out.extend_from_slice(&encoded[2..]);
    assert_eq!(out.len(), len);
    out
}

/// Pipeline that detects every input as a 10x10 JPEG and fails every
/// thumbnail attempt.
pub struct FailingThumbnailPipeline;

#[async_trait]
impl ImagePipeline for FailingThumbnailPipeline {
    async fn convert_heic_to_jpeg(&self, data: Bytes) -> StorageResult<Bytes> {
        Ok(data)
    }

    async fn compress(&self, data: Bytes, _options: &ProcessingOptions) -> StorageResult<EncodedImage> {
        Ok(EncodedImage {
            data,
            format: "jpeg".to_string(),
        })
    }

    fn detect(&self, _data: &[u8]) -> Option<ImageInfo> {
        Some(ImageInfo {
            format: "jpeg".to_string(),
            width: 10,
            height: 10,
            content_type: "image/jpeg".to_string(),
        })
    }

    async fn generate_thumbnail(
        &self,
        _data: Bytes,
        _width: u32,
        _height: u32,
        _quality: u8,
    ) -> StorageResult<EncodedImage> {
        Err(StorageError::invalid_format("decoder rejected both thumbnail attempts"))
    }
}
