//! Shared upload flow used by every adapter's `upload`.

use std::time::Instant;

use bytes::Bytes;
use stowage_core::{
    EncodedImage, StorageError, StorageResult, UploadRequest, UploadResult, UploadSource,
};

use crate::keys::logical_url;
use crate::signing::sha256_hex;
use crate::traits::StorageAdapter;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

async fn read_source(source: UploadSource) -> StorageResult<Bytes> {
    match source {
        UploadSource::Bytes(data) => Ok(data),
        UploadSource::File(path) => {
            let data = tokio::fs::read(&path).await.map_err(|e| {
                StorageError::from(e).context(format!("reading upload source {}", path.display()))
            })?;
            Ok(Bytes::from(data))
        }
    }
}

/// Fixed content type, then the detected format, then a guess from the filename.
fn resolve_content_type(fixed: Option<String>, detected: Option<&str>, filename: &str) -> String {
    fixed
        .filter(|ct| !ct.trim().is_empty())
        .or_else(|| detected.map(str::to_string))
        .or_else(|| mime_guess::from_path(filename).first().map(|m| m.to_string()))
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
}

/// `filename` with its extension matching `format`; unchanged when it already does.
fn with_format_extension(filename: &str, format: &str) -> String {
    let (stem, ext) = match filename.rfind('.') {
        Some(idx) if idx > 0 => (&filename[..idx], &filename[idx + 1..]),
        _ => (filename, ""),
    };
    let ext = ext.to_ascii_lowercase();
    let matches = ext == format
        || matches!((format, ext.as_str()), ("jpeg", "jpg" | "jpe") | ("tiff", "tif"));
    if matches {
        return filename.to_string();
    }
    let new_ext = if format == "jpeg" { "jpg" } else { format };
    format!("{}.{}", stem, new_ext)
}

/// Run the canonical upload against `adapter`.
pub async fn execute<A>(adapter: &A, request: UploadRequest) -> StorageResult<UploadResult>
where
    A: StorageAdapter + ?Sized,
{
    let start = Instant::now();
    let ctx = adapter.context();
    let backend = adapter.backend_type();
    let UploadRequest {
        source,
        processed,
        tenant_id,
        folder,
        mut filename,
        content_type,
        options,
        thumbnail,
    } = request;

    let mut data = match processed {
        Some(processed) => processed,
        None => read_source(source).await?,
    };
    if data.is_empty() {
        return Err(StorageError::invalid_format("upload body is empty"));
    }

    // Set when the stored bytes may no longer match the submitted format.
    let mut transformed = false;

    if options.convert_heic {
        match ctx.pipeline.convert_heic_to_jpeg(data.clone()).await {
            Ok(converted) => {
                transformed |= converted != data;
                data = converted;
            }
            Err(e) => tracing::warn!(
                error = %e,
                filename = %filename,
                "HEIC conversion failed, storing original bytes"
            ),
        }
    }

    if options.compress {
        match ctx.pipeline.compress(data.clone(), &options).await {
            Ok(compressed) => {
                transformed = true;
                data = compressed.data;
            }
            Err(e) => tracing::warn!(
                error = %e,
                filename = %filename,
                "Compression failed, storing original bytes"
            ),
        }
    }

    let capabilities = adapter.capabilities();
    let size = data.len() as u64;
    if capabilities.max_file_size > 0 && size > capabilities.max_file_size {
        return Err(StorageError::quota_exceeded(format!(
            "file is {} bytes, {} backend accepts at most {}",
            size, backend, capabilities.max_file_size
        )));
    }

    let info = ctx.pipeline.detect(&data);
    if let Some(info) = &info {
        if !capabilities.supports_format(&info.format) {
            return Err(StorageError::invalid_format(format!(
                "{} backend does not accept {} images",
                backend, info.format
            )));
        }
    }

    let detected_format = info.as_ref().filter(|_| transformed);
    if let Some(info) = detected_format {
        filename = with_format_extension(&filename, &info.format);
    }

    let keys = ctx.keys.build(tenant_id, &folder, &filename)?;
    let content_type = resolve_content_type(
        content_type.filter(|_| detected_format.is_none()),
        info.as_ref().map(|i| i.content_type.as_str()),
        &filename,
    );

    adapter
        .put_object(&keys.object_key, data.clone(), &content_type)
        .await
        .map_err(|e| {
            tracing::error!(
                error = %e,
                backend = %backend,
                key = %keys.object_key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Upload failed"
            );
            e
        })?;

    let mut result = UploadResult {
        original_path: keys.object_key.clone(),
        logical_path: keys.logical_path.clone(),
        url: logical_url(&keys.logical_path),
        full_url: adapter.public_url(&keys.object_key),
        size,
        width: info.as_ref().map(|i| i.width).unwrap_or(0),
        height: info.as_ref().map(|i| i.height).unwrap_or(0),
        hash: sha256_hex(&data),
        content_type,
        format: info
            .as_ref()
            .map(|i| i.format.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        ..UploadResult::default()
    };

    if options.generate_thumbnail || thumbnail.is_some() {
        let settings = &ctx.settings;
        let width = if options.thumbnail_width == 0 {
            settings.thumbnail_width
        } else {
            options.thumbnail_width
        };
        let height = if options.thumbnail_height == 0 {
            settings.thumbnail_height
        } else {
            options.thumbnail_height
        };
        let quality = if options.thumbnail_quality == 0 {
            settings.thumbnail_quality
        } else {
            options.thumbnail_quality
        };

        let encoded = match thumbnail {
            Some(precomputed) => Ok(EncodedImage {
                data: precomputed.data,
                format: precomputed.format,
            }),
            None => {
                ctx.pipeline
                    .generate_thumbnail(data.clone(), width, height, quality)
                    .await
            }
        };

        let stored = match encoded {
            Ok(thumb) => {
                let key = keys.thumbnail_key(&thumb.format);
                let thumb_type = mime_guess::from_ext(&thumb.format)
                    .first_raw()
                    .unwrap_or(FALLBACK_CONTENT_TYPE);
                adapter
                    .put_object(&key, thumb.data, thumb_type)
                    .await
                    .map(|()| (key, keys.thumbnail_logical_path(&thumb.format)))
            }
            Err(e) => Err(e),
        };

        match stored {
            Ok((key, logical)) => {
                result.thumbnail_url = Some(logical_url(&logical));
                result.full_thumbnail_url = Some(adapter.public_url(&key));
                result.thumbnail_path = Some(key);
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    backend = %backend,
                    key = %keys.object_key,
                    "Thumbnail generation failed, upload continues without thumbnail"
                );
                result.thumbnail_generation_failed = true;
                result.thumbnail_failure_reason = Some(e.to_string());
            }
        }
    }

    tracing::info!(
        backend = %backend,
        key = %result.original_path,
        size_bytes = size,
        format = %result.format,
        thumbnail_failed = result.thumbnail_generation_failed,
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Upload successful"
    );

    Ok(result)
}
