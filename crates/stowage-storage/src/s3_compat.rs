//! Alternate S3-compatible adapter on the AWS SDK.
//!
//! Used for endpoints that need quirks the generic family does not offer:
//! path-style addressing by default, payload checksums only when required,
//! no stalled-stream protection, and real per-object canned ACLs.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::Region;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{
    Credentials, RequestChecksumCalculation, ResponseChecksumValidation,
    StalledStreamProtectionConfig,
};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream as SdkByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use bytes::Bytes;
use futures::StreamExt;
use stowage_core::{
    BackendType, Capabilities, ChannelConfig, ObjectAcl, StorageError, StorageResult,
    STANDARD_IMAGE_FORMATS,
};
use tokio_util::io::ReaderStream;

use crate::keys::validate_key;
use crate::traits::{AdapterContext, ByteStream, StorageAdapter};
use crate::url_policy::{normalize_base, s3_default_base, DirectUrl};

const CAPABILITIES: Capabilities = Capabilities {
    supports_signed_url: true,
    supports_cdn: true,
    supports_resize: false,
    supports_acl: true,
    max_file_size: 5 * 1024 * 1024 * 1024,
    supported_formats: STANDARD_IMAGE_FORMATS,
};

fn canned_acl(acl: ObjectAcl) -> ObjectCannedAcl {
    match acl {
        ObjectAcl::PublicRead => ObjectCannedAcl::PublicRead,
        ObjectAcl::Private => ObjectCannedAcl::Private,
    }
}

fn map_sdk_error<E>(context: String, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let mapped = match (&err, status) {
        (SdkError::TimeoutError(_) | SdkError::DispatchFailure(_), _) => {
            StorageError::network(context)
        }
        (_, Some(code)) => StorageError::from_http_status(code, context),
        _ => StorageError::network(context),
    };
    mapped.with_source(err)
}

/// S3-compatible storage on `aws-sdk-s3`
pub struct S3CompatStorage {
    client: aws_sdk_s3::Client,
    bucket: String,
    access: ObjectAcl,
    /// Send canned ACLs on write and honor `set_object_acl`.
    use_acl: bool,
    direct: DirectUrl,
    ctx: AdapterContext,
}

impl S3CompatStorage {
    /// Required keys: `endpoint`, `bucket`, `access_key`, `secret_key`.
    pub async fn new(config: &ChannelConfig, ctx: AdapterContext) -> StorageResult<Self> {
        config.require(&["endpoint", "bucket", "access_key", "secret_key"])?;

        let use_https = config.get_bool("use_https", true);
        let endpoint = normalize_base(&config.required("endpoint")?, use_https);
        let bucket = config.required("bucket")?;
        let region = config.get_or("region", "us-east-1").to_string();
        let path_style = config.get_bool("use_path_style", true);
        let access = config
            .get_parsed::<ObjectAcl>("access_control")?
            .unwrap_or_default();

        let credentials = Credentials::new(
            config.required("access_key")?,
            config.required("secret_key")?,
            None,
            None,
            "stowage-channel",
        );

        let sdk_config = aws_sdk_s3::Config::builder()
            .endpoint_url(&endpoint)
            .region(Region::new(region.clone()))
            .credentials_provider(credentials)
            .force_path_style(path_style)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled())
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .timeout_config(
                TimeoutConfig::builder()
                    .connect_timeout(ctx.settings.connect_timeout)
                    .build(),
            )
            .build();

        let direct = DirectUrl::new(
            config.get("custom_domain"),
            &s3_default_base(Some(&endpoint), &bucket, &region, path_style, use_https),
            use_https,
        );

        Ok(S3CompatStorage {
            client: aws_sdk_s3::Client::from_conf(sdk_config),
            bucket,
            access,
            use_acl: config.get_bool("use_acl", true),
            direct,
            ctx,
        })
    }
}

#[async_trait]
impl StorageAdapter for S3CompatStorage {
    fn backend_type(&self) -> BackendType {
        BackendType::S3Compat
    }

    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    fn context(&self) -> &AdapterContext {
        &self.ctx
    }

    fn access_control(&self) -> ObjectAcl {
        self.access
    }

    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        validate_key(key)?;
        let size = data.len() as u64;
        let start = std::time::Instant::now();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .content_length(size as i64)
            .set_acl(self.use_acl.then(|| canned_acl(self.access)))
            .body(SdkByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3-compatible upload failed"
                );
                map_sdk_error(format!("failed to upload {}", key), e)
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3-compatible upload successful"
        );

        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(format!("failed to delete {}", key), e))?;

        tracing::info!(bucket = %self.bucket, key = %key, "S3-compatible delete successful");
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e.as_service_error().is_some_and(|se| se.is_not_found())
                    || e.raw_response().is_some_and(|r| r.status().as_u16() == 404);
                if not_found {
                    Ok(false)
                } else {
                    Err(map_sdk_error(format!("failed to stat {}", key), e))
                }
            }
        }
    }

    async fn read_file(&self, key: &str) -> StorageResult<ByteStream> {
        validate_key(key)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::not_found(format!("object not found: {}", key)).with_source(e)
                } else {
                    map_sdk_error(format!("failed to read {}", key), e)
                }
            })?;

        let stream = ReaderStream::new(output.body.into_async_read())
            .map(|chunk| chunk.map_err(|e| StorageError::network("S3 body stream failed").with_source(e)));
        Ok(Box::pin(stream))
    }

    fn public_url(&self, key: &str) -> String {
        self.direct.url(key)
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        validate_key(key)?;
        let presigning = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::internal("invalid presign expiry").with_source(e))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| map_sdk_error(format!("failed to presign {}", key), e))?;
        Ok(request.uri().to_string())
    }

    async fn set_object_acl(&self, key: &str, acl: ObjectAcl) -> StorageResult<()> {
        validate_key(key)?;
        if !self.use_acl {
            tracing::debug!(key = %key, acl = %acl, "ACL updates disabled for channel, skipping");
            return Ok(());
        }
        self.client
            .put_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .acl(canned_acl(acl))
            .send()
            .await
            .map_err(|e| map_sdk_error(format!("failed to set ACL on {}", key), e))?;
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(1)
            .send()
            .await
            .map_err(|e| map_sdk_error(format!("failed to list bucket {}", self.bucket), e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stowage_core::{Settings, UrlOptions};
    use stowage_processing::DefaultImagePipeline;

    fn ctx() -> AdapterContext {
        AdapterContext::new(Arc::new(DefaultImagePipeline), Arc::new(Settings::default()))
    }

    fn config(access: &str) -> ChannelConfig {
        [
            ("endpoint", "http://127.0.0.1:9000"),
            ("bucket", "photos"),
            ("access_key", "minio"),
            ("secret_key", "minio-secret"),
            ("access_control", access),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn test_missing_keys_fail_closed() {
        let partial: ChannelConfig = [("bucket", "photos")].into_iter().collect();
        let err = S3CompatStorage::new(&partial, ctx()).await.err().unwrap();
        assert!(err.is_internal());
        assert!(err.message().contains("endpoint"));
        assert!(err.message().contains("secret_key"));
    }

    #[tokio::test]
    async fn test_invalid_access_control_is_rejected() {
        let err = S3CompatStorage::new(&config("world-writable"), ctx())
            .await
            .err()
            .unwrap();
        assert!(err.is_internal());
    }

    #[tokio::test]
    async fn test_public_url_is_path_style() {
        let storage = S3CompatStorage::new(&config("public-read"), ctx()).await.unwrap();
        let url = storage
            .get_url("files/01/1/a.jpg", &UrlOptions::default())
            .await
            .unwrap();
        assert_eq!(url, "http://127.0.0.1:9000/photos/files/01/1/a.jpg");
    }

    #[tokio::test]
    async fn test_private_url_is_presigned() {
        let storage = S3CompatStorage::new(&config("private"), ctx()).await.unwrap();
        let url = storage
            .get_url("files/01/1/a.jpg", &UrlOptions::expiring(Duration::from_secs(600)))
            .await
            .unwrap();
        assert!(url.starts_with("http://127.0.0.1:9000/photos/files/01/1/a.jpg?"));
        assert!(url.contains("X-Amz-Expires=600"));
        assert!(url.contains("X-Amz-Signature="));
    }
}
