//! Generic S3-compatible family built on `object_store`.
//!
//! One implementation serves AWS and every vendor alias; the differences
//! (default region, endpoint template, addressing style) live in
//! [`S3Preset`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{
    Attribute, Attributes, ClientOptions, Error as ObjectStoreError, ObjectStore, ObjectStoreExt,
    PutOptions, PutPayload,
};
use stowage_core::{
    BackendType, Capabilities, ChannelConfig, ObjectAcl, StorageError, StorageResult,
    STANDARD_IMAGE_FORMATS,
};

use crate::keys::validate_key;
use crate::traits::{AdapterContext, ByteStream, StorageAdapter};
use crate::url_policy::{normalize_base, s3_default_base, DirectUrl};

/// Largest single-request PUT accepted by S3.
const MAX_SINGLE_PUT: u64 = 5 * 1024 * 1024 * 1024;

const CAPABILITIES: Capabilities = Capabilities {
    supports_signed_url: true,
    supports_cdn: true,
    supports_resize: false,
    supports_acl: false,
    max_file_size: MAX_SINGLE_PUT,
    supported_formats: STANDARD_IMAGE_FORMATS,
};

/// Registry tags served by this adapter.
pub const S3_FAMILY_TAGS: &[&str] = &[
    "s3", "aws", "minio", "r2", "oss", "cos", "b2", "wasabi", "spaces",
];

/// Per-vendor defaults for the S3 family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct S3Preset {
    pub provider: &'static str,
    pub default_region: Option<&'static str>,
    /// Endpoint with `{region}` / `{account_id}` placeholders.
    pub endpoint_template: Option<&'static str>,
    /// An explicit `endpoint` must be configured.
    pub requires_endpoint: bool,
    pub path_style: bool,
}

impl S3Preset {
    pub fn for_tag(tag: &str) -> Option<Self> {
        let preset = match tag.to_lowercase().as_str() {
            "s3" | "aws" => S3Preset {
                provider: "aws",
                default_region: Some("us-east-1"),
                endpoint_template: None,
                requires_endpoint: false,
                path_style: false,
            },
            "minio" => S3Preset {
                provider: "minio",
                default_region: Some("us-east-1"),
                endpoint_template: None,
                requires_endpoint: true,
                path_style: true,
            },
            "r2" => S3Preset {
                provider: "r2",
                default_region: Some("auto"),
                endpoint_template: Some("https://{account_id}.r2.cloudflarestorage.com"),
                requires_endpoint: false,
                path_style: true,
            },
            "oss" => S3Preset {
                provider: "oss",
                default_region: None,
                endpoint_template: Some("https://oss-{region}.aliyuncs.com"),
                requires_endpoint: false,
                path_style: false,
            },
            "cos" => S3Preset {
                provider: "cos",
                default_region: None,
                endpoint_template: Some("https://cos.{region}.myqcloud.com"),
                requires_endpoint: false,
                path_style: false,
            },
            "b2" => S3Preset {
                provider: "b2",
                default_region: None,
                endpoint_template: Some("https://s3.{region}.backblazeb2.com"),
                requires_endpoint: false,
                path_style: false,
            },
            "wasabi" => S3Preset {
                provider: "wasabi",
                default_region: Some("us-east-1"),
                endpoint_template: Some("https://s3.{region}.wasabisys.com"),
                requires_endpoint: false,
                path_style: false,
            },
            "spaces" => S3Preset {
                provider: "spaces",
                default_region: None,
                endpoint_template: Some("https://{region}.digitaloceanspaces.com"),
                requires_endpoint: false,
                path_style: false,
            },
            _ => return None,
        };
        Some(preset)
    }
}

fn map_object_store_error(key: &str, err: ObjectStoreError) -> StorageError {
    match err {
        ObjectStoreError::NotFound { .. } => {
            StorageError::not_found(format!("object not found: {}", key)).with_source(err)
        }
        ObjectStoreError::PermissionDenied { .. } | ObjectStoreError::Unauthenticated { .. } => {
            StorageError::permission(format!("access denied for {}", key)).with_source(err)
        }
        other => StorageError::network(format!("S3 request failed for {}", key)).with_source(other),
    }
}

/// S3 storage implementation
pub struct S3Storage {
    store: AmazonS3,
    provider: &'static str,
    bucket: String,
    access: ObjectAcl,
    direct: DirectUrl,
    ctx: AdapterContext,
}

impl S3Storage {
    /// Build a client for one S3-family channel.
    ///
    /// Required keys: `bucket`, `access_key`, `secret_key`; `region` unless
    /// the preset supplies one; `endpoint` for presets without a public host.
    pub async fn new(tag: &str, config: &ChannelConfig, ctx: AdapterContext) -> StorageResult<Self> {
        let preset = S3Preset::for_tag(tag).ok_or_else(|| {
            StorageError::internal(format!("unknown S3 provider preset: {}", tag))
        })?;

        let mut required = vec!["bucket", "access_key", "secret_key"];
        if preset.default_region.is_none() {
            required.push("region");
        }
        if preset.requires_endpoint {
            required.push("endpoint");
        }
        let needs_account = preset
            .endpoint_template
            .is_some_and(|t| t.contains("{account_id}"))
            && config.get("endpoint").is_none();
        if needs_account {
            required.push("account_id");
        }
        config.require(&required)?;

        let bucket = config.required("bucket")?;
        let region = config
            .get("region")
            .or(preset.default_region)
            .unwrap_or_default()
            .to_string();
        let use_https = config.get_bool("use_https", true);
        let explicit_endpoint = config.get("endpoint").map(|e| normalize_base(e, use_https));
        let endpoint = explicit_endpoint.clone().or_else(|| {
            preset.endpoint_template.map(|t| {
                t.replace("{region}", &region)
                    .replace("{account_id}", config.get_or("account_id", ""))
            })
        });
        let path_style = config.get_bool(
            "use_path_style",
            preset.path_style || (explicit_endpoint.is_some() && preset.provider == "aws"),
        );
        let access = config
            .get_parsed::<ObjectAcl>("access_control")?
            .unwrap_or_default();

        let client_options = ClientOptions::new()
            .with_connect_timeout(ctx.settings.connect_timeout)
            .with_allow_http(!use_https || endpoint.as_deref().is_some_and(|e| e.starts_with("http://")));

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket.clone())
            .with_region(region.clone())
            .with_access_key_id(config.required("access_key")?)
            .with_secret_access_key(config.required("secret_key")?)
            .with_virtual_hosted_style_request(!path_style)
            .with_client_options(client_options);

        if let Some(endpoint) = &endpoint {
            // Virtual-hosted requests expect the bucket inside the endpoint host.
            let store_endpoint = if path_style {
                endpoint.clone()
            } else {
                s3_default_base(Some(endpoint), &bucket, &region, false, use_https)
            };
            builder = builder.with_endpoint(store_endpoint);
        }

        let store = builder.build().map_err(|e| {
            StorageError::internal(format!("invalid {} configuration", preset.provider)).with_source(e)
        })?;

        let direct = DirectUrl::new(
            config.get("custom_domain"),
            &s3_default_base(endpoint.as_deref(), &bucket, &region, path_style, use_https),
            use_https,
        );

        tracing::debug!(
            provider = preset.provider,
            bucket = %bucket,
            region = %region,
            path_style,
            "S3 storage initialized"
        );

        Ok(S3Storage {
            store,
            provider: preset.provider,
            bucket,
            access,
            direct,
            ctx,
        })
    }

    pub fn provider(&self) -> &'static str {
        self.provider
    }
}

#[async_trait]
impl StorageAdapter for S3Storage {
    fn backend_type(&self) -> BackendType {
        BackendType::S3
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
        let location = Path::from(key);
        let start = std::time::Instant::now();

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&location, PutPayload::from(data), options)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    provider = self.provider,
                    bucket = %self.bucket,
                    key = %key,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 upload failed"
                );
                map_object_store_error(key, e)
            })?;

        tracing::info!(
            provider = self.provider,
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let start = std::time::Instant::now();
        let location = Path::from(key);

        match self.store.delete(&location).await {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
            Err(e) => {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                return Err(map_object_store_error(key, e));
            }
        }

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        match self.store.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(map_object_store_error(key, e)),
        }
    }

    async fn read_file(&self, key: &str) -> StorageResult<ByteStream> {
        validate_key(key)?;
        let result = self
            .store
            .get(&Path::from(key))
            .await
            .map_err(|e| map_object_store_error(key, e))?;

        let bucket = self.bucket.clone();
        let owned_key = key.to_string();
        let stream = result.into_stream().map(move |res| {
            res.map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %owned_key,
                    "S3 stream download error"
                );
                map_object_store_error(&owned_key, e)
            })
        });

        Ok(Box::pin(stream))
    }

    fn public_url(&self, key: &str) -> String {
        self.direct.url(key)
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        validate_key(key)?;
        let url = self
            .store
            .signed_url(Method::GET, &Path::from(key), expires_in)
            .await
            .map_err(|e| StorageError::internal("failed to presign URL").with_source(e))?;
        Ok(url.to_string())
    }

    async fn set_object_acl(&self, key: &str, acl: ObjectAcl) -> StorageResult<()> {
        // No per-object ACL API here; bucket policy governs public reads.
        tracing::debug!(
            provider = self.provider,
            key = %key,
            acl = %acl,
            "Per-object ACL not supported, skipping"
        );
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<()> {
        let mut listing = self.store.list(None);
        match listing.next().await {
            None | Some(Ok(_)) => Ok(()),
            Some(Err(e)) => Err(map_object_store_error(&self.bucket, e)),
        }
    }
}
