//! Azure Blob Storage over plain REST with Shared Key signing.
//!
//! Block blobs are written with a single `Put Blob`. Private channels hand
//! out read-only service SAS URLs.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{header, Method, StatusCode, Url};
use stowage_core::{
    BackendType, Capabilities, ChannelConfig, ObjectAcl, StorageError, StorageResult,
    STANDARD_IMAGE_FORMATS,
};

use crate::http::{body_stream, build_client, network_error, status_error};
use crate::keys::validate_key;
use crate::signing::{
    azure_authorization, azure_canonicalized_headers, azure_canonicalized_resource,
    azure_sas_query, azure_signature, azure_string_to_sign, http_date, SasParams,
    AZURE_API_VERSION,
};
use crate::traits::{AdapterContext, ByteStream, StorageAdapter};
use crate::url_policy::{encode_key, DirectUrl};

const CAPABILITIES: Capabilities = Capabilities {
    supports_signed_url: true,
    supports_cdn: true,
    supports_resize: false,
    supports_acl: false,
    // Single Put Blob ceiling.
    max_file_size: 5000 * 1024 * 1024,
    supported_formats: STANDARD_IMAGE_FORMATS,
};

/// Optional request body: bytes plus content type.
type Body<'a> = Option<(Bytes, &'a str)>;

pub struct AzureBlobStorage {
    client: reqwest::Client,
    account: String,
    account_key: String,
    container: String,
    /// Scheme, host and port of the blob endpoint.
    origin: String,
    /// Path prefix of the endpoint (non-empty for emulators), no trailing slash.
    path_prefix: String,
    sas_protocol: &'static str,
    access: ObjectAcl,
    direct: DirectUrl,
    ctx: AdapterContext,
}

impl AzureBlobStorage {
    /// Required keys: `account_name`, `account_key`, `container`.
    ///
    /// `endpoint` overrides `https://<account>.blob.core.windows.net`.
    pub async fn new(config: &ChannelConfig, ctx: AdapterContext) -> StorageResult<Self> {
        config.require(&["account_name", "account_key", "container"])?;

        let account = config.required("account_name")?;
        let account_key = config.required("account_key")?;
        // Fail at construction rather than on the first request.
        azure_signature(&account_key, "")?;

        let use_https = config.get_bool("use_https", true);
        let scheme = if use_https { "https" } else { "http" };
        let endpoint = config
            .get("endpoint")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}://{}.blob.core.windows.net", scheme, account));
        let endpoint = Url::parse(&endpoint).map_err(|e| {
            StorageError::internal(format!("invalid Azure endpoint: {}", endpoint)).with_source(e)
        })?;
        let origin = endpoint.origin().ascii_serialization();
        let path_prefix = endpoint.path().trim_end_matches('/').to_string();

        let container = config.required("container")?;
        let access = config
            .get_parsed::<ObjectAcl>("access_control")?
            .unwrap_or_default();

        let direct = match config.get("custom_domain") {
            Some(domain) => DirectUrl::new(Some(domain), "", use_https),
            None => DirectUrl::from_base(format!("{}{}/{}", origin, path_prefix, container)),
        };

        Ok(AzureBlobStorage {
            client: build_client(&ctx.settings, config.get_bool("tls_skip_verify", false))?,
            account,
            account_key,
            container,
            origin,
            path_prefix,
            sas_protocol: if use_https { "https" } else { "https,http" },
            access,
            direct,
            ctx,
        })
    }

    fn blob_path(&self, key: &str) -> StorageResult<String> {
        validate_key(key)?;
        Ok(format!(
            "{}/{}/{}",
            self.path_prefix,
            self.container,
            encode_key(key)
        ))
    }

    /// Sign and send one request against `path` (already encoded).
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Body<'_>,
    ) -> StorageResult<reqwest::Response> {
        let date = http_date(Utc::now());
        let mut ms_headers: Vec<(&str, &str)> =
            vec![("x-ms-date", date.as_str()), ("x-ms-version", AZURE_API_VERSION)];
        if method == Method::PUT {
            ms_headers.push(("x-ms-blob-type", "BlockBlob"));
        }

        let (content_length, content_type) = body
            .as_ref()
            .map(|(data, content_type)| (data.len() as u64, *content_type))
            .unwrap_or((0, ""));

        let string_to_sign = azure_string_to_sign(
            method.as_str(),
            content_length,
            content_type,
            &azure_canonicalized_headers(&ms_headers),
            &azure_canonicalized_resource(&self.account, path, query),
        );
        let signature = azure_signature(&self.account_key, &string_to_sign)?;

        let url = format!("{}{}", self.origin, path);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .header(header::AUTHORIZATION, azure_authorization(&self.account, &signature));
        if !query.is_empty() {
            request = request.query(query);
        }
        for (name, value) in &ms_headers {
            request = request.header(*name, *value);
        }
        if let Some((data, content_type)) = body {
            request = request.header(header::CONTENT_TYPE, content_type).body(data);
        }

        request
            .send()
            .await
            .map_err(|e| network_error(format!("{} {}", method, url), e))
    }
}

#[async_trait]
impl StorageAdapter for AzureBlobStorage {
    fn backend_type(&self) -> BackendType {
        BackendType::Azure
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
        let path = self.blob_path(key)?;
        let size = data.len();
        let start = std::time::Instant::now();

        let response = self
            .send(Method::PUT, &path, &[], Some((data, content_type)))
            .await?;
        if !response.status().is_success() {
            let err = status_error(format!("Put Blob {}", key), response).await;
            tracing::error!(error = %err, container = %self.container, key = %key, "Azure upload failed");
            return Err(err);
        }

        tracing::info!(
            container = %self.container,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Azure upload successful"
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.blob_path(key)?;
        let response = self.send(Method::DELETE, &path, &[], None).await?;
        match response.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            _ => Err(status_error(format!("Delete Blob {}", key), response).await),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.blob_path(key)?;
        let response = self.send(Method::HEAD, &path, &[], None).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(format!("Get Blob Properties {}", key), response).await),
        }
    }

    async fn read_file(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.blob_path(key)?;
        let response = self.send(Method::GET, &path, &[], None).await?;
        if !response.status().is_success() {
            return Err(status_error(format!("Get Blob {}", key), response).await);
        }
        Ok(body_stream(response))
    }

    fn public_url(&self, key: &str) -> String {
        self.direct.url(key)
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        validate_key(key)?;
        let expires_in = chrono::Duration::from_std(expires_in)
            .map_err(|e| StorageError::internal("invalid SAS expiry").with_source(e))?;
        let params = SasParams {
            account: &self.account,
            container: &self.container,
            blob: key,
            permissions: "r",
            expiry: Utc::now() + expires_in,
            protocol: self.sas_protocol,
        };
        let query = azure_sas_query(&params, &self.account_key)?;
        Ok(format!("{}?{}", self.public_url(key), query))
    }

    async fn health_check(&self) -> StorageResult<()> {
        let path = format!("{}/{}", self.path_prefix, self.container);
        let query = [("restype", "container"), ("comp", "list"), ("maxresults", "1")];
        let response = self.send(Method::GET, &path, &query, None).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(format!("List Blobs {}", self.container), response).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use stowage_core::{Settings, UrlOptions};
    use stowage_processing::DefaultImagePipeline;

    const ACCOUNT_KEY: &str = "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

    fn ctx() -> AdapterContext {
        AdapterContext::new(Arc::new(DefaultImagePipeline), Arc::new(Settings::default()))
    }

    fn config(extra: &[(&str, &str)]) -> ChannelConfig {
        let mut config: ChannelConfig = [
            ("account_name", "devstoreaccount1"),
            ("account_key", ACCOUNT_KEY),
            ("container", "media"),
        ]
        .into_iter()
        .collect();
        for (k, v) in extra {
            config.insert(k, *v);
        }
        config
    }

    #[tokio::test]
    async fn test_missing_keys_fail_closed() {
        let partial: ChannelConfig = [("account_name", "acct")].into_iter().collect();
        let err = AzureBlobStorage::new(&partial, ctx()).await.err().unwrap();
        assert!(err.is_internal());
        assert!(err.message().contains("account_key"));
        assert!(err.message().contains("container"));
    }

    #[tokio::test]
    async fn test_bad_account_key_fails_closed() {
        let err = AzureBlobStorage::new(&config(&[("account_key", "%%%")]), ctx())
            .await
            .err()
            .unwrap();
        assert!(err.is_internal());
    }

    #[tokio::test]
    async fn test_default_endpoint_url() {
        let storage = AzureBlobStorage::new(&config(&[]), ctx()).await.unwrap();
        assert_eq!(
            storage.public_url("files/01/1/a b.jpg"),
            "https://devstoreaccount1.blob.core.windows.net/media/files/01/1/a%20b.jpg"
        );
    }

    #[tokio::test]
    async fn test_emulator_endpoint_keeps_path_prefix() {
        let storage = AzureBlobStorage::new(
            &config(&[("endpoint", "http://127.0.0.1:10000/devstoreaccount1")]),
            ctx(),
        )
        .await
        .unwrap();
        assert_eq!(storage.blob_path("a.jpg").unwrap(), "/devstoreaccount1/media/a.jpg");
        assert_eq!(
            storage.public_url("a.jpg"),
            "http://127.0.0.1:10000/devstoreaccount1/media/a.jpg"
        );
    }

    #[tokio::test]
    async fn test_private_channel_mints_sas() {
        let storage = AzureBlobStorage::new(&config(&[("access_control", "private")]), ctx())
            .await
            .unwrap();
        let url = storage
            .get_url("files/01/1/a.jpg", &UrlOptions::expiring(Duration::from_secs(600)))
            .await
            .unwrap();
        let (path, query) = url.split_once('?').unwrap();
        assert_eq!(
            path,
            "https://devstoreaccount1.blob.core.windows.net/media/files/01/1/a.jpg"
        );
        for param in ["sv=", "spr=", "se=", "sr=b", "sp=r", "sig="] {
            assert!(query.contains(param), "missing {} in {}", param, query);
        }
    }
}
