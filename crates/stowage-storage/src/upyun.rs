//! Upyun REST adapter.
//!
//! Every request carries a GMT `Date` and an `Authorization` header signed
//! with HMAC-SHA1 (see [`crate::signing`]). Private channels serve files
//! through `_upt` anti-leech tokens on the CDN domain.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{header, Method, StatusCode};
use stowage_core::{
    BackendType, Capabilities, ChannelConfig, ObjectAcl, StorageError, StorageResult,
    STANDARD_IMAGE_FORMATS,
};

use crate::http::{body_stream, build_client, network_error, status_error};
use crate::keys::validate_key;
use crate::signing::{
    http_date, md5_hex, upyun_authorization, upyun_signature, upyun_signing_key, upyun_url_token,
};
use crate::traits::{AdapterContext, ByteStream, StorageAdapter};
use crate::url_policy::{encode_key, normalize_base, DirectUrl};

const DEFAULT_API_ENDPOINT: &str = "https://v0.api.upyun.com";

const CAPABILITIES: Capabilities = Capabilities {
    supports_signed_url: true,
    supports_cdn: true,
    supports_resize: true,
    supports_acl: false,
    max_file_size: 0,
    supported_formats: STANDARD_IMAGE_FORMATS,
};

pub struct UpyunStorage {
    client: reqwest::Client,
    api_endpoint: String,
    service: String,
    operator: String,
    signing_key: String,
    /// Anti-leech token secret; present on private channels.
    token_secret: Option<String>,
    access: ObjectAcl,
    direct: DirectUrl,
    ctx: AdapterContext,
}

impl UpyunStorage {
    /// Required keys: `service`, `operator`, `password`; private channels
    /// also need `token_secret`.
    pub async fn new(config: &ChannelConfig, ctx: AdapterContext) -> StorageResult<Self> {
        config.require(&["service", "operator", "password"])?;

        let access = config
            .get_parsed::<ObjectAcl>("access_control")?
            .unwrap_or_default();
        if access.is_private() {
            config.require(&["token_secret"])?;
        }

        let use_https = config.get_bool("use_https", true);
        let service = config.required("service")?;
        let direct = DirectUrl::new(
            config.get("custom_domain"),
            &format!("{}.test.upcdn.net", service),
            use_https,
        );

        Ok(UpyunStorage {
            client: build_client(&ctx.settings, false)?,
            api_endpoint: normalize_base(config.get_or("endpoint", DEFAULT_API_ENDPOINT), true),
            operator: config.required("operator")?,
            signing_key: upyun_signing_key(&config.required("password")?),
            token_secret: config.get("token_secret").map(str::to_string),
            service,
            access,
            direct,
            ctx,
        })
    }

    /// Request URI (`/<service>/<encoded key>`), also the signed resource.
    fn uri(&self, key: &str) -> StorageResult<String> {
        validate_key(key)?;
        Ok(format!("/{}/{}", self.service, encode_key(key)))
    }

    fn request(
        &self,
        method: Method,
        uri: &str,
        content_md5: Option<&str>,
    ) -> StorageResult<reqwest::RequestBuilder> {
        let date = http_date(Utc::now());
        let signature = upyun_signature(&self.signing_key, method.as_str(), uri, &date, content_md5)?;
        let mut request = self
            .client
            .request(method, format!("{}{}", self.api_endpoint, uri))
            .header(header::DATE, date)
            .header(
                header::AUTHORIZATION,
                upyun_authorization(&self.operator, &signature),
            );
        if let Some(md5) = content_md5 {
            request = request.header("Content-MD5", md5);
        }
        Ok(request)
    }
}

#[async_trait]
impl StorageAdapter for UpyunStorage {
    fn backend_type(&self) -> BackendType {
        BackendType::Upyun
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
        let uri = self.uri(key)?;
        let size = data.len();
        let start = std::time::Instant::now();
        let md5 = md5_hex(&data);

        let response = self
            .request(Method::PUT, &uri, Some(&md5))?
            .header(header::CONTENT_TYPE, content_type)
            .header("mkdir", "true")
            .body(data)
            .send()
            .await
            .map_err(|e| network_error(format!("PUT {}", uri), e))?;
        if !response.status().is_success() {
            let err = status_error(format!("PUT {}", uri), response).await;
            tracing::error!(error = %err, service = %self.service, key = %key, "Upyun upload failed");
            return Err(err);
        }

        tracing::info!(
            service = %self.service,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Upyun upload successful"
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let uri = self.uri(key)?;
        let response = self
            .request(Method::DELETE, &uri, None)?
            .send()
            .await
            .map_err(|e| network_error(format!("DELETE {}", uri), e))?;
        match response.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            _ => Err(status_error(format!("DELETE {}", uri), response).await),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let uri = self.uri(key)?;
        let response = self
            .request(Method::HEAD, &uri, None)?
            .send()
            .await
            .map_err(|e| network_error(format!("HEAD {}", uri), e))?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(format!("HEAD {}", uri), response).await),
        }
    }

    async fn read_file(&self, key: &str) -> StorageResult<ByteStream> {
        let uri = self.uri(key)?;
        let response = self
            .request(Method::GET, &uri, None)?
            .send()
            .await
            .map_err(|e| network_error(format!("GET {}", uri), e))?;
        if !response.status().is_success() {
            return Err(status_error(format!("GET {}", uri), response).await);
        }
        Ok(body_stream(response))
    }

    fn public_url(&self, key: &str) -> String {
        self.direct.url(key)
    }

    async fn signed_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        validate_key(key)?;
        let secret = self
            .token_secret
            .as_deref()
            .ok_or_else(|| StorageError::internal("token_secret is not configured"))?;
        let expires_at = i64::try_from(expires_in.as_secs())
            .ok()
            .and_then(|secs| Utc::now().timestamp().checked_add(secs))
            .ok_or_else(|| StorageError::invalid_format("URL expiry is out of range"))?;
        let path = format!("/{}", encode_key(key));
        let token = upyun_url_token(secret, expires_at, &path);
        Ok(format!("{}?_upt={}", self.public_url(key), token))
    }

    async fn health_check(&self) -> StorageResult<()> {
        let uri = format!("/{}/", self.service);
        let response = self
            .request(Method::GET, &uri, None)?
            .header("x-list-limit", "1")
            .send()
            .await
            .map_err(|e| network_error(format!("GET {}", uri), e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(format!("GET {}", uri), response).await)
        }
    }
}
