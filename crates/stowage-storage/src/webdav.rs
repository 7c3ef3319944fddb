//! WebDAV adapter over HTTP Basic auth.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Method, StatusCode};
use stowage_core::{
    BackendType, Capabilities, ChannelConfig, ObjectAcl, StorageError, StorageResult,
    STANDARD_IMAGE_FORMATS,
};

use crate::http::{body_stream, build_client, network_error, status_error};
use crate::keys::validate_key;
use crate::traits::{AdapterContext, ByteStream, StorageAdapter};
use crate::url_policy::{encode_key, normalize_base, DirectUrl};

const CAPABILITIES: Capabilities = Capabilities {
    supports_signed_url: false,
    supports_cdn: true,
    supports_resize: false,
    supports_acl: false,
    max_file_size: 0,
    supported_formats: STANDARD_IMAGE_FORMATS,
};

fn webdav_method(name: &'static str) -> StorageResult<Method> {
    Method::from_bytes(name.as_bytes())
        .map_err(|e| StorageError::internal(format!("invalid HTTP method {}", name)).with_source(e))
}

/// MKCOL replies that mean the collection is usable.
fn collection_ready(status: StatusCode) -> bool {
    matches!(status.as_u16(), 200 | 201 | 301 | 302 | 405)
}

pub struct WebDavStorage {
    client: reqwest::Client,
    /// Endpoint plus encoded root path, no trailing slash.
    base: String,
    username: String,
    password: String,
    create_dirs: bool,
    access: ObjectAcl,
    direct: DirectUrl,
    ctx: AdapterContext,
}

impl WebDavStorage {
    /// Required keys: `endpoint`, `username`, `password`.
    pub async fn new(config: &ChannelConfig, ctx: AdapterContext) -> StorageResult<Self> {
        config.require(&["endpoint", "username", "password"])?;

        let use_https = config.get_bool("use_https", true);
        let endpoint = normalize_base(&config.required("endpoint")?, use_https);
        let root = config.get_or("root_path", "").trim_matches('/');
        let base = if root.is_empty() {
            endpoint
        } else {
            format!("{}/{}", endpoint, encode_key(root))
        };

        let direct = match config.get("custom_domain") {
            Some(domain) => DirectUrl::new(Some(domain), "", use_https),
            None => DirectUrl::from_base(base.clone()),
        };

        Ok(WebDavStorage {
            client: build_client(&ctx.settings, config.get_bool("tls_skip_verify", false))?,
            base,
            username: config.required("username")?,
            password: config.required("password")?,
            create_dirs: config.get_bool("mkdir", true),
            access: config
                .get_parsed::<ObjectAcl>("access_control")?
                .unwrap_or_default(),
            direct,
            ctx,
        })
    }

    fn object_url(&self, key: &str) -> StorageResult<String> {
        validate_key(key)?;
        Ok(format!("{}/{}", self.base, encode_key(key)))
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
    }

    /// Create every parent collection of `key`, outermost first.
    async fn ensure_collections(&self, key: &str) -> StorageResult<()> {
        let segments: Vec<&str> = key.split('/').collect();
        let Some((_, parents)) = segments.split_last() else {
            return Ok(());
        };

        let mkcol = webdav_method("MKCOL")?;
        let mut url = self.base.clone();
        for segment in parents {
            url.push('/');
            url.push_str(&encode_key(segment));
            let response = self
                .request(mkcol.clone(), &format!("{}/", url))
                .send()
                .await
                .map_err(|e| network_error(format!("MKCOL {}", url), e))?;
            if !collection_ready(response.status()) {
                return Err(status_error(format!("MKCOL {}", url), response).await);
            }
        }
        Ok(())
    }

    /// Range GET of the first byte; used when HEAD gives no usable answer.
    async fn probe_with_range(&self, url: &str) -> StorageResult<bool> {
        let response = self
            .request(Method::GET, url)
            .header(header::RANGE, "bytes=0-0")
            .send()
            .await
            .map_err(|e| network_error(format!("GET {}", url), e))?;
        match response.status() {
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => Ok(true),
            // Zero-length objects cannot satisfy any range.
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(format!("GET {}", url), response).await),
        }
    }
}

#[async_trait]
impl StorageAdapter for WebDavStorage {
    fn backend_type(&self) -> BackendType {
        BackendType::WebDav
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
        let url = self.object_url(key)?;
        let size = data.len();
        let start = std::time::Instant::now();

        if self.create_dirs {
            self.ensure_collections(key).await?;
        }

        let response = self
            .request(Method::PUT, &url)
            .header(header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, url = %url, size_bytes = size, "WebDAV upload failed");
                network_error(format!("PUT {}", url), e)
            })?;
        if !response.status().is_success() {
            return Err(status_error(format!("PUT {}", url), response).await);
        }

        tracing::info!(
            url = %url,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "WebDAV upload successful"
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let url = self.object_url(key)?;
        let response = self
            .request(Method::DELETE, &url)
            .send()
            .await
            .map_err(|e| network_error(format!("DELETE {}", url), e))?;
        match response.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            _ => Err(status_error(format!("DELETE {}", url), response).await),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let url = self.object_url(key)?;
        let response = self
            .request(Method::HEAD, &url)
            .send()
            .await
            .map_err(|e| network_error(format!("HEAD {}", url), e))?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                tracing::debug!(url = %url, status = %status, "WebDAV HEAD inconclusive, probing with range GET");
                self.probe_with_range(&url).await
            }
        }
    }

    async fn read_file(&self, key: &str) -> StorageResult<ByteStream> {
        let url = self.object_url(key)?;
        let response = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(|e| network_error(format!("GET {}", url), e))?;
        if !response.status().is_success() {
            return Err(status_error(format!("GET {}", url), response).await);
        }
        Ok(body_stream(response))
    }

    fn public_url(&self, key: &str) -> String {
        self.direct.url(key)
    }

    async fn health_check(&self) -> StorageResult<()> {
        let url = format!("{}/", self.base);
        let response = self
            .request(webdav_method("PROPFIND")?, &url)
            .header("Depth", "0")
            .send()
            .await
            .map_err(|e| network_error(format!("PROPFIND {}", url), e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(format!("PROPFIND {}", url), response).await)
        }
    }
}
