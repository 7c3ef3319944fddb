//! FTP / FTPS adapter.
//!
//! Speaks the control-channel protocol directly (see [`session`]). Every
//! operation opens a fresh session and quits at the end; there is no pooling.
//! Cancellation is only observed between protocol exchanges.

pub mod protocol;
pub mod session;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use stowage_core::{
    BackendType, Capabilities, ChannelConfig, ObjectAcl, StorageError, StorageResult,
    STANDARD_IMAGE_FORMATS,
};
use tokio_util::io::ReaderStream;

use crate::keys::validate_key;
use crate::traits::{AdapterContext, ByteStream, StorageAdapter};
use crate::url_policy::DirectUrl;

pub use session::{FtpConnectOptions, FtpSession, TlsMode};

const CAPABILITIES: Capabilities = Capabilities {
    supports_signed_url: false,
    supports_cdn: true,
    supports_resize: false,
    supports_acl: false,
    max_file_size: 0,
    supported_formats: STANDARD_IMAGE_FORMATS,
};

pub struct FtpStorage {
    options: FtpConnectOptions,
    root_path: String,
    create_dirs: bool,
    access: ObjectAcl,
    direct: DirectUrl,
    ctx: AdapterContext,
}

impl FtpStorage {
    /// Required keys: `host`, `username`, `password`.
    ///
    /// The `ftps` tag defaults to explicit TLS; `tls_mode` overrides it for
    /// either tag.
    pub async fn new(tag: &str, config: &ChannelConfig, ctx: AdapterContext) -> StorageResult<Self> {
        config.require(&["host", "username", "password"])?;

        let tls_mode = match config.get("tls_mode") {
            Some(mode) => TlsMode::parse(mode)?,
            None if tag.eq_ignore_ascii_case("ftps") => TlsMode::Explicit,
            None => TlsMode::None,
        };
        let host = config.required("host")?;
        let port = config
            .get_parsed::<u16>("port")?
            .unwrap_or_else(|| tls_mode.default_port());

        let root_path = format!("/{}", config.get_or("root_path", "").trim_matches('/'));
        let root_path = root_path.trim_end_matches('/').to_string();

        let direct = match config.get("custom_domain") {
            Some(domain) => DirectUrl::new(Some(domain), "", config.get_bool("use_https", true)),
            None => {
                let scheme = if tls_mode == TlsMode::None { "ftp" } else { "ftps" };
                DirectUrl::from_base(format!("{}://{}:{}{}", scheme, host, port, root_path))
            }
        };

        let options = FtpConnectOptions {
            server_name: config.get_or("server_name", &host).to_string(),
            host,
            port,
            username: config.required("username")?,
            password: config.required("password")?,
            tls_mode,
            tls_skip_verify: config.get_bool("tls_skip_verify", false),
            connect_timeout: ctx.settings.connect_timeout,
            pasv_host_override: config.get_bool("pasv_host_override", true),
        };

        Ok(FtpStorage {
            options,
            root_path,
            create_dirs: config.get_bool("mkdir", true),
            access: config
                .get_parsed::<ObjectAcl>("access_control")?
                .unwrap_or_default(),
            direct,
            ctx,
        })
    }

    fn remote_path(&self, key: &str) -> StorageResult<String> {
        validate_key(key)?;
        Ok(format!("{}/{}", self.root_path, key))
    }

    async fn session(&self) -> StorageResult<FtpSession> {
        FtpSession::connect(&self.options).await.map_err(|e| {
            tracing::error!(
                error = %e,
                host = %self.options.host,
                port = self.options.port,
                "FTP connection failed"
            );
            e
        })
    }
}

#[async_trait]
impl StorageAdapter for FtpStorage {
    fn backend_type(&self) -> BackendType {
        BackendType::Ftp
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

    async fn put_object(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        let path = self.remote_path(key)?;
        let start = std::time::Instant::now();
        let mut session = self.session().await?;

        let result = async {
            if self.create_dirs {
                if let Some((parent, _)) = path.rsplit_once('/') {
                    session.mkdir_all(parent).await?;
                }
            }
            session.store(&path, &data).await
        }
        .await;
        session.quit().await;

        match &result {
            Ok(()) => tracing::info!(
                host = %self.options.host,
                path = %path,
                size_bytes = data.len(),
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "FTP upload successful"
            ),
            Err(e) => tracing::error!(error = %e, path = %path, "FTP upload failed"),
        }
        result
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.remote_path(key)?;
        let mut session = self.session().await?;
        let result = session.delete(&path).await;
        session.quit().await;
        result
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.remote_path(key)?;
        let mut session = self.session().await?;
        let result = session.size(&path).await;
        session.quit().await;
        Ok(result?.is_some())
    }

    async fn read_file(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.remote_path(key)?;
        let mut session = self.session().await?;
        let data = match session.retrieve(&path).await {
            Ok(data) => data,
            Err(e) => {
                session.quit().await;
                return Err(e);
            }
        };

        // The control session rides along with the body and is closed once
        // the data connection reaches EOF.
        let body = ReaderStream::new(data);
        let stream = futures::stream::unfold(Some((body, session)), |state| async move {
            let (mut body, mut session) = state?;
            match body.next().await {
                Some(Ok(chunk)) => Some((Ok(chunk), Some((body, session)))),
                Some(Err(e)) => {
                    drop(body);
                    session.quit().await;
                    let err = StorageError::network("FTP data transfer failed").with_source(e);
                    Some((Err(err), None))
                }
                None => {
                    drop(body);
                    let finished = session.finish_transfer("RETR").await;
                    session.quit().await;
                    finished.err().map(|e| (Err(e), None))
                }
            }
        });
        Ok(Box::pin(stream))
    }

    fn public_url(&self, key: &str) -> String {
        self.direct.url(key)
    }

    async fn health_check(&self) -> StorageResult<()> {
        let mut session = self.session().await?;
        let result = session.noop().await;
        session.quit().await;
        result
    }
}
