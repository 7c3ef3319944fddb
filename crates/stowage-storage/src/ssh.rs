//! SSH-exec transfer adapter.
//!
//! No file-transfer subsystem is used: each operation authenticates, opens
//! session channels and runs plain shell commands (`mkdir -p`, `cat >`,
//! `cat`, `test -f`, `rm -f`). Works against any host with a POSIX shell.
//! Command execution is only cancelled between awaits.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::{KeyPair, PublicKey};
use stowage_core::{
    BackendType, Capabilities, ChannelConfig, ObjectAcl, StorageError, StorageResult,
    STANDARD_IMAGE_FORMATS,
};

use crate::keys::validate_key;
use crate::traits::{AdapterContext, ByteStream, StorageAdapter};
use crate::url_policy::DirectUrl;

const CAPABILITIES: Capabilities = Capabilities {
    supports_signed_url: false,
    supports_cdn: true,
    supports_resize: false,
    supports_acl: false,
    max_file_size: 0,
    supported_formats: STANDARD_IMAGE_FORMATS,
};

/// Quote one shell argument with single quotes.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

enum Credential {
    Password(String),
    Key(Arc<KeyPair>),
}

/// Client handler; optionally pins the server key by SHA-256 fingerprint.
struct SshClient {
    expected_fingerprint: Option<String>,
}

#[async_trait]
impl client::Handler for SshClient {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        match &self.expected_fingerprint {
            Some(expected) => {
                let actual = server_public_key.fingerprint();
                let matches = actual == *expected;
                if !matches {
                    tracing::error!(expected = %expected, actual = %actual, "SSH host key mismatch");
                }
                Ok(matches)
            }
            None => Ok(true),
        }
    }
}

/// Exit status and captured output of one remote command.
struct CommandOutput {
    exit_status: u32,
    stderr: String,
}

struct SshSession {
    handle: Handle<SshClient>,
}

impl SshSession {
    async fn run(&self, command: &str, stdin: Option<&[u8]>) -> StorageResult<CommandOutput> {
        tracing::trace!(command = %command, "SSH exec");
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| StorageError::network("SSH channel open failed").with_source(e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| StorageError::network("SSH exec failed").with_source(e))?;

        if let Some(input) = stdin {
            channel
                .data(input)
                .await
                .map_err(|e| StorageError::network("SSH stdin write failed").with_source(e))?;
        }
        channel
            .eof()
            .await
            .map_err(|e| StorageError::network("SSH eof failed").with_source(e))?;

        let mut exit_status = None;
        let mut stderr = Vec::new();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::ExtendedData { data, .. } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        let exit_status = exit_status
            .ok_or_else(|| StorageError::network(format!("SSH command ended without status: {}", command)))?;
        Ok(CommandOutput {
            exit_status,
            stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
        })
    }

    async fn close(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            tracing::debug!(error = %e, "SSH disconnect failed");
        }
    }
}

fn command_error(command: &str, output: &CommandOutput) -> StorageError {
    let message = format!(
        "remote command `{}` exited with {}: {}",
        command, output.exit_status, output.stderr
    );
    let stderr = output.stderr.to_lowercase();
    if stderr.contains("no such file") {
        StorageError::not_found(message)
    } else if stderr.contains("permission denied") {
        StorageError::permission(message)
    } else if stderr.contains("no space left") || stderr.contains("quota") {
        StorageError::quota_exceeded(message)
    } else {
        StorageError::internal(message)
    }
}

pub struct SshStorage {
    host: String,
    port: u16,
    username: String,
    credential: Credential,
    expected_fingerprint: Option<String>,
    root_path: String,
    access: ObjectAcl,
    direct: DirectUrl,
    ctx: AdapterContext,
}

impl SshStorage {
    /// Required keys: `host`, `username`, and one of `password` /
    /// `private_key` (PEM or OpenSSH text, optionally encrypted with
    /// `passphrase`).
    pub async fn new(config: &ChannelConfig, ctx: AdapterContext) -> StorageResult<Self> {
        config.require(&["host", "username"])?;

        let credential = match (config.get("private_key"), config.get("password")) {
            (Some(key), _) => {
                let pair = russh_keys::decode_secret_key(key, config.get("passphrase"))
                    .map_err(|e| StorageError::internal("invalid SSH private key").with_source(e))?;
                Credential::Key(Arc::new(pair))
            }
            (None, Some(password)) => Credential::Password(password.to_string()),
            (None, None) => {
                return Err(StorageError::internal(
                    "missing required config keys: password or private_key",
                ))
            }
        };

        let host = config.required("host")?;
        let port = config.get_parsed::<u16>("port")?.unwrap_or(22);
        let root_path = format!("/{}", config.get_or("root_path", "").trim_matches('/'));
        let root_path = root_path.trim_end_matches('/').to_string();

        let direct = match config.get("custom_domain") {
            Some(domain) => DirectUrl::new(Some(domain), "", config.get_bool("use_https", true)),
            None => DirectUrl::from_base(format!("sftp://{}:{}{}", host, port, root_path)),
        };

        Ok(SshStorage {
            host,
            port,
            username: config.required("username")?,
            credential,
            expected_fingerprint: config
                .get("host_key_fingerprint")
                .map(|f| f.trim_start_matches("SHA256:").to_string()),
            root_path,
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

    async fn connect(&self) -> StorageResult<SshSession> {
        let config = Arc::new(client::Config::default());
        let handler = SshClient {
            expected_fingerprint: self.expected_fingerprint.clone(),
        };
        let timeout = self.ctx.settings.connect_timeout;

        let mut handle = tokio::time::timeout(
            timeout,
            client::connect(config, (self.host.as_str(), self.port), handler),
        )
        .await
        .map_err(|_| StorageError::network(format!("SSH connection timed out after {:?}", timeout)))?
        .map_err(|e| {
            tracing::error!(error = %e, host = %self.host, port = self.port, "SSH connection failed");
            StorageError::network("SSH connection failed").with_source(e)
        })?;

        let authenticated = match &self.credential {
            Credential::Password(password) => {
                handle.authenticate_password(&self.username, password).await
            }
            Credential::Key(pair) => {
                handle
                    .authenticate_publickey(&self.username, pair.clone())
                    .await
            }
        }
        .map_err(|e| StorageError::network("SSH authentication failed").with_source(e))?;

        if !authenticated {
            return Err(StorageError::permission(format!(
                "SSH authentication rejected for {}",
                self.username
            )));
        }
        Ok(SshSession { handle })
    }
}

#[async_trait]
impl StorageAdapter for SshStorage {
    fn backend_type(&self) -> BackendType {
        BackendType::Ssh
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
        let session = self.connect().await?;

        let result = async {
            if let Some((parent, _)) = path.rsplit_once('/').filter(|(p, _)| !p.is_empty()) {
                let mkdir = format!("mkdir -p {}", shell_quote(parent));
                let output = session.run(&mkdir, None).await?;
                if output.exit_status != 0 {
                    return Err(command_error(&mkdir, &output));
                }
            }
            let write = format!("cat > {}", shell_quote(&path));
            let output = session.run(&write, Some(&data)).await?;
            if output.exit_status != 0 {
                return Err(command_error(&write, &output));
            }
            Ok(())
        }
        .await;
        session.close().await;

        match &result {
            Ok(()) => tracing::info!(
                host = %self.host,
                path = %path,
                size_bytes = data.len(),
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "SSH upload successful"
            ),
            Err(e) => tracing::error!(error = %e, path = %path, "SSH upload failed"),
        }
        result
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.remote_path(key)?;
        let session = self.connect().await?;
        let command = format!("rm -f {}", shell_quote(&path));
        let output = session.run(&command, None).await;
        session.close().await;
        let output = output?;
        if output.exit_status != 0 {
            return Err(command_error(&command, &output));
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.remote_path(key)?;
        let session = self.connect().await?;
        let command = format!("test -f {}", shell_quote(&path));
        let output = session.run(&command, None).await;
        session.close().await;
        let output = output?;
        match output.exit_status {
            0 => Ok(true),
            1 => Ok(false),
            _ => Err(command_error(&command, &output)),
        }
    }

    async fn read_file(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.remote_path(key)?;
        let session = self.connect().await?;
        let command = format!("cat {}", shell_quote(&path));

        let mut channel = match session.handle.channel_open_session().await {
            Ok(channel) => channel,
            Err(e) => {
                session.close().await;
                return Err(StorageError::network("SSH channel open failed").with_source(e));
            }
        };
        if let Err(e) = channel.exec(true, command.as_str()).await {
            session.close().await;
            return Err(StorageError::network("SSH exec failed").with_source(e));
        }

        // Wait for the first chunk so a missing file surfaces as an error
        // instead of an empty body.
        let mut stderr = Vec::new();
        let first = loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => break Some(Bytes::copy_from_slice(&data)),
                Some(ChannelMsg::ExtendedData { data, .. }) => stderr.extend_from_slice(&data),
                Some(ChannelMsg::ExitStatus { exit_status }) if exit_status != 0 => {
                    session.close().await;
                    let output = CommandOutput {
                        exit_status,
                        stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
                    };
                    return Err(match command_error(&command, &output) {
                        err if err.is_internal() => StorageError::not_found(format!(
                            "file not found: {} ({})",
                            key, output.stderr
                        )),
                        err => err,
                    });
                }
                Some(_) => {}
                None => break None,
            }
        };

        let Some(first) = first else {
            session.close().await;
            return Ok(Box::pin(futures::stream::empty::<StorageResult<Bytes>>()));
        };

        let rest = futures::stream::unfold(Some((channel, session)), |state| async move {
            let (mut channel, session) = state?;
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => {
                        return Some((Ok(Bytes::copy_from_slice(&data)), Some((channel, session))))
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) if exit_status != 0 => {
                        session.close().await;
                        let err = StorageError::network(format!(
                            "remote cat exited with {} mid-stream",
                            exit_status
                        ));
                        return Some((Err(err), None));
                    }
                    Some(_) => {}
                    None => {
                        session.close().await;
                        return None;
                    }
                }
            }
        });

        Ok(Box::pin(futures::stream::once(async move { Ok(first) }).chain(rest)))
    }

    fn public_url(&self, key: &str) -> String {
        self.direct.url(key)
    }

    async fn health_check(&self) -> StorageResult<()> {
        let session = self.connect().await?;
        let output = session.run("true", None).await;
        session.close().await;
        let output = output?;
        if output.exit_status != 0 {
            return Err(command_error("true", &output));
        }
        Ok(())
    }
}
