//! One FTP/FTPS control session.
//!
//! A session is opened per logical operation and closed with `QUIT`
//! afterwards; nothing is pooled. The control stream is a single
//! [`FtpStream`] that is upgraded in place after `AUTH TLS`, so reads and
//! writes always go through the same wrapped connection.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use stowage_core::{StorageError, StorageResult};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;
use tokio_native_tls::{TlsConnector, TlsStream};

use super::protocol::{is_unroutable, parse_pasv, read_reply, FtpReply};

/// How TLS is negotiated on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    None,
    /// `AUTH TLS` after the plaintext banner.
    Explicit,
    /// TLS handshake before the banner (port 990).
    Implicit,
}

impl TlsMode {
    pub fn parse(value: &str) -> StorageResult<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "none" | "off" | "false" => Ok(TlsMode::None),
            "explicit" => Ok(TlsMode::Explicit),
            "implicit" => Ok(TlsMode::Implicit),
            other => Err(StorageError::internal(format!("invalid tls_mode: {}", other))),
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            TlsMode::Implicit => 990,
            _ => 21,
        }
    }
}

/// Connection parameters shared by every session of a channel.
#[derive(Debug, Clone)]
pub struct FtpConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub tls_mode: TlsMode,
    pub tls_skip_verify: bool,
    /// SNI / certificate name; defaults to `host`.
    pub server_name: String,
    pub connect_timeout: Duration,
    /// Replace unroutable PASV addresses with the control peer's address.
    pub pasv_host_override: bool,
}

/// Plain or TLS-wrapped TCP stream.
pub enum FtpStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for FtpStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            FtpStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            FtpStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for FtpStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            FtpStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            FtpStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            FtpStream::Plain(s) => Pin::new(s).poll_flush(cx),
            FtpStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            FtpStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            FtpStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

fn tls_connector(skip_verify: bool) -> StorageResult<TlsConnector> {
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(skip_verify)
        .danger_accept_invalid_hostnames(skip_verify)
        .build()
        .map_err(|e| StorageError::internal("failed to build TLS connector").with_source(e))?;
    Ok(TlsConnector::from(connector))
}

async fn dial(addr: impl tokio::net::ToSocketAddrs, timeout: Duration) -> StorageResult<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(StorageError::network("FTP connection failed").with_source(e)),
        Err(_) => Err(StorageError::network(format!(
            "FTP connection timed out after {:?}",
            timeout
        ))),
    }
}

async fn wrap_tls(
    connector: &TlsConnector,
    server_name: &str,
    stream: TcpStream,
) -> StorageResult<FtpStream> {
    let tls = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| StorageError::network("FTP TLS handshake failed").with_source(e))?;
    Ok(FtpStream::Tls(Box::new(tls)))
}

pub struct FtpSession {
    control: BufReader<FtpStream>,
    connector: Option<TlsConnector>,
    server_name: String,
    peer: SocketAddr,
    /// `PROT P` negotiated: data connections are TLS-wrapped too.
    protected: bool,
    pasv_host_override: bool,
    connect_timeout: Duration,
}

impl FtpSession {
    /// Connect, negotiate TLS, log in and switch to binary mode.
    pub async fn connect(options: &FtpConnectOptions) -> StorageResult<Self> {
        let tcp = dial((options.host.as_str(), options.port), options.connect_timeout).await?;
        let peer = tcp
            .peer_addr()
            .map_err(|e| StorageError::network("FTP peer address unavailable").with_source(e))?;

        let connector = match options.tls_mode {
            TlsMode::None => None,
            _ => Some(tls_connector(options.tls_skip_verify)?),
        };

        let stream = match (&connector, options.tls_mode) {
            (Some(connector), TlsMode::Implicit) => {
                wrap_tls(connector, &options.server_name, tcp).await?
            }
            _ => FtpStream::Plain(tcp),
        };

        let mut session = FtpSession {
            control: BufReader::new(stream),
            connector,
            server_name: options.server_name.clone(),
            peer,
            protected: false,
            pasv_host_override: options.pasv_host_override,
            connect_timeout: options.connect_timeout,
        };

        let banner = read_reply(&mut session.control).await?;
        if banner.code != 220 {
            return Err(banner.into_error("connect"));
        }

        if options.tls_mode == TlsMode::Explicit {
            let reply = session.command("AUTH TLS").await?;
            if reply.code != 234 {
                return Err(reply.into_error("AUTH TLS"));
            }
            session = session.upgrade_control().await?;
        }

        session.login(&options.username, &options.password).await?;

        if session.connector.is_some() {
            session.expect("PBSZ 0", |r| r.is_positive_completion()).await?;
            session.expect("PROT P", |r| r.is_positive_completion()).await?;
            session.protected = true;
        }

        session.expect("TYPE I", |r| r.is_positive_completion()).await?;
        Ok(session)
    }

    /// Replace the plaintext control stream with its TLS-wrapped form.
    async fn upgrade_control(mut self) -> StorageResult<Self> {
        let connector = self
            .connector
            .clone()
            .ok_or_else(|| StorageError::internal("TLS upgrade without a connector"))?;
        let tcp = match self.control.into_inner() {
            FtpStream::Plain(tcp) => tcp,
            FtpStream::Tls(_) => {
                return Err(StorageError::internal("FTP control channel is already TLS"))
            }
        };
        self.control = BufReader::new(wrap_tls(&connector, &self.server_name, tcp).await?);
        Ok(self)
    }

    async fn login(&mut self, username: &str, password: &str) -> StorageResult<()> {
        let reply = self.command(&format!("USER {}", username)).await?;
        let reply = if reply.is_positive_intermediate() {
            self.send_line(&format!("PASS {}", password), "PASS ****").await?;
            read_reply(&mut self.control).await?
        } else {
            reply
        };
        if reply.is_positive_completion() {
            Ok(())
        } else {
            Err(reply.into_error("login"))
        }
    }

    async fn send_line(&mut self, line: &str, logged_as: &str) -> StorageResult<()> {
        tracing::trace!(command = %logged_as, "FTP command");
        let stream = self.control.get_mut();
        stream
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .map_err(|e| StorageError::network("FTP control write failed").with_source(e))?;
        stream
            .flush()
            .await
            .map_err(|e| StorageError::network("FTP control flush failed").with_source(e))
    }

    /// Send one command and read its reply.
    pub async fn command(&mut self, command: &str) -> StorageResult<FtpReply> {
        self.send_line(command, command).await?;
        read_reply(&mut self.control).await
    }

    async fn expect(
        &mut self,
        command: &str,
        accept: impl Fn(&FtpReply) -> bool,
    ) -> StorageResult<FtpReply> {
        let reply = self.command(command).await?;
        if accept(&reply) {
            Ok(reply)
        } else {
            Err(reply.into_error(command))
        }
    }

    /// Open a passive data connection for the next transfer.
    async fn open_data(&mut self) -> StorageResult<FtpStream> {
        let reply = self.expect("PASV", |r| r.code == 227).await?;
        let mut addr = parse_pasv(&reply.message)?;
        if self.pasv_host_override && is_unroutable(&addr) && !is_unroutable(&self.peer) {
            addr.set_ip(self.peer.ip());
        }

        let tcp = dial(addr, self.connect_timeout).await?;
        match (&self.connector, self.protected) {
            (Some(connector), true) => wrap_tls(connector, &self.server_name, tcp).await,
            _ => Ok(FtpStream::Plain(tcp)),
        }
    }

    /// Upload `data` to `path`.
    pub async fn store(&mut self, path: &str, data: &[u8]) -> StorageResult<()> {
        let mut data_stream = self.open_data().await?;
        let command = format!("STOR {}", path);
        self.expect(&command, |r| r.is_positive_preliminary()).await?;

        let written = async {
            data_stream.write_all(data).await?;
            data_stream.shutdown().await
        };
        written
            .await
            .map_err(|e| StorageError::network("FTP data transfer failed").with_source(e))?;
        drop(data_stream);

        self.finish_transfer("STOR").await
    }

    /// Start a download; read the returned stream to EOF, then call
    /// [`FtpSession::finish_transfer`].
    pub async fn retrieve(&mut self, path: &str) -> StorageResult<FtpStream> {
        let data_stream = self.open_data().await?;
        let command = format!("RETR {}", path);
        self.expect(&command, |r| r.is_positive_preliminary()).await?;
        Ok(data_stream)
    }

    /// Read the completion reply of a data transfer.
    pub async fn finish_transfer(&mut self, command: &str) -> StorageResult<()> {
        let reply = read_reply(&mut self.control).await?;
        if reply.is_positive_completion() {
            Ok(())
        } else {
            Err(reply.into_error(command))
        }
    }

    /// File size, or `None` when the server reports the file missing.
    pub async fn size(&mut self, path: &str) -> StorageResult<Option<u64>> {
        let reply = self.command(&format!("SIZE {}", path)).await?;
        match reply.code {
            213 => reply
                .text()
                .parse()
                .map(Some)
                .map_err(|_| StorageError::network(format!("malformed SIZE reply: {}", reply.message))),
            550 => Ok(None),
            _ => Err(reply.into_error("SIZE")),
        }
    }

    /// Delete `path`; a missing file is not an error.
    pub async fn delete(&mut self, path: &str) -> StorageResult<()> {
        let reply = self.command(&format!("DELE {}", path)).await?;
        match reply.code {
            250 | 200 | 550 => Ok(()),
            _ => Err(reply.into_error("DELE")),
        }
    }

    /// Create every segment of `dir`, tolerating "already exists" replies.
    pub async fn mkdir_all(&mut self, dir: &str) -> StorageResult<()> {
        let absolute = dir.starts_with('/');
        let mut current = String::new();
        for segment in dir.split('/').filter(|s| !s.is_empty()) {
            if absolute || !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            let reply = self.command(&format!("MKD {}", current)).await?;
            match reply.code {
                257 | 250 | 521 | 550 => {}
                _ => return Err(reply.into_error("MKD")),
            }
        }
        Ok(())
    }

    pub async fn noop(&mut self) -> StorageResult<()> {
        self.expect("NOOP", |r| r.is_positive_completion()).await?;
        Ok(())
    }

    /// Close the session; failures are logged, never returned.
    pub async fn quit(mut self) {
        if let Err(e) = self.command("QUIT").await {
            tracing::debug!(error = %e, "FTP QUIT failed");
        }
        let _ = self.control.get_mut().shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_mode_parse() {
        assert_eq!(TlsMode::parse("Explicit").unwrap(), TlsMode::Explicit);
        assert_eq!(TlsMode::parse("").unwrap(), TlsMode::None);
        assert_eq!(TlsMode::parse("implicit").unwrap().default_port(), 990);
        assert!(TlsMode::parse("sometimes").is_err());
    }
}
