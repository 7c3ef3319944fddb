//! FTP control-channel primitives: reply reading and PASV parsing.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use stowage_core::{StorageError, StorageResult};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Longest reply line accepted before the server is considered broken.
const MAX_REPLY_LINE: usize = 8 * 1024;

/// One complete (possibly multi-line) server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpReply {
    pub code: u16,
    /// Reply text, lines joined with `\n`, code prefixes kept.
    pub message: String,
}

impl FtpReply {
    pub fn is_positive_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_positive_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_positive_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    /// Error for an unexpected reply to `command`.
    pub fn into_error(self, command: &str) -> StorageError {
        let message = format!("FTP {} failed: {} {}", command, self.code, self.text());
        match self.code {
            421 | 425 | 426 => StorageError::network(message),
            450 | 550 => StorageError::not_found(message),
            530 | 532 => StorageError::permission(message),
            452 | 552 => StorageError::quota_exceeded(message),
            501 | 553 => StorageError::invalid_format(message),
            _ => StorageError::internal(message),
        }
    }

    /// Reply text of the first line without the code.
    pub fn text(&self) -> &str {
        let first = self.message.lines().next().unwrap_or_default();
        first.get(4..).unwrap_or_default().trim()
    }
}

fn parse_code(line: &str) -> Option<u16> {
    let code = line.get(..3)?;
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    code.parse().ok()
}

async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> StorageResult<String> {
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .await
        .map_err(|e| StorageError::network("FTP control connection read failed").with_source(e))?;
    if read == 0 {
        return Err(StorageError::network("FTP control connection closed"));
    }
    if line.len() > MAX_REPLY_LINE {
        return Err(StorageError::network("FTP reply line too long"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Read one reply. A `123-` first line opens a multi-line reply that ends at
/// the first line starting with `123 `.
pub async fn read_reply<R: AsyncBufRead + Unpin>(reader: &mut R) -> StorageResult<FtpReply> {
    let first = read_line(reader).await?;
    let code = parse_code(&first)
        .ok_or_else(|| StorageError::network(format!("malformed FTP reply: {}", first)))?;

    let mut message = first.clone();
    if first.as_bytes().get(3) == Some(&b'-') {
        let terminator = format!("{} ", code);
        loop {
            let line = read_line(reader).await?;
            message.push('\n');
            message.push_str(&line);
            if line.starts_with(&terminator) {
                break;
            }
        }
    }

    Ok(FtpReply { code, message })
}

/// Parse the address out of a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
pub fn parse_pasv(reply: &str) -> StorageResult<SocketAddr> {
    let invalid = || StorageError::network(format!("malformed PASV reply: {}", reply));

    let start = reply.find('(').ok_or_else(invalid)?;
    let end = reply[start..].find(')').map(|i| start + i).ok_or_else(invalid)?;
    let numbers: Vec<u8> = reply[start + 1..end]
        .split(',')
        .map(|n| n.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| invalid())?;
    if numbers.len() != 6 {
        return Err(invalid());
    }

    let ip = Ipv4Addr::new(numbers[0], numbers[1], numbers[2], numbers[3]);
    let port = u16::from(numbers[4]) * 256 + u16::from(numbers[5]);
    Ok(SocketAddr::new(IpAddr::V4(ip), port))
}

/// Whether a PASV address should be replaced by the control peer's address.
pub fn is_unroutable(addr: &SocketAddr) -> bool {
    match addr.ip() {
        IpAddr::V4(ip) => ip.is_private() || ip.is_unspecified() || ip.is_link_local(),
        IpAddr::V6(ip) => ip.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pasv() {
        let addr = parse_pasv("227 Entering Passive Mode (192,168,1,5,117,20).").unwrap();
        assert_eq!(addr.ip().to_string(), "192.168.1.5");
        assert_eq!(addr.port(), 117 * 256 + 20);
        assert_eq!(addr.port(), 29972);
    }

    #[test]
    fn test_parse_pasv_rejects_garbage() {
        assert!(parse_pasv("227 Entering Passive Mode").is_err());
        assert!(parse_pasv("227 (1,2,3,4,5)").is_err());
        assert!(parse_pasv("227 (1,2,3,4,5,300)").is_err());
    }

    #[test]
    fn test_unroutable_detection() {
        assert!(is_unroutable(&"10.0.0.2:21".parse().unwrap()));
        assert!(is_unroutable(&"0.0.0.0:21".parse().unwrap()));
        assert!(!is_unroutable(&"93.184.216.34:21".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_single_line_reply() {
        let mut input: &[u8] = b"220 Service ready\r\n";
        let reply = read_reply(&mut input).await.unwrap();
        assert_eq!(reply.code, 220);
        assert_eq!(reply.text(), "Service ready");
        assert!(reply.is_positive_completion());
    }

    #[tokio::test]
    async fn test_multi_line_reply_ends_at_code_space() {
        let mut input: &[u8] =
            b"211-Features:\r\n UTF8\r\n211-still going\r\n211 End\r\n200 next\r\n";
        let reply = read_reply(&mut input).await.unwrap();
        assert_eq!(reply.code, 211);
        assert_eq!(reply.message.lines().count(), 4);
        let next = read_reply(&mut input).await.unwrap();
        assert_eq!(next.code, 200);
    }

    #[tokio::test]
    async fn test_closed_connection_is_network_error() {
        let mut input: &[u8] = b"";
        assert!(read_reply(&mut input).await.unwrap_err().is_network());
    }

    #[test]
    fn test_reply_error_categories() {
        let reply = |code| FtpReply {
            code,
            message: format!("{} x", code),
        };
        assert!(reply(550).into_error("RETR").is_not_found());
        assert!(reply(530).into_error("PASS").is_permission());
        assert!(reply(552).into_error("STOR").is_quota_exceeded());
        assert!(reply(425).into_error("STOR").is_network());
    }
}
