//! In-process HTTP/1.1 object server for the REST adapters.
//!
//! Objects are stored by request path (query stripped). One request per
//! connection; every response carries `Connection: close`.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    /// Path including the query string.
    pub target: String,
    /// Lowercased header names.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }
}

#[derive(Default)]
struct State {
    objects: HashMap<String, Vec<u8>>,
    collections: HashSet<String>,
    requests: Vec<RecordedRequest>,
    /// Status forced onto every response.
    forced_status: Option<u16>,
    /// Status returned for HEAD instead of the object lookup.
    head_status: Option<u16>,
}

#[derive(Clone)]
pub struct FakeHttpServer {
    pub addr: SocketAddr,
    state: Arc<Mutex<State>>,
}

impl FakeHttpServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake HTTP");
        let server = FakeHttpServer {
            addr: listener.local_addr().expect("local addr"),
            state: Arc::default(),
        };

        let accept = server.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let handler = accept.clone();
                tokio::spawn(async move {
                    let _ = handler.handle(socket).await;
                });
            }
        });
        server
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().objects.get(path).cloned()
    }

    pub fn put_object(&self, path: &str, data: &[u8]) {
        self.state.lock().unwrap().objects.insert(path.to_string(), data.to_vec());
    }

    pub fn has_collection(&self, path: &str) -> bool {
        self.state.lock().unwrap().collections.contains(path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Answer every request with `status` and an error body.
    pub fn force_status(&self, status: u16) {
        self.state.lock().unwrap().forced_status = Some(status);
    }

    /// Answer HEAD requests with `status` regardless of the object.
    pub fn head_status(&self, status: u16) {
        self.state.lock().unwrap().head_status = Some(status);
    }

    async fn handle(self, socket: TcpStream) -> std::io::Result<()> {
        let mut reader = BufReader::new(socket);

        let mut request_line = String::new();
        reader.read_line(&mut request_line).await?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default().to_string();
        let target = parts.next().unwrap_or_default().to_string();

        let mut headers = HashMap::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                break;
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_lowercase(), value.trim().to_string());
            }
        }

        let length: usize = headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await?;

        let request = RecordedRequest {
            method,
            target,
            headers,
            body,
        };
        let (status, response_body, content_length) = self.respond(&request);
        self.state.lock().unwrap().requests.push(request);

        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            reason(status),
            content_length
        );
        let mut socket = reader.into_inner();
        socket.write_all(head.as_bytes()).await?;
        socket.write_all(&response_body).await?;
        socket.flush().await?;
        socket.shutdown().await
    }

    /// Status, body and advertised length for `request`.
    fn respond(&self, request: &RecordedRequest) -> (u16, Vec<u8>, usize) {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.forced_status {
            let body = b"<Error><Code>Forced</Code></Error>".to_vec();
            let len = body.len();
            return (status, body, len);
        }

        let path = request.path().to_string();
        let empty = |status: u16| (status, Vec::new(), 0);

        match request.method.as_str() {
            "PUT" => {
                state.objects.insert(path, request.body.clone());
                empty(201)
            }
            "MKCOL" => {
                if state.collections.insert(path) {
                    empty(201)
                } else {
                    empty(405)
                }
            }
            "PROPFIND" => empty(207),
            "DELETE" => match state.objects.remove(&path) {
                Some(_) => empty(204),
                None => empty(404),
            },
            "HEAD" => {
                if let Some(status) = state.head_status {
                    return empty(status);
                }
                match state.objects.get(&path) {
                    Some(body) => (200, Vec::new(), body.len()),
                    None => empty(404),
                }
            }
            "GET" if path.ends_with('/') || request.target.contains("comp=list") => {
                let body = b"<EnumerationResults/>".to_vec();
                let len = body.len();
                (200, body, len)
            }
            "GET" => match state.objects.get(&path) {
                Some(body) if request.header("range") == Some("bytes=0-0") => {
                    if body.is_empty() {
                        empty(416)
                    } else {
                        (206, body[..1].to_vec(), 1)
                    }
                }
                Some(body) => (200, body.clone(), body.len()),
                None => empty(404),
            },
            _ => empty(405),
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        416 => "Range Not Satisfiable",
        507 => "Insufficient Storage",
        _ => "Status",
    }
}
