//! In-process FTP server speaking just enough of RFC 959 for the adapter:
//! login, `TYPE`, `PASV`, `STOR`, `RETR`, `SIZE`, `DELE`, `MKD`, `NOOP`, `QUIT`.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Default)]
struct State {
    files: HashMap<String, Vec<u8>>,
    dirs: HashSet<String>,
    commands: Vec<String>,
}

#[derive(Clone)]
pub struct FakeFtpServer {
    pub addr: SocketAddr,
    password: Arc<str>,
    state: Arc<Mutex<State>>,
}

impl FakeFtpServer {
    /// Start a server accepting any user with `password`.
    pub async fn start(password: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake FTP");
        let server = FakeFtpServer {
            addr: listener.local_addr().expect("local addr"),
            password: Arc::from(password),
            state: Arc::default(),
        };

        let accept = server.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let session = accept.clone();
                tokio::spawn(async move { session.serve(socket).await });
            }
        });
        server
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn put_file(&self, path: &str, data: &[u8]) {
        self.state.lock().unwrap().files.insert(path.to_string(), data.to_vec());
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.state.lock().unwrap().dirs.contains(path)
    }

    /// Every command received, in order, across all sessions.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    async fn serve(self, socket: TcpStream) {
        let (read, mut write) = socket.into_split();
        let mut lines = BufReader::new(read).lines();
        let mut passive: Option<TcpListener> = None;

        if reply(&mut write, "220 fake ftp ready").await.is_err() {
            return;
        }

        while let Ok(Some(line)) = lines.next_line().await {
            let (verb, arg) = match line.split_once(' ') {
                Some((verb, arg)) => (verb.to_uppercase(), arg.to_string()),
                None => (line.to_uppercase(), String::new()),
            };
            self.state.lock().unwrap().commands.push(verb.clone());

            let response = match verb.as_str() {
                "USER" => "331 password required".to_string(),
                "PASS" if arg == *self.password => "230 logged in".to_string(),
                "PASS" => "530 login incorrect".to_string(),
                "TYPE" => "200 type set".to_string(),
                "NOOP" => "200 ok".to_string(),
                "PASV" => {
                    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind data");
                    let port = listener.local_addr().expect("data addr").port();
                    passive = Some(listener);
                    format!("227 Entering Passive Mode (127,0,0,1,{},{})", port / 256, port % 256)
                }
                "STOR" => {
                    let Some(listener) = passive.take() else {
                        let _ = reply(&mut write, "425 use PASV first").await;
                        continue;
                    };
                    if reply(&mut write, "150 ok to send data").await.is_err() {
                        return;
                    }
                    let (mut data, _) = listener.accept().await.expect("data accept");
                    let mut body = Vec::new();
                    data.read_to_end(&mut body).await.expect("data read");
                    self.state.lock().unwrap().files.insert(arg, body);
                    "226 transfer complete".to_string()
                }
                "RETR" => {
                    let Some(listener) = passive.take() else {
                        let _ = reply(&mut write, "425 use PASV first").await;
                        continue;
                    };
                    let Some(body) = self.file(&arg) else {
                        let _ = reply(&mut write, "550 no such file").await;
                        continue;
                    };
                    if reply(&mut write, "150 opening data connection").await.is_err() {
                        return;
                    }
                    let (mut data, _) = listener.accept().await.expect("data accept");
                    data.write_all(&body).await.expect("data write");
                    data.shutdown().await.expect("data shutdown");
                    "226 transfer complete".to_string()
                }
                "SIZE" => match self.file(&arg) {
                    Some(body) => format!("213 {}", body.len()),
                    None => "550 no such file".to_string(),
                },
                "DELE" => {
                    let removed = self.state.lock().unwrap().files.remove(&arg);
                    match removed {
                        Some(_) => "250 deleted".to_string(),
                        None => "550 no such file".to_string(),
                    }
                }
                "MKD" => {
                    if self.state.lock().unwrap().dirs.insert(arg.clone()) {
                        format!("257 \"{}\" created", arg)
                    } else {
                        "550 directory exists".to_string()
                    }
                }
                "QUIT" => {
                    let _ = reply(&mut write, "221 bye").await;
                    return;
                }
                _ => "502 command not implemented".to_string(),
            };

            if reply(&mut write, &response).await.is_err() {
                return;
            }
        }
    }
}

async fn reply(write: &mut tokio::net::tcp::OwnedWriteHalf, line: &str) -> std::io::Result<()> {
    write.write_all(format!("{}\r\n", line).as_bytes()).await?;
    write.flush().await
}
