//! Fake devices for tests: a remote-control port and a REST server, both on
//! loopback, recording what they receive.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::device_control::DeviceEndpoint;

/// How the fake remote-control port answers each command
#[derive(Debug, Clone, Copy)]
pub enum RemoteBehavior {
    /// Reply with a vendor acknowledgement
    Ack,
    /// Read the command and never answer
    Silent,
    /// Reply with the given text
    Reply(&'static str),
    /// Read the command then close without answering
    CloseImmediately,
    /// Acknowledge everything except the nth command (1-based), which gets `ERROR`
    FailOn(usize),
}

pub struct FakeRemotePort {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    accepted: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl FakeRemotePort {
    pub async fn start(behavior: RemoteBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicUsize::new(0));

        let handle = {
            let received = received.clone();
            let accepted = accepted.clone();
            let open = open.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    open.fetch_add(1, Ordering::SeqCst);
                    let received = received.clone();
                    let open = open.clone();
                    tokio::spawn(async move {
                        Self::serve(stream, behavior, received).await;
                        open.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        };

        Self {
            addr,
            received,
            accepted,
            open,
            handle,
        }
    }

    async fn serve(stream: TcpStream, behavior: RemoteBehavior, received: Arc<Mutex<Vec<String>>>) {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }

        let nth = {
            let mut received = received.lock().await;
            received.push(line.trim_end().to_string());
            received.len()
        };

        let reply: Option<&str> = match behavior {
            RemoteBehavior::Ack => Some("SKY 000.001\n"),
            RemoteBehavior::Silent => None,
            RemoteBehavior::Reply(text) => Some(text),
            RemoteBehavior::CloseImmediately => return,
            RemoteBehavior::FailOn(n) if n == nth => Some("ERROR"),
            RemoteBehavior::FailOn(_) => Some("SKY 000.001\n"),
        };

        if let Some(reply) = reply {
            let _ = write_half.write_all(reply.as_bytes()).await;
        }

        // Hold the connection until the client closes it
        let mut sink = [0u8; 64];
        while let Ok(n) = reader.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn received(&self) -> Vec<String> {
        self.received.lock().await.clone()
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Wait for server-side connection tasks to observe client closes
    pub async fn wait_until_idle(&self, limit: Duration) {
        let start = Instant::now();
        while self.open_connections() > 0 && start.elapsed() < limit {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for FakeRemotePort {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A loopback port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

/// Minimal HTTP/1.1 server answering fixed routes with JSON bodies
pub struct FakeRestServer {
    addr: SocketAddr,
    routes: Arc<Mutex<HashMap<String, (u16, String)>>>,
    requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl FakeRestServer {
    pub async fn start(routes: &[(&str, u16, &str)]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes = Arc::new(Mutex::new(
            routes
                .iter()
                .map(|(path, status, body)| (path.to_string(), (*status, body.to_string())))
                .collect::<HashMap<_, _>>(),
        ));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let routes = routes.clone();
            let requests = requests.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let routes = routes.clone();
                    let requests = requests.clone();
                    tokio::spawn(async move {
                        Self::serve(stream, routes, requests).await;
                    });
                }
            })
        };

        Self {
            addr,
            routes,
            requests,
            handle,
        }
    }

    /// Serves a device-info payload with the given standby flag and a
    /// two-channel service list
    pub async fn skyq(standby: bool) -> Self {
        let info = system_information(standby);
        Self::start(&[
            ("/as/system/information", 200, info.as_str()),
            ("/as/services", 200, SERVICES_JSON),
        ])
        .await
    }

    async fn serve(
        mut stream: TcpStream,
        routes: Arc<Mutex<HashMap<String, (u16, String)>>>,
        requests: Arc<Mutex<Vec<String>>>,
    ) {
        let mut head = Vec::new();
        let mut buf = [0u8; 1024];
        while !head.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => head.extend_from_slice(&buf[..n]),
            }
        }

        let head = String::from_utf8_lossy(&head);
        let path = head
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or("/")
            .to_string();
        requests.lock().await.push(path.clone());

        let (status, body) = routes
            .lock()
            .await
            .get(&path)
            .cloned()
            .unwrap_or((404, "{}".to_string()));

        let response = format!(
            "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub async fn set_route(&self, path: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .await
            .insert(path.to_string(), (status, body.to_string()));
    }

    pub async fn set_standby(&self, standby: bool) {
        let info = system_information(standby);
        self.set_route("/as/system/information", 200, &info).await;
    }

    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }

    pub async fn request_count(&self, path: &str) -> usize {
        self.requests.lock().await.iter().filter(|p| *p == path).count()
    }
}

impl Drop for FakeRestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub const SERVICES_JSON: &str = r#"{
    "documentId": "42",
    "services": [
        {"sid": "2002", "t": "BBC One", "c": "101", "sf": "hd"},
        {"sid": "6000", "t": "ITV1", "c": "103", "sf": "hd"}
    ]
}"#;

pub fn system_information(standby: bool) -> String {
    format!(
        r#"{{"activeStandby": {}, "modelName": "ES240", "deviceName": "Sky Q", "serialNumber": "0123456789", "ASVersion": "Q238"}}"#,
        standby
    )
}

/// Endpoint pointing at a fake REST server and fake remote port
pub fn loopback_endpoint(rest_port: u16, remote_port: u16) -> DeviceEndpoint {
    DeviceEndpoint::new("127.0.0.1", rest_port, remote_port)
}
