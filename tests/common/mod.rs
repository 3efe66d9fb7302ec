//! Scripted HTTP server for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier::http::parser::{ParseError, RequestHead, parse_request_head};
use courier::{Config, Service};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What the server does with one request.
pub enum Reply {
    /// Write the bytes, then close the socket.
    Close(Vec<u8>),
    /// Write the bytes and wait for the next request on the same socket.
    KeepAlive(Vec<u8>),
    /// Never answer.
    Hang,
}

type Handler = dyn Fn(&RequestHead, usize) -> Reply + Send + Sync;

pub struct TestServer {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RequestHead>>>,
}

impl TestServer {
    /// Bind to an ephemeral port on 127.0.0.1. `handler` receives each
    /// request and its index across all sockets.
    pub async fn start<F>(handler: F) -> Self
    where
        F: Fn(&RequestHead, usize) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let counter = accepted.clone();
        let log = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, handler.clone(), log.clone()));
            }
        });

        Self {
            addr,
            accepted,
            requests,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Same server addressed through `localhost` instead of the IP.
    pub fn localhost_url(&self, path: &str) -> String {
        format!("http://localhost:{}{}", self.addr.port(), path)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RequestHead> {
        self.requests.lock().unwrap().clone()
    }
}

async fn serve(mut socket: TcpStream, handler: Arc<Handler>, log: Arc<Mutex<Vec<RequestHead>>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let (request, used) = loop {
            match parse_request_head(&buf) {
                Ok(parsed) => break parsed,
                Err(ParseError::Incomplete) => {}
                Err(_) => return,
            }
            match socket.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
            }
        };
        buf.drain(..used);

        let index = {
            let mut log = log.lock().unwrap();
            log.push(request.clone());
            log.len() - 1
        };

        match handler(&request, index) {
            Reply::Close(bytes) => {
                let _ = socket.write_all(&bytes).await;
                let _ = socket.shutdown().await;
                return;
            }
            Reply::KeepAlive(bytes) => {
                if socket.write_all(&bytes).await.is_err() {
                    return;
                }
            }
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return;
            }
        }
    }
}

/// A complete response with a `Content-Length` body.
pub fn response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {status}\r\n");
    for (name, value) in headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    let mut bytes = out.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

pub fn ok(body: &str) -> Vec<u8> {
    response("200 OK", &[], body.as_bytes())
}

pub fn redirect(status: &str, location: &str) -> Vec<u8> {
    response(status, &[("Location", location)], b"")
}

/// Service on the test runtime with short retention so expiry is observable.
pub fn service() -> Service {
    let mut config = Config::default();
    config.dispose_interval_ms = 20;
    config.request.timeout_secs = 5;
    config.request.store_timeout_secs = 1;
    Service::current(config).unwrap()
}
