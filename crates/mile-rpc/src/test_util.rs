//! Shared test helpers for `mile-rpc` unit tests.
//!
//! [`MockNode`] is an in-process node: a Tokio `TcpListener` that speaks
//! just enough HTTP/1.1 to answer each request with whatever the test's
//! responder returns. [`RecordingHandler`] captures everything reported to
//! a [`FailureHandler`] so tests can assert on it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use http::StatusCode;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::error::{Error, ErrorKind, ResponseFailure};
use crate::handler::FailureHandler;

// ==============================================================================
// Mock Replies
// ==============================================================================

pub(crate) struct MockReply {
    status: StatusCode,
    body: String,
    close: bool,
    silent: bool,
}

impl MockReply {
    /// 200 OK with a JSON-RPC document whose `result` is `value`.
    pub(crate) fn result(value: Value) -> Self {
        Self::json(
            StatusCode::OK,
            json!({ "jsonrpc": "2.0", "id": 0, "result": value }),
        )
    }

    pub(crate) fn json(status: StatusCode, document: Value) -> Self {
        Self::raw(status, document.to_string())
    }

    pub(crate) fn raw(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            close: false,
            silent: false,
        }
    }

    /// Read the request, then never answer.
    pub(crate) fn silence() -> Self {
        Self {
            silent: true,
            ..Self::raw(StatusCode::OK, "")
        }
    }

    /// Send `Connection: close` and hang up after the response.
    pub(crate) fn closing(mut self) -> Self {
        self.close = true;
        self
    }
}

type Responder = dyn Fn(&Value) -> MockReply + Send + Sync;

#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub(crate) head: String,
    pub(crate) body: Value,
}

// ==============================================================================
// Mock Node
// ==============================================================================

pub(crate) struct MockNode {
    addr: SocketAddr,
    recorded: Arc<Mutex<Vec<Recorded>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockNode {
    /// Serve every request with `responder`, which sees the decoded JSON
    /// body (`Value::Null` when the body is not JSON).
    pub(crate) async fn start<F>(responder: F) -> Self
    where
        F: Fn(&Value) -> MockReply + Send + Sync + 'static,
    {
        Self::spawn(Some(Arc::new(responder))).await
    }

    /// Accept connections but never read from or write to them.
    pub(crate) async fn silent() -> Self {
        Self::spawn(None).await
    }

    async fn spawn(responder: Option<Arc<Responder>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock node");
        let addr = listener.local_addr().expect("mock node address");
        let recorded = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let recorded = recorded.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                let mut parked = Vec::new();
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    match &responder {
                        Some(responder) => {
                            tokio::spawn(serve(stream, responder.clone(), recorded.clone()));
                        }
                        None => parked.push(stream),
                    }
                }
            })
        };

        Self {
            addr,
            recorded,
            connections,
            task,
        }
    }

    /// A loopback port nothing is listening on.
    pub(crate) async fn unused_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind probe listener");
        listener.local_addr().expect("probe address").port()
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn url(&self) -> String {
        format!("http://{}/v1/api", self.addr)
    }

    pub(crate) fn requests(&self) -> Vec<Value> {
        self.recorded().into_iter().map(|r| r.body).collect()
    }

    pub(crate) fn recorded(&self) -> Vec<Recorded> {
        self.recorded.lock().expect("recorded lock").clone()
    }

    pub(crate) fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockNode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut stream: TcpStream, responder: Arc<Responder>, recorded: Arc<Mutex<Vec<Recorded>>>) {
    let mut buf = Vec::new();
    while let Some((head, body)) = read_request(&mut stream, &mut buf).await {
        let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        recorded.lock().expect("recorded lock").push(Recorded {
            head,
            body: body.clone(),
        });

        let reply = responder(&body);
        if reply.silent {
            std::future::pending::<()>().await;
        }

        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n{}\r\n{}",
            reply.status.as_u16(),
            reply.status.canonical_reason().unwrap_or("Unknown"),
            reply.body.len(),
            if reply.close { "Connection: close\r\n" } else { "" },
            reply.body,
        );
        if stream.write_all(response.as_bytes()).await.is_err() {
            return;
        }
        if reply.close {
            let _ = stream.shutdown().await;
            return;
        }
    }
}

async fn read_request(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Option<(String, Vec<u8>)> {
    loop {
        let parsed = {
            let mut headers = [httparse::EMPTY_HEADER; 32];
            let mut request = httparse::Request::new(&mut headers);
            match request.parse(buf) {
                Ok(httparse::Status::Complete(head_len)) => {
                    let body_len = request
                        .headers
                        .iter()
                        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
                        .and_then(|h| std::str::from_utf8(h.value).ok())
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    Some((head_len, body_len))
                }
                Ok(httparse::Status::Partial) => None,
                Err(_) => return None,
            }
        };

        if let Some((head_len, body_len)) = parsed {
            while buf.len() < head_len + body_len {
                read_more(stream, buf).await?;
            }
            let head = String::from_utf8_lossy(&buf[..head_len]).into_owned();
            let body = buf[head_len..head_len + body_len].to_vec();
            buf.drain(..head_len + body_len);
            return Some((head, body));
        }
        read_more(stream, buf).await?;
    }
}

async fn read_more(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Option<()> {
    let mut chunk = [0u8; 8192];
    match stream.read(&mut chunk).await {
        Ok(0) | Err(_) => None,
        Ok(n) => {
            buf.extend_from_slice(&chunk[..n]);
            Some(())
        }
    }
}

// ==============================================================================
// Recording Handler
// ==============================================================================

#[derive(Debug, Default)]
pub(crate) struct RecordingHandler {
    errors: Mutex<Vec<(ErrorKind, String)>>,
    failures: Mutex<Vec<(StatusCode, String)>>,
}

impl RecordingHandler {
    pub(crate) fn error_kinds(&self) -> Vec<ErrorKind> {
        self.errors().into_iter().map(|(kind, _)| kind).collect()
    }

    pub(crate) fn errors(&self) -> Vec<(ErrorKind, String)> {
        self.errors.lock().expect("errors lock").clone()
    }

    /// `(status, rpc method)` for each response failure.
    pub(crate) fn failures(&self) -> Vec<(StatusCode, String)> {
        self.failures.lock().expect("failures lock").clone()
    }
}

impl FailureHandler for RecordingHandler {
    fn on_error(&self, error: &Error) {
        self.errors
            .lock()
            .expect("errors lock")
            .push((error.kind(), error.to_string()));
    }

    fn on_response_failure(&self, failure: &ResponseFailure) {
        self.failures
            .lock()
            .expect("failures lock")
            .push((failure.status, failure.method.clone()));
    }
}
