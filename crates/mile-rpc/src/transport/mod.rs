//! One plain-TCP or TLS connection to a node, with every blocking step
//! bounded by the session watchdog.

mod codec;
mod tls;
mod watchdog;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::runtime::Handle;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::endpoint::{self, Endpoint, Scheme};
use crate::error::Error;

use self::watchdog::{Guarded, Watchdog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Plain,
    Tls,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Tls => write!(f, "tls"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Connecting,
    Connected,
    /// Shut down cleanly, by `close()` or because the peer ended the
    /// connection after a complete response.
    Closed,
    /// A bounded operation failed or the watchdog force-closed the
    /// transport.
    Failed,
}

/// The bounded step an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Connect,
    Handshake,
    Write,
    Read,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolve => write!(f, "resolve"),
            Self::Connect => write!(f, "connect"),
            Self::Handshake => write!(f, "handshake"),
            Self::Write => write!(f, "write"),
            Self::Read => write!(f, "read"),
        }
    }
}

pub(crate) trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

enum Security {
    Plain,
    Tls(TlsConnector),
}

// ==============================================================================
// Transport Session
// ==============================================================================

pub struct TransportSession {
    kind: TransportKind,
    scheme: Scheme,
    host: String,
    port: u16,
    target: String,
    verify_tls: bool,
    security: Security,
    io: Option<Box<dyn Connection>>,
    read_buf: Vec<u8>,
    watchdog: Watchdog,
    state: ConnectionState,
}

impl TransportSession {
    /// Build an unconnected session for `endpoint`. Only the TLS context is
    /// prepared here; nothing touches the network until `connect`.
    pub fn new(endpoint: &Endpoint, verify_tls: bool, timeout: Duration) -> Result<Self, Error> {
        let kind = match endpoint.scheme() {
            Scheme::Http => TransportKind::Plain,
            Scheme::Https => TransportKind::Tls,
        };
        let security = build_security(kind, verify_tls, endpoint.host())?;

        Ok(Self {
            kind,
            scheme: endpoint.scheme(),
            host: endpoint.host().to_owned(),
            port: endpoint.port(),
            target: endpoint.request_target(),
            verify_tls,
            security,
            io: None,
            read_buf: Vec::new(),
            watchdog: Watchdog::new(timeout),
            state: ConnectionState::Created,
        })
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.io.is_some() && self.state == ConnectionState::Connected
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn host_header(&self) -> String {
        endpoint::host_header(self.scheme, &self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        self.watchdog.timeout()
    }

    /// Resolve, TCP-connect and (for TLS) handshake. Any previous
    /// connection is dropped first.
    pub async fn connect(&mut self) -> Result<(), Error> {
        self.release(ConnectionState::Connecting);

        match self.open().await {
            Ok(io) => {
                self.io = Some(io);
                self.state = ConnectionState::Connected;
                debug!(host = %self.host, port = self.port, transport = %self.kind, "connected");
                Ok(())
            }
            Err(e) => {
                self.release(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    async fn open(&mut self) -> Result<Box<dyn Connection>, Error> {
        let resolved = self
            .watchdog
            .guard(lookup_host((self.host.as_str(), self.port)))
            .await;
        let addrs: Vec<SocketAddr> = match resolved {
            Guarded::Completed(Ok(addrs)) => addrs.collect(),
            Guarded::Completed(Err(source)) => return Err(self.fault(Stage::Resolve, source)),
            Guarded::Expired => return Err(self.expired(Stage::Resolve)),
        };
        if addrs.is_empty() {
            return Err(Error::HostNotFound {
                host: self.host.clone(),
                port: self.port,
            });
        }

        let stream = match self.watchdog.guard(connect_first(&addrs)).await {
            Guarded::Completed(Ok(stream)) => stream,
            Guarded::Completed(Err(source)) => return Err(self.fault(Stage::Connect, source)),
            Guarded::Expired => return Err(self.expired(Stage::Connect)),
        };
        stream
            .set_nodelay(true)
            .map_err(|source| self.fault(Stage::Connect, source))?;

        let connector = match &self.security {
            Security::Plain => return Ok(Box::new(stream)),
            Security::Tls(connector) => connector.clone(),
        };
        let server_name = tls::server_name(&self.host).map_err(|message| Error::Tls {
            host: self.host.clone(),
            message,
        })?;

        match self.watchdog.guard(connector.connect(server_name, stream)).await {
            Guarded::Completed(Ok(stream)) => Ok(Box::new(stream)),
            Guarded::Completed(Err(source)) => Err(self.fault(Stage::Handshake, source)),
            Guarded::Expired => Err(self.expired(Stage::Handshake)),
        }
    }

    /// Serialize `request` as HTTP/1.1 and write all of it.
    pub async fn write(&mut self, request: &http::Request<String>) -> Result<(), Error> {
        let bytes = codec::encode_request(request);
        let Some(io) = self.io.as_mut() else {
            return Err(self.absent(Stage::Write));
        };

        let outcome = self
            .watchdog
            .guard(async move {
                io.write_all(&bytes).await?;
                io.flush().await
            })
            .await;
        self.settle(Stage::Write, outcome)
    }

    /// Read one complete HTTP/1.1 response. If the peer signals it will not
    /// reuse the connection, the session ends up `Closed`.
    pub async fn read(&mut self) -> Result<http::Response<String>, Error> {
        let Some(io) = self.io.as_mut() else {
            return Err(self.absent(Stage::Read));
        };

        let outcome = self
            .watchdog
            .guard(codec::read_response(io, &mut self.read_buf))
            .await;
        let decoded = self.settle(Stage::Read, outcome)?;

        if !decoded.keep_alive {
            debug!(host = %self.host, port = self.port, "peer closed connection after response");
            self.release(ConnectionState::Closed);
        }
        Ok(decoded.response)
    }

    /// Drop the current connection, rebuild the TLS context the same way
    /// `new` did, and connect again.
    pub async fn reconnect(&mut self) -> Result<(), Error> {
        self.release(ConnectionState::Created);
        self.security = build_security(self.kind, self.verify_tls, &self.host)?;
        self.connect().await
    }

    /// Graceful shutdown: TLS close_notify then TCP FIN.
    pub async fn close(&mut self) {
        if let Some(mut io) = self.io.take() {
            if let Guarded::Expired = self.watchdog.guard(io.shutdown()).await {
                warn!(host = %self.host, port = self.port, "shutdown timed out");
            }
        }
        self.read_buf.clear();
        self.state = ConnectionState::Closed;
    }

    fn release(&mut self, state: ConnectionState) {
        self.io = None;
        self.read_buf.clear();
        self.state = state;
    }

    fn settle<T>(&mut self, stage: Stage, outcome: Guarded<io::Result<T>>) -> Result<T, Error> {
        match outcome {
            Guarded::Completed(Ok(value)) => Ok(value),
            Guarded::Completed(Err(source)) => {
                self.release(ConnectionState::Failed);
                Err(self.fault(stage, source))
            }
            Guarded::Expired => {
                self.release(ConnectionState::Failed);
                Err(self.expired(stage))
            }
        }
    }

    fn expired(&self, stage: Stage) -> Error {
        warn!(
            host = %self.host,
            port = self.port,
            %stage,
            timeout_ms = self.watchdog.timeout().as_millis() as u64,
            "watchdog expired, transport force-closed"
        );
        Error::Timeout {
            stage,
            host: self.host.clone(),
            port: self.port,
        }
    }

    fn absent(&self, stage: Stage) -> Error {
        Error::Closed {
            stage,
            host: self.host.clone(),
            port: self.port,
        }
    }

    fn fault(&self, stage: Stage, source: io::Error) -> Error {
        if is_disconnect(&source) {
            return self.absent(stage);
        }
        Error::Io {
            stage,
            host: self.host.clone(),
            port: self.port,
            source,
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        let Some(mut io) = self.io.take() else {
            return;
        };
        if let Ok(handle) = Handle::try_current() {
            handle.spawn(async move {
                let _ = io.shutdown().await;
            });
        }
    }
}

impl fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSession")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("target", &self.target)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn build_security(kind: TransportKind, verify_tls: bool, host: &str) -> Result<Security, Error> {
    match kind {
        TransportKind::Plain => Ok(Security::Plain),
        TransportKind::Tls => tls::connector(verify_tls)
            .map(Security::Tls)
            .map_err(|e| Error::Tls {
                host: host.to_owned(),
                message: e.to_string(),
            }),
    }
}

async fn connect_first(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(%addr, error = %e, "address unreachable");
                last = Some(e);
            }
        }
    }
    Err(last.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address to connect")))
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_util::{MockNode, MockReply};

    fn session(url: &str, timeout: Duration) -> TransportSession {
        let endpoint = Endpoint::parse(url).expect("valid url");
        TransportSession::new(&endpoint, false, timeout).expect("session")
    }

    fn post(session: &TransportSession, body: String) -> http::Request<String> {
        http::Request::post(session.target())
            .header(http::header::HOST, session.host_header())
            .header(http::header::CONTENT_LENGTH, body.len())
            .body(body)
            .expect("valid request")
    }

    #[test]
    fn kind_follows_scheme() {
        let plain = session("http://127.0.0.1:1/v1/api", Duration::from_secs(1));
        assert_eq!(plain.kind(), TransportKind::Plain);
        assert_eq!(plain.state(), ConnectionState::Created);
        assert_eq!(plain.target(), "/v1/api");
        let tls = session("https://127.0.0.1:1/", Duration::from_secs(1));
        assert_eq!(tls.kind(), TransportKind::Tls);
    }

    #[tokio::test]
    async fn round_trip_over_plain_tcp() {
        let node = MockNode::start(|_| MockReply::result(serde_json::json!(true))).await;
        let mut session = session(&node.url(), Duration::from_secs(2));
        session.connect().await.expect("connect");
        assert!(session.is_open());

        let request = post(&session, "{}".to_owned());
        session.write(&request).await.expect("write");
        let response = session.read().await.expect("read");
        assert_eq!(response.status(), http::StatusCode::OK);
        assert!(response.body().contains("\"result\":true"));
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn refused_connection_is_fail() {
        let port = MockNode::unused_port().await;
        let mut session = session(&format!("http://127.0.0.1:{port}/"), Duration::from_secs(2));
        let err = session.connect().await.expect_err("nothing listens");
        assert_eq!(err.kind(), ErrorKind::Fail);
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn stalled_tls_handshake_times_out() {
        let node = MockNode::silent().await;
        let url = format!("https://{}/v1/api", node.addr());
        let mut session = session(&url, Duration::from_millis(200));

        let err = session.connect().await.expect_err("handshake must stall");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(matches!(
            err,
            Error::Timeout {
                stage: Stage::Handshake,
                ..
            }
        ));
        assert_eq!(session.state(), ConnectionState::Failed);
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn silent_peer_times_out_read() {
        let node = MockNode::silent().await;
        let mut session = session(&node.url(), Duration::from_millis(200));
        session.connect().await.expect("tcp connect succeeds");

        let request = post(&session, "{}".to_owned());
        session.write(&request).await.expect("small write fits in buffers");
        let err = session.read().await.expect_err("no response ever");
        assert!(matches!(err, Error::Timeout { stage: Stage::Read, .. }));
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn peer_that_never_reads_times_out_write() {
        let node = MockNode::silent().await;
        let mut session = session(&node.url(), Duration::from_millis(300));
        session.connect().await.expect("tcp connect succeeds");

        let request = post(&session, "x".repeat(32 * 1024 * 1024));
        let err = session.write(&request).await.expect_err("socket buffers fill up");
        assert!(matches!(err, Error::Timeout { stage: Stage::Write, .. }));
        assert_eq!(session.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn operations_without_connection_report_timeout_kind() {
        let mut session = session("http://127.0.0.1:1/", Duration::from_secs(1));
        let request = post(&session, String::new());
        let err = session.write(&request).await.expect_err("not connected");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        let err = session.read().await.expect_err("not connected");
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn connection_close_response_leaves_session_closed() {
        let node = MockNode::start(|_| MockReply::result(serde_json::json!(1)).closing()).await;
        let mut session = session(&node.url(), Duration::from_secs(2));
        session.connect().await.expect("connect");

        let request = post(&session, "{}".to_owned());
        session.write(&request).await.expect("write");
        session.read().await.expect("read");
        assert_eq!(session.state(), ConnectionState::Closed);
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn close_then_reconnect() {
        let node = MockNode::start(|_| MockReply::result(serde_json::json!(1))).await;
        let mut session = session(&node.url(), Duration::from_secs(2));
        session.connect().await.expect("connect");
        session.close().await;
        assert_eq!(session.state(), ConnectionState::Closed);

        session.reconnect().await.expect("reconnect");
        assert!(session.is_open());
        let request = post(&session, "{}".to_owned());
        session.write(&request).await.expect("write");
        session.read().await.expect("read");
        assert_eq!(node.connections(), 2);
    }
}
