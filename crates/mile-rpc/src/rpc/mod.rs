//! JSON-RPC session: one envelope out, one classified reply back, over a
//! single [`TransportSession`].

mod protocol;

pub use protocol::{Envelope, Reply};

use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, USER_AGENT};
use serde_json::Value;
use tracing::{debug, info, trace, Level};

use crate::error::Error;
use crate::handler::FailureHandler;
use crate::ids::RequestIds;
use crate::transport::{ConnectionState, TransportSession};

pub(crate) const WIRE_TARGET: &str = "mile_rpc::wire";

pub(crate) const USER_AGENT_VALUE: &str = concat!("mile-rpc/", env!("CARGO_PKG_VERSION"));

pub struct RpcSession {
    transport: TransportSession,
    ids: RequestIds,
    debug: bool,
}

impl RpcSession {
    pub fn new(transport: TransportSession, ids: RequestIds, debug: bool) -> Self {
        Self {
            transport,
            ids,
            debug,
        }
    }

    pub fn transport(&self) -> &TransportSession {
        &self.transport
    }

    pub async fn connect(&mut self) -> Result<(), Error> {
        self.transport.connect().await
    }

    pub async fn reconnect(&mut self) -> Result<(), Error> {
        self.transport.reconnect().await
    }

    pub async fn close(&mut self) {
        self.transport.close().await;
    }

    /// Build the envelope for `method`, consuming one request id. Absent
    /// params become `{}`.
    pub fn next_command(&self, method: &str, params: Option<Value>) -> Envelope {
        Envelope::new(method, params, self.ids.next())
    }

    /// One round trip as a typed result.
    ///
    /// A transport the peer cleanly closed after the previous reply is
    /// reopened first. Nothing is ever re-sent: a failure after the write
    /// leaves the outcome of the call unknown.
    pub async fn exchange(&mut self, envelope: &Envelope) -> Result<Reply, Error> {
        if self.transport.state() == ConnectionState::Closed {
            debug!(host = %self.transport.host(), "reopening closed connection");
            self.transport.connect().await?;
        }

        let body =
            serde_json::to_string(envelope).map_err(|e| Error::InvalidRequest(e.to_string()))?;
        let request = http::Request::post(self.transport.target())
            .header(HOST, self.transport.host_header())
            .header(USER_AGENT, USER_AGENT_VALUE)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, body.len())
            .header(CONNECTION, "keep-alive")
            .body(body)
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;

        debug!(rpc.id = envelope.id, rpc.method = %envelope.method, "rpc call");
        dump_wire(self.debug, "request", || render_request(&request));

        self.transport.write(&request).await?;
        let response = self.transport.read().await?;

        debug!(
            rpc.id = envelope.id,
            rpc.method = %envelope.method,
            status = %response.status(),
            body_len = response.body().len(),
            "rpc response"
        );
        dump_wire(self.debug, "response", || render_response(&response));

        protocol::classify(&envelope.method, response)
    }

    /// Like [`exchange`](Self::exchange), but failures go to `handler` and
    /// the caller only sees the `result` value or nothing.
    pub async fn request(
        &mut self,
        envelope: &Envelope,
        handler: &dyn FailureHandler,
    ) -> Option<Value> {
        match self.exchange(envelope).await {
            Ok(Reply::Result(value)) => Some(value),
            Ok(Reply::Failure(failure)) => {
                handler.on_response_failure(&failure);
                None
            }
            Err(e) => {
                handler.on_error(&e);
                None
            }
        }
    }
}

/// Full message dump on the wire target: INFO in debug mode, TRACE
/// otherwise. `render` only runs when the event is enabled.
pub(crate) fn dump_wire(debug: bool, direction: &str, render: impl FnOnce() -> String) {
    if debug {
        info!(target: WIRE_TARGET, direction, "\n{}", render());
    } else if tracing::enabled!(target: WIRE_TARGET, Level::TRACE) {
        trace!(target: WIRE_TARGET, direction, "\n{}", render());
    }
}

pub(crate) fn render_request(request: &http::Request<String>) -> String {
    let mut out = format!("{} {} {:?}\n", request.method(), request.uri(), request.version());
    render_headers(&mut out, request.headers());
    out.push('\n');
    out.push_str(request.body());
    out
}

pub(crate) fn render_response(response: &http::Response<String>) -> String {
    let mut out = format!("{:?} {}\n", response.version(), response.status());
    render_headers(&mut out, response.headers());
    out.push('\n');
    out.push_str(response.body());
    out
}

fn render_headers(out: &mut String, headers: &http::HeaderMap) {
    for (name, value) in headers {
        out.push_str(name.as_str());
        out.push_str(": ");
        out.push_str(value.to_str().unwrap_or("<binary>"));
        out.push('\n');
    }
}
