//! Plain `GET` of an endpoint over the same transport the RPC client uses.

use std::sync::Arc;

use http::header::{HOST, USER_AGENT};
use http::StatusCode;
use tracing::debug;

use crate::client::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::{Error, ResponseFailure};
use crate::handler::FailureHandler;
use crate::rpc::{dump_wire, render_request, render_response, USER_AGENT_VALUE};
use crate::transport::{ConnectionState, TransportSession};

pub struct HttpClient {
    endpoint: Endpoint,
    transport: TransportSession,
    handler: Arc<dyn FailureHandler>,
    debug: bool,
}

impl HttpClient {
    pub async fn connect(
        url: &str,
        config: ClientConfig,
        handler: Arc<dyn FailureHandler>,
    ) -> Option<Self> {
        let opened = async {
            let endpoint = Endpoint::parse(url)?;
            let mut transport =
                TransportSession::new(&endpoint, config.verify_tls, config.timeout)?;
            transport.connect().await?;
            Ok::<_, Error>((endpoint, transport))
        }
        .await;

        match opened {
            Ok((endpoint, transport)) => Some(Self {
                endpoint,
                transport,
                handler,
                debug: config.debug,
            }),
            Err(e) => {
                handler.on_error(&e);
                None
            }
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Body of the endpoint on 200 OK. Any other status goes to the
    /// handler's response sink under method `GET`.
    pub async fn get(&mut self) -> Option<String> {
        match self.fetch().await {
            Ok(Ok(body)) => Some(body),
            Ok(Err(failure)) => {
                self.handler.on_response_failure(&failure);
                None
            }
            Err(e) => {
                self.handler.on_error(&e);
                None
            }
        }
    }

    async fn fetch(&mut self) -> Result<Result<String, ResponseFailure>, Error> {
        if self.transport.state() == ConnectionState::Closed {
            self.transport.connect().await?;
        }

        let request = http::Request::get(self.transport.target())
            .header(HOST, self.transport.host_header())
            .header(USER_AGENT, USER_AGENT_VALUE)
            .body(String::new())
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;
        dump_wire(self.debug, "request", || render_request(&request));

        self.transport.write(&request).await?;
        let response = self.transport.read().await?;
        debug!(url = %self.endpoint, status = %response.status(), "http get");
        dump_wire(self.debug, "response", || render_response(&response));

        if response.status() == StatusCode::OK {
            return Ok(Ok(response.into_body()));
        }
        Ok(Err(ResponseFailure {
            status: response.status(),
            method: "GET".to_owned(),
            response,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_util::{MockNode, MockReply, RecordingHandler};

    #[tokio::test]
    async fn get_returns_body_on_ok() {
        let node = MockNode::start(|_| MockReply::raw(StatusCode::OK, "hello mile")).await;
        let handler = Arc::new(RecordingHandler::default());
        let mut client = HttpClient::connect(&node.url(), ClientConfig::default(), handler.clone())
            .await
            .expect("connects");

        assert_eq!(client.get().await.as_deref(), Some("hello mile"));
        assert_eq!(client.get().await.as_deref(), Some("hello mile"));
        let head = node.recorded()[0].head.to_ascii_lowercase();
        assert!(head.starts_with("get /v1/api http/1.1\r\n"));
        assert!(handler.errors().is_empty());
    }

    #[tokio::test]
    async fn non_ok_status_is_reported_as_get_failure() {
        let node = MockNode::start(|_| MockReply::raw(StatusCode::NOT_FOUND, "missing")).await;
        let handler = Arc::new(RecordingHandler::default());
        let mut client = HttpClient::connect(&node.url(), ClientConfig::default(), handler.clone())
            .await
            .expect("connects");

        assert_eq!(client.get().await, None);
        assert_eq!(
            handler.failures(),
            vec![(StatusCode::NOT_FOUND, "GET".to_owned())]
        );
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let handler = Arc::new(RecordingHandler::default());
        let client = HttpClient::connect("gopher://x", ClientConfig::default(), handler.clone()).await;
        assert!(client.is_none());
        assert_eq!(handler.error_kinds(), vec![ErrorKind::NotSupported]);
    }
}
