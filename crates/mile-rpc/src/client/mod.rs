//! Typed blockchain operations on top of one shared [`RpcSession`].
//!
//! Every operation returns `Option<T>`. `None` means the reason was already
//! delivered to the client's [`FailureHandler`]; nothing is retried here.

mod dispatch;

pub use dispatch::{CallOutput, METHODS, TRANSACTION_METHODS};

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy_primitives::U256;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::handler::FailureHandler;
use crate::ids::{RequestIds, TransactionIds};
use crate::rpc::RpcSession;
use crate::signer::{KeyPair, Signer};
use crate::transport::TransportSession;

/// Default bound on every connect, write and read.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub verify_tls: bool,
    pub timeout: Duration,
    /// Dump full requests and responses on the `mile_rpc::wire` target at
    /// INFO instead of TRACE.
    pub debug: bool,
    pub request_ids: RequestIds,
    pub transaction_ids: TransactionIds,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            verify_tls: true,
            timeout: DEFAULT_TIMEOUT,
            debug: false,
            request_ids: RequestIds::new(),
            transaction_ids: TransactionIds::from_clock(),
        }
    }
}

/// Node client. Clones share the connection and take turns on it.
#[derive(Clone)]
pub struct Client {
    endpoint: Endpoint,
    verify_tls: bool,
    session: Arc<Mutex<RpcSession>>,
    handler: Arc<dyn FailureHandler>,
    signer: Option<Arc<dyn Signer>>,
    transaction_ids: TransactionIds,
}

impl Client {
    /// Parse `url`, open the connection and return a ready client. Any
    /// failure is reported to `handler`.
    pub async fn connect(
        url: &str,
        config: ClientConfig,
        handler: Arc<dyn FailureHandler>,
    ) -> Option<Self> {
        match Self::open(url, config, handler.clone()).await {
            Ok(client) => Some(client),
            Err(e) => {
                handler.on_error(&e);
                None
            }
        }
    }

    async fn open(
        url: &str,
        config: ClientConfig,
        handler: Arc<dyn FailureHandler>,
    ) -> Result<Self, Error> {
        let endpoint = Endpoint::parse(url)?;
        let transport = TransportSession::new(&endpoint, config.verify_tls, config.timeout)?;
        let mut session = RpcSession::new(transport, config.request_ids, config.debug);
        session.connect().await?;
        debug!(url = %endpoint, verify_tls = config.verify_tls, "client connected");

        Ok(Self {
            endpoint,
            verify_tls: config.verify_tls,
            session: Arc::new(Mutex::new(session)),
            handler,
            signer: None,
            transaction_ids: config.transaction_ids,
        })
    }

    /// Attach the signer used by the transaction methods of [`call`](Self::call).
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn verify_tls(&self) -> bool {
        self.verify_tls
    }

    pub fn signer(&self) -> Option<&Arc<dyn Signer>> {
        self.signer.as_ref()
    }

    /// Drop the current connection and open a new one. Returns `false` after
    /// reporting the failure to the handler.
    pub async fn reconnect(&self) -> bool {
        let mut session = self.session.lock().await;
        match session.reconnect().await {
            Ok(()) => true,
            Err(e) => {
                self.handler.on_error(&e);
                false
            }
        }
    }

    /// Round-trip latency in microseconds when the node answers `true`,
    /// `-1` for any other answer.
    pub async fn ping(&self) -> Option<i64> {
        let started = Instant::now();
        let result = self.request("ping", None).await?;
        let alive = match &result {
            Value::Bool(b) => *b,
            Value::String(s) => s == "true",
            _ => false,
        };
        if !alive {
            return Some(-1);
        }
        Some(i64::try_from(started.elapsed().as_micros()).unwrap_or(i64::MAX))
    }

    /// `None` when the node has no current block yet (empty result object).
    pub async fn get_current_block_id(&self) -> Option<U256> {
        const METHOD: &str = "get-current-block-id";
        let result = self.request(METHOD, None).await?;
        if result.as_object().is_some_and(|o| o.is_empty()) {
            return None;
        }
        match parse_u256(&result["current-block-id"]) {
            Ok(id) => Some(id),
            Err(message) => {
                self.handler.on_error(&Error::UnexpectedResult {
                    method: METHOD.to_owned(),
                    message,
                });
                None
            }
        }
    }

    pub async fn get_network_state(&self) -> Option<Value> {
        self.request("get-network-state", None).await
    }

    pub async fn get_nodes(&self) -> Option<Value> {
        self.request("get-nodes", None).await
    }

    pub async fn get_blockchain_info(&self) -> Option<Value> {
        self.request("get-blockchain-info", None).await
    }

    pub async fn get_blockchain_state(&self) -> Option<Value> {
        self.request("get-blockchain-state", None).await
    }

    pub async fn get_block(&self, id: U256) -> Option<Value> {
        self.request("get-block-by-id", Some(json!({ "id": id.to_string() })))
            .await
    }

    pub async fn get_wallet_state(&self, public_key: &str) -> Option<Value> {
        self.request("get-wallet-state", Some(json!({ "public-key": public_key })))
            .await
    }

    pub async fn get_wallet_state_for(&self, pair: &KeyPair) -> Option<Value> {
        self.get_wallet_state(pair.public_key()).await
    }

    pub async fn get_wallet_transactions(&self, public_key: &str, limit: u32) -> Option<Value> {
        let params = json!({ "public-key": public_key, "limit": limit });
        self.request("get-wallet-transactions", Some(params)).await
    }

    pub async fn get_wallet_transactions_for(&self, pair: &KeyPair, limit: u32) -> Option<Value> {
        self.get_wallet_transactions(pair.public_key(), limit).await
    }

    /// Submit a body built by a [`Signer`]. `pair` is the sender.
    pub async fn send_transaction(&self, pair: &KeyPair, body: Value) -> Option<Value> {
        debug!(from = %pair.public_key(), "send transaction");
        self.request("send-transaction", Some(body)).await
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Option<Value> {
        let mut session = self.session.lock().await;
        let envelope = session.next_command(method, params);
        session.request(&envelope, self.handler.as_ref()).await
    }

    fn report<T>(&self, error: Error) -> Option<T> {
        self.handler.on_error(&error);
        None
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint)
            .field("verify_tls", &self.verify_tls)
            .field("signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

/// Block ids arrive as decimal or `0x` hex strings, or as plain integers.
pub(crate) fn parse_u256(value: &Value) -> Result<U256, String> {
    match value {
        Value::String(s) => U256::from_str(s.trim()).map_err(|e| format!("`{s}`: {e}")),
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| format!("`{n}` is not an unsigned integer")),
        Value::Null => Err("value is missing".to_owned()),
        other => Err(format!("`{other}` is not a block id")),
    }
}
