use alloy_primitives::U256;
use serde_json::Value;
use tracing::debug;

use crate::error::Error;
use crate::signer::{TransactionKind, TransactionRequest};

use super::{parse_u256, Client};

/// Methods accepted by [`Client::call`].
pub const METHODS: &[&str] = &[
    "ping",
    "get-current-block-id",
    "get-network-state",
    "get-nodes",
    "get-blockchain-info",
    "get-blockchain-state",
    "get-block",
    "get-wallet-state",
    "get-wallet-transactions",
    "send-transfer",
    "send-emission",
    "register-node",
    "unregister-node",
];

/// Methods of [`Client::call`] that sign and submit a transaction. A call
/// to one of these must not be repeated after a failure: the node may
/// already hold the transaction.
pub const TRANSACTION_METHODS: &[&str] = &[
    "send-transfer",
    "send-emission",
    "register-node",
    "unregister-node",
];

/// What a dynamic call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutput {
    /// `ping` latency in microseconds, or `-1`.
    Latency(i64),
    BlockId(U256),
    Json(Value),
}

impl Client {
    /// Invoke a method by name with JSON params.
    ///
    /// Missing required params are reported as `NotFound` naming the first
    /// missing key, before any network or signer work happens. Transaction
    /// methods fetch the current block id, sign through the configured
    /// [`Signer`](crate::signer::Signer) and submit the result.
    pub async fn call(&self, method: &str, params: &Value) -> Option<CallOutput> {
        match self.dispatch(method, params).await {
            Ok(output) => output,
            Err(e) => self.report(e),
        }
    }

    async fn dispatch(&self, method: &str, params: &Value) -> Result<Option<CallOutput>, Error> {
        let output = match method {
            "ping" => self.ping().await.map(CallOutput::Latency),
            "get-current-block-id" => self.get_current_block_id().await.map(CallOutput::BlockId),
            "get-network-state" => self.get_network_state().await.map(CallOutput::Json),
            "get-nodes" => self.get_nodes().await.map(CallOutput::Json),
            "get-blockchain-info" => self.get_blockchain_info().await.map(CallOutput::Json),
            "get-blockchain-state" => self.get_blockchain_state().await.map(CallOutput::Json),
            "get-block" => {
                let raw = required(method, params, "id")?;
                let id = parse_u256(raw).map_err(|message| Error::InvalidParam {
                    method: method.to_owned(),
                    key: "id",
                    message,
                })?;
                self.get_block(id).await.map(CallOutput::Json)
            }
            "get-wallet-state" => {
                let public_key = text(method, params, "public-key")?;
                self.get_wallet_state(&public_key).await.map(CallOutput::Json)
            }
            "get-wallet-transactions" => {
                let public_key = text(method, params, "public-key")?;
                let limit = match params.get("limit") {
                    Some(raw) => unsigned(method, "limit", raw)?,
                    None => 1,
                };
                self.get_wallet_transactions(&public_key, limit)
                    .await
                    .map(CallOutput::Json)
            }
            "send-transfer" => self.submit(method, TransactionKind::Transfer, params).await?,
            "send-emission" => self.submit(method, TransactionKind::Emission, params).await?,
            "register-node" => self.submit(method, TransactionKind::RegisterNode, params).await?,
            "unregister-node" => {
                self.submit(method, TransactionKind::UnregisterNode, params)
                    .await?
            }
            _ => return Err(Error::MethodNotFound(method.to_owned())),
        };
        Ok(output)
    }

    async fn submit(
        &self,
        method: &str,
        kind: TransactionKind,
        params: &Value,
    ) -> Result<Option<CallOutput>, Error> {
        let private_key = text(method, params, "private-key")?;
        let destination = match kind {
            TransactionKind::Transfer | TransactionKind::Emission => {
                Some(text(method, params, "to")?)
            }
            TransactionKind::RegisterNode => Some(text(method, params, "address")?),
            TransactionKind::UnregisterNode => None,
        };
        let (amount, asset_code) = match kind {
            TransactionKind::UnregisterNode => (String::new(), 0),
            _ => {
                let amount = text(method, params, "amount")?;
                let asset_code = required(method, params, "asset-code")?;
                let asset_code = u16::try_from(unsigned(method, "asset-code", asset_code)?)
                    .map_err(|e| Error::InvalidParam {
                        method: method.to_owned(),
                        key: "asset-code",
                        message: e.to_string(),
                    })?;
                (amount, asset_code)
            }
        };
        let description = optional_text(method, params, "description")?;
        let fee = optional_text(method, params, "fee")?.unwrap_or_default();

        let signer = self
            .signer
            .clone()
            .ok_or_else(|| Error::SignerUnavailable(method.to_owned()))?;

        let Some(block_id) = self.get_current_block_id().await else {
            return Ok(None);
        };
        let key_pair = signer.key_pair_from_private_key(&private_key)?;

        let request = TransactionRequest {
            kind,
            key_pair,
            destination,
            block_id,
            transaction_id: self.transaction_ids.next(),
            asset_code,
            amount,
            fee,
            description,
        };
        debug!(
            rpc.method = method,
            transaction.kind = %kind,
            transaction.id = request.transaction_id,
            block_id = %block_id,
            "submitting transaction"
        );
        let body = signer.build_signed_transaction(&request)?;

        Ok(self
            .send_transaction(&request.key_pair, body)
            .await
            .map(CallOutput::Json))
    }
}

fn required<'a>(method: &str, params: &'a Value, key: &'static str) -> Result<&'a Value, Error> {
    params
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| Error::MissingParam {
            method: method.to_owned(),
            key,
        })
}

fn text(method: &str, params: &Value, key: &'static str) -> Result<String, Error> {
    as_text(method, key, required(method, params, key)?)
}

fn optional_text(method: &str, params: &Value, key: &'static str) -> Result<Option<String>, Error> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(raw) => as_text(method, key, raw).map(Some),
    }
}

// Numbers are accepted wherever text is, e.g. `"amount": 10`.
fn as_text(method: &str, key: &'static str, raw: &Value) -> Result<String, Error> {
    match raw {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(Error::InvalidParam {
            method: method.to_owned(),
            key,
            message: format!("expected a string, got `{other}`"),
        }),
    }
}

fn unsigned(method: &str, key: &'static str, raw: &Value) -> Result<u32, Error> {
    let parsed = match raw {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| Error::InvalidParam {
        method: method.to_owned(),
        key,
        message: format!("`{raw}` is not an unsigned integer"),
    })
}
