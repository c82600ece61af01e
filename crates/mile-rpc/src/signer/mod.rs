//! Key handling and transaction signing, consumed by the client through the
//! [`Signer`] trait.
//!
//! The client never builds or signs transactions itself. It collects the
//! fields into a [`TransactionRequest`] and hands that to whatever signer the
//! caller configured. [`Ed25519Signer`] is the implementation shipped with
//! the crate.

mod ed25519;

pub use ed25519::Ed25519Signer;

use std::fmt;

use alloy_primitives::U256;
use serde_json::Value;

use crate::error::SignerError;

pub trait Signer: Send + Sync {
    fn validate_private_key(&self, private_key: &str) -> Result<(), SignerError>;

    fn key_pair_from_private_key(&self, private_key: &str) -> Result<KeyPair, SignerError>;

    fn key_pair_from_random(&self) -> Result<KeyPair, SignerError>;

    fn key_pair_from_secret_phrase(&self, phrase: &str) -> Result<KeyPair, SignerError>;

    /// Build the JSON body for `send-transaction`, signed with
    /// `request.key_pair`.
    fn build_signed_transaction(&self, request: &TransactionRequest) -> Result<Value, SignerError>;
}

/// Encoded public and private key, in whatever text form the signer uses.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPair {
    public_key: String,
    private_key: String,
}

impl KeyPair {
    pub fn new(public_key: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            private_key: private_key.into(),
        }
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    Transfer,
    Emission,
    RegisterNode,
    UnregisterNode,
}

impl TransactionKind {
    /// Name the node expects in `transaction-type`.
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Transfer => "TransferAssetsTransaction",
            Self::Emission => "EmissionTransaction",
            Self::RegisterNode => "RegisterNodeTransactionWithAmount",
            Self::UnregisterNode => "UnregisterNodeTransaction",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub kind: TransactionKind,
    pub key_pair: KeyPair,
    /// Recipient public key for transfers and emissions, node address for
    /// registrations.
    pub destination: Option<String>,
    pub block_id: U256,
    pub transaction_id: u64,
    pub asset_code: u16,
    /// Decimal amount as text, e.g. `"1.5"`.
    pub amount: String,
    pub fee: String,
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_private_key() {
        let pair = KeyPair::new("pub", "very-secret");
        let shown = format!("{pair:?}");
        assert!(shown.contains("pub"));
        assert!(!shown.contains("very-secret"));
    }

    #[test]
    fn type_names_match_node_vocabulary() {
        assert_eq!(TransactionKind::Transfer.to_string(), "TransferAssetsTransaction");
        assert_eq!(
            TransactionKind::UnregisterNode.type_name(),
            "UnregisterNodeTransaction"
        );
    }
}
