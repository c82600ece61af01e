pub mod client;
pub mod endpoint;
pub mod error;
pub mod fetch;
pub mod handler;
pub mod ids;
pub mod rpc;
pub mod signer;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_util;

pub use client::{CallOutput, Client, ClientConfig};
pub use endpoint::Endpoint;
pub use error::{Error, ErrorKind, ResponseFailure, SignerError};
pub use fetch::HttpClient;
pub use handler::{FailureHandler, LogHandler};
pub use ids::{RequestIds, TransactionIds};
pub use signer::{Ed25519Signer, KeyPair, Signer, TransactionKind, TransactionRequest};
