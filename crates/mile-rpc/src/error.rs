use std::fmt;

use crate::transport::Stage;

/// Coarse classification shared by every layer, used by callers (and the
/// CLI retry loop) to decide what to do with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Required input missing, e.g. an empty URL string.
    Empty,
    /// Host did not resolve, or a required parameter or method is absent.
    NotFound,
    /// Unsupported URL scheme, malformed URL or out-of-range port.
    NotSupported,
    /// Handshake or generic connection failure.
    Fail,
    /// Deadline exceeded, or the connection was found closed.
    Timeout,
    /// JSON encode/decode or other unexpected runtime fault.
    Exception,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::NotFound => write!(f, "not found"),
            Self::NotSupported => write!(f, "not supported"),
            Self::Fail => write!(f, "fail"),
            Self::Timeout => write!(f, "timeout"),
            Self::Exception => write!(f, "exception"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("url string is empty")]
    EmptyUrl,

    #[error("url `{url}` is not supported: {reason}")]
    UnsupportedUrl { url: String, reason: String },

    #[error("host {host}:{port} not found")]
    HostNotFound { host: String, port: u16 },

    #[error("{stage} timeout: {host}:{port}")]
    Timeout {
        stage: Stage,
        host: String,
        port: u16,
    },

    #[error("{stage}: connection to {host}:{port} is closed")]
    Closed {
        stage: Stage,
        host: String,
        port: u16,
    },

    #[error("{stage} failed: {host}:{port}: {source}")]
    Io {
        stage: Stage,
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS setup for {host} failed: {message}")]
    Tls { host: String, message: String },

    #[error("method {0} not found")]
    MethodNotFound(String),

    #[error("{method}: required parameter `{key}` is not defined")]
    MissingParam { method: String, key: &'static str },

    #[error("{method}: invalid parameter `{key}`: {message}")]
    InvalidParam {
        method: String,
        key: &'static str,
        message: String,
    },

    #[error("{0}: no transaction signer configured")]
    SignerUnavailable(String),

    #[error("signer: {0}")]
    Signer(#[from] SignerError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("json-rpc {method}: unexpected result: {message}")]
    UnexpectedResult { method: String, message: String },

    #[error("json-rpc {method}: decode error: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyUrl => ErrorKind::Empty,
            Self::UnsupportedUrl { .. } | Self::SignerUnavailable(_) => ErrorKind::NotSupported,
            Self::HostNotFound { .. } | Self::MethodNotFound(_) | Self::MissingParam { .. } => {
                ErrorKind::NotFound
            }
            Self::Timeout { .. } | Self::Closed { .. } => ErrorKind::Timeout,
            Self::Io { .. } | Self::Tls { .. } | Self::InvalidParam { .. } | Self::Signer(_) => {
                ErrorKind::Fail
            }
            Self::InvalidRequest(_) | Self::UnexpectedResult { .. } | Self::Decode { .. } => {
                ErrorKind::Exception
            }
        }
    }
}

/// Failures reported by a [`Signer`](crate::signer::Signer) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
    #[error("private key is not valid: {0}")]
    InvalidPrivateKey(String),

    #[error("public key is not valid: {0}")]
    InvalidPublicKey(String),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
}

// ==============================================================================
// Response Failure
// ==============================================================================

/// A request that reached the node but did not yield a usable `result`:
/// non-200 status, missing `result`, or a `null` one.
#[derive(Debug)]
pub struct ResponseFailure {
    pub status: http::StatusCode,
    pub method: String,
    pub response: http::Response<String>,
}

impl fmt::Display for ResponseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "response[{}] {} error: {}",
            self.status.as_u16(),
            self.method,
            self.response.body()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(Error::EmptyUrl.kind(), ErrorKind::Empty);
        assert_eq!(
            Error::MethodNotFound("no-such-method".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::Closed {
                stage: Stage::Read,
                host: "localhost".into(),
                port: 80,
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            Error::Signer(SignerError::InvalidPrivateKey("short".into())).kind(),
            ErrorKind::Fail
        );
    }

    #[test]
    fn missing_param_message_names_key() {
        let err = Error::MissingParam {
            method: "send-transfer".into(),
            key: "private-key",
        };
        assert_eq!(
            err.to_string(),
            "send-transfer: required parameter `private-key` is not defined"
        );
    }
}
