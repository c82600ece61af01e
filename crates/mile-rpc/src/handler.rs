//! Failure reporting sink.
//!
//! Every public operation of the client returns `Option<T>`; the reason for a
//! `None` is delivered here. Implementations must not panic: they are
//! terminal sinks, not control flow. A caller that wants to retry does so
//! from its own loop after inspecting what was reported.

use tracing::warn;

use crate::error::{Error, ResponseFailure};

pub trait FailureHandler: Send + Sync {
    /// Transport, protocol, validation and signer failures.
    fn on_error(&self, error: &Error);

    /// The node answered, but not with a usable `result`.
    fn on_response_failure(&self, failure: &ResponseFailure) {
        let _ = failure;
    }
}

/// Handler that only logs. Used when the caller has nothing better to do.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

impl FailureHandler for LogHandler {
    fn on_error(&self, error: &Error) {
        warn!(kind = %error.kind(), error = %error, "rpc error");
    }

    fn on_response_failure(&self, failure: &ResponseFailure) {
        warn!(
            status = failure.status.as_u16(),
            rpc.method = %failure.method,
            body = %failure.response.body(),
            "rpc response failure"
        );
    }
}
