use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, ResponseFailure};

/// JSON-RPC request envelope as the node expects it, including its
/// non-standard `version` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
    pub id: u64,
    pub version: f64,
}

impl Envelope {
    pub(crate) fn new(method: &str, params: Option<Value>, id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.to_owned(),
            params: params.unwrap_or_else(|| Value::Object(Default::default())),
            id,
            version: 0.0,
        }
    }
}

/// Classified outcome of one round trip.
#[derive(Debug)]
pub enum Reply {
    /// HTTP 200 with a non-null `result`; holds that value.
    Result(Value),
    /// The node answered, but not with a usable `result`.
    Failure(ResponseFailure),
}

/// Non-200 statuses and missing or `null` results are failures. A 200 whose
/// body is not JSON is a decode error.
pub(crate) fn classify(method: &str, response: http::Response<String>) -> Result<Reply, Error> {
    let status = response.status();
    if status != StatusCode::OK {
        return Ok(failure(method, response));
    }

    let mut document: Value =
        serde_json::from_str(response.body()).map_err(|source| Error::Decode {
            method: method.to_owned(),
            source,
        })?;

    match document.get_mut("result").map(Value::take) {
        Some(result) if !result.is_null() => Ok(Reply::Result(result)),
        _ => Ok(failure(method, response)),
    }
}

fn failure(method: &str, response: http::Response<String>) -> Reply {
    Reply::Failure(ResponseFailure {
        status: response.status(),
        method: method.to_owned(),
        response,
    })
}
