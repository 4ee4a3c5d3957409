use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::{hex, U256};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use shared::protocol::RemoteFailure;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::abi::decode_revert_reason;

/// Wallet error code for a chain the wallet has never been told about.
pub const UNRECOGNIZED_CHAIN_CODE: i64 = 4902;
pub const METHOD_NOT_FOUND_CODE: i64 = -32601;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("rpc transport failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{message}")]
    Node {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("unexpected rpc result for {method}: {detail}")]
    Decode { method: String, detail: String },
}

impl RpcError {
    pub fn code(&self) -> Option<i64> {
        match self {
            RpcError::Node { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn decode(method: &str, detail: impl ToString) -> Self {
        RpcError::Decode {
            method: method.to_string(),
            detail: detail.to_string(),
        }
    }

    /// Revert reason hidden in the error data, when the node attached one.
    pub fn revert_reason(&self) -> Option<String> {
        let RpcError::Node { data, .. } = self else {
            return None;
        };
        let raw = match data.as_ref()? {
            Value::String(raw) => raw.clone(),
            Value::Object(object) => object.get("data")?.as_str()?.to_string(),
            _ => return None,
        };
        decode_revert_reason(&hex::decode(raw).ok()?)
    }
}

/// The decoded revert data becomes the top-level reason and the node's own
/// error message the nested provider message.
impl From<RpcError> for RemoteFailure {
    fn from(err: RpcError) -> Self {
        let mut failure = RemoteFailure::new(err.to_string());
        if let Some(reason) = err.revert_reason() {
            failure = failure.with_reason(reason);
        }
        match err {
            RpcError::Node { message, .. } => failure.with_provider_message(message),
            _ => failure,
        }
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// Minimal JSON-RPC 2.0 client over HTTP.
pub struct RpcClient {
    http: Client,
    endpoint: Url,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(endpoint: Url) -> Self {
        Self::with_http(Client::new(), endpoint)
    }

    pub fn with_http(http: Client, endpoint: Url) -> Self {
        Self {
            http,
            endpoint,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, method, "rpc: request");
        let response: RpcResponse = self
            .http
            .post(self.endpoint.clone())
            .json(&RpcRequest {
                jsonrpc: "2.0",
                id,
                method,
                params,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            debug!(id, method, code = error.code, message = %error.message, "rpc: error response");
            return Err(RpcError::Node {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }
        serde_json::from_value(response.result).map_err(|err| RpcError::decode(method, err))
    }
}

pub fn parse_quantity(method: &str, raw: &str) -> Result<U256, RpcError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| RpcError::decode(method, format!("quantity '{raw}' lacks 0x")))?;
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(digits, 16).map_err(|err| RpcError::decode(method, err))
}

pub fn quantity(value: u64) -> String {
    format!("{value:#x}")
}

#[cfg(test)]
#[path = "tests/client_tests.rs"]
mod tests;
