//! JSON-RPC 2.0 over HTTP, shared by the chain client and the wallet provider.

use crate::error::{
    ChainError,
    SessionError,
};
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use serde_json::Value;
use std::{
    sync::{
        Arc,
        atomic::{
            AtomicU64,
            Ordering,
        },
    },
    time::Duration,
};
use thiserror::Error;

#[cfg(test)]
pub(crate) mod mock_node;

/// EIP-1193 "user rejected request".
pub const USER_REJECTED_CODE: i64 = 4001;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("node unreachable: {0}")]
    Unreachable(String),

    #[error("request timed out")]
    Timeout,

    #[error("rpc error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("malformed rpc response: {0}")]
    Decode(String),
}

impl From<RpcError> for ChainError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Unreachable(reason) => ChainError::NodeUnreachable(reason),
            RpcError::Timeout => ChainError::Timeout,
            RpcError::Remote { message, .. } => ChainError::Rejected(message),
            RpcError::Decode(reason) => ChainError::InvalidResponse(reason),
        }
    }
}

impl From<RpcError> for SessionError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Remote { code, message } if code == USER_REJECTED_CODE => {
                SessionError::Denied(message)
            }
            other => SessionError::Transport(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct JsonRpcTransport {
    url: String,
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

#[derive(Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl JsonRpcTransport {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RpcError::Unreachable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        tracing::debug!(method, id, "rpc request");
        let res = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(classify_http_error)?;
        let status = res.status();
        let bytes = res.bytes().await.map_err(classify_http_error)?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            return Err(RpcError::Unreachable(format!(
                "node responded with {status} to {method}: {body}"
            )));
        }
        decode_response(method, &bytes)
    }
}

fn decode_response<R: DeserializeOwned>(method: &str, bytes: &[u8]) -> Result<R, RpcError> {
    let envelope: RpcResponse = serde_json::from_slice(bytes)
        .map_err(|e| RpcError::Decode(format!("{method}: {e}")))?;
    if let Some(err) = envelope.error {
        return Err(RpcError::Remote {
            code: err.code,
            message: err.message,
        });
    }
    serde_json::from_value(envelope.result.unwrap_or(Value::Null))
        .map_err(|e| RpcError::Decode(format!("{method}: {e}")))
}

fn classify_http_error(err: reqwest::Error) -> RpcError {
    if err.is_timeout() {
        RpcError::Timeout
    } else {
        RpcError::Unreachable(err.to_string())
    }
}
