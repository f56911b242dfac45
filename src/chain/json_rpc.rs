use super::{
    ChainClient,
    ChainValue,
    ContractCall,
    Receipt,
    TransactionHandle,
    abi,
};
use crate::{
    error::ChainError,
    rpc::JsonRpcTransport,
    types::Address,
};
use alloy_primitives::TxHash;
use serde::{
    Deserialize,
    de::DeserializeOwned,
};
use serde_json::{
    Value,
    json,
};
use std::{
    str::FromStr,
    time::Duration,
};
use tokio::time;

pub const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(180);
pub const DEFAULT_RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug)]
pub struct ChainConfig {
    /// Upper bound on a single `await_confirmation`.
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    /// Blocks, including the inclusion block, before a receipt counts.
    pub required_confirmations: u64,
    pub request_timeout: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            poll_interval: DEFAULT_RECEIPT_POLL_INTERVAL,
            required_confirmations: 1,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// [`ChainClient`] over an EVM node's JSON-RPC interface. Signing is left to
/// the node (or the wallet proxying it) via `eth_sendTransaction`.
#[derive(Clone)]
pub struct JsonRpcChainClient {
    transport: JsonRpcTransport,
    config: ChainConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

impl JsonRpcChainClient {
    pub fn new(transport: JsonRpcTransport, config: ChainConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Polls until the receipt is in at the configured depth. Only a reverted
    /// receipt is a rejection; node errors while polling are retried until the
    /// caller's timeout fires.
    async fn poll_receipt(&self, handle: TransactionHandle) -> Result<Receipt, ChainError> {
        let hash = handle.hash.to_string();
        loop {
            let Some(raw) = self
                .poll_call::<Option<RawReceipt>>("eth_getTransactionReceipt", json!([hash]))
                .await
            else {
                time::sleep(self.config.poll_interval).await;
                continue;
            };
            let Some(raw) = raw else {
                tracing::debug!(%hash, "transaction not yet seen");
                time::sleep(self.config.poll_interval).await;
                continue;
            };
            let Some(block_hex) = raw.block_number.as_deref() else {
                time::sleep(self.config.poll_interval).await;
                continue;
            };
            if raw.status.as_deref().map(parse_quantity).transpose()? == Some(0) {
                return Err(ChainError::Rejected("transaction reverted".to_string()));
            }
            let block_number = parse_quantity(block_hex)?;
            if self.config.required_confirmations > 1 {
                let Some(head_hex) = self.poll_call::<String>("eth_blockNumber", json!([])).await
                else {
                    time::sleep(self.config.poll_interval).await;
                    continue;
                };
                let head = parse_quantity(&head_hex)?;
                let depth = head.saturating_sub(block_number) + 1;
                if depth < self.config.required_confirmations {
                    tracing::debug!(%hash, depth, "waiting for more confirmations");
                    time::sleep(self.config.poll_interval).await;
                    continue;
                }
            }
            let transaction_hash = parse_hash(&raw.transaction_hash)?;
            return Ok(Receipt {
                transaction_hash,
                block_number,
            });
        }
    }

    async fn poll_call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Option<R> {
        match self.transport.call(method, params).await {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(method, %err, "poll failed, retrying");
                None
            }
        }
    }
}

impl ChainClient for JsonRpcChainClient {
    async fn submit(
        &self,
        from: Address,
        call: ContractCall,
    ) -> Result<TransactionHandle, ChainError> {
        let data = format!("0x{}", hex::encode(abi::encode_call(&call.function)));
        let tx = json!({
            "from": from.to_string(),
            "to": call.to.to_string(),
            "data": data,
        });
        tracing::info!(
            function = abi::signature(&call.function),
            to = %call.to,
            "submitting transaction"
        );
        let hash: String = self.transport.call("eth_sendTransaction", json!([tx])).await?;
        Ok(TransactionHandle {
            hash: parse_hash(&hash)?,
        })
    }

    async fn await_confirmation(
        &self,
        handle: TransactionHandle,
    ) -> Result<Receipt, ChainError> {
        match time::timeout(self.config.confirmation_timeout, self.poll_receipt(handle)).await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(hash = %handle.hash, "confirmation timed out");
                Err(ChainError::Timeout)
            }
        }
    }

    async fn read(&self, call: ContractCall) -> Result<ChainValue, ChainError> {
        let data = format!("0x{}", hex::encode(abi::encode_call(&call.function)));
        let request = json!({
            "to": call.to.to_string(),
            "data": data,
        });
        let raw: String = self
            .transport
            .call("eth_call", json!([request, "latest"]))
            .await?;
        let bytes = decode_hex(&raw)?;
        abi::decode_output(&call.function, &bytes)
    }
}

fn strip_hex_prefix(raw: &str) -> &str {
    raw.strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw)
}

fn parse_quantity(raw: &str) -> Result<u64, ChainError> {
    let digits = strip_hex_prefix(raw);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::InvalidResponse(format!("bad quantity '{raw}': {e}")))
}

fn parse_hash(raw: &str) -> Result<TxHash, ChainError> {
    TxHash::from_str(raw)
        .map_err(|e| ChainError::InvalidResponse(format!("bad transaction hash '{raw}': {e}")))
}

fn decode_hex(raw: &str) -> Result<Vec<u8>, ChainError> {
    hex::decode(strip_hex_prefix(raw))
        .map_err(|e| ChainError::InvalidResponse(format!("bad hex payload: {e}")))
}
