//! JSON-RPC client for on-chain data.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;

/// Read access to a chain endpoint.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Current block height.
    async fn block_number(&self) -> Result<u64>;

    /// Logs emitted by `address` with `topic0 == topic` in `[from_block, to_block]`.
    async fn get_logs(
        &self,
        address: &str,
        topic: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>>;

    async fn get_transaction(&self, hash: &str) -> Result<Option<Transaction>>;

    async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<TransactionReceipt>>;

    /// Deployed bytecode as hex, `0x` for externally owned accounts.
    async fn get_code(&self, address: &str) -> Result<String>;
}

/// HTTP JSON-RPC client for querying blockchain data.
pub struct ChainClient {
    rpc_url: String,
    http_client: reqwest::Client,
    next_id: AtomicU64,
}

impl ChainClient {
    /// Create a new client with a bounded per-request timeout.
    pub fn new(rpc_url: String, timeout: StdDuration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            rpc_url,
            http_client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Get the current block number.
    pub async fn get_block_number(&self) -> Result<u64> {
        let block_hex: String = self
            .rpc_call("eth_blockNumber", serde_json::json!([]))
            .await?
            .ok_or_else(|| Error::Rpc {
                message: "No result in eth_blockNumber response".to_string(),
                code: None,
            })?;

        parse_hex_u64(&block_hex).ok_or_else(|| Error::Rpc {
            message: format!("Failed to parse block number: {}", block_hex),
            code: None,
        })
    }

    /// Get logs for a contract.
    pub async fn get_logs(
        &self,
        contract_address: &str,
        from_block: u64,
        to_block: u64,
        topics: Option<Vec<String>>,
    ) -> Result<Vec<RawLog>> {
        let params = serde_json::json!([{
            "address": contract_address,
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
            "topics": topics.unwrap_or_default()
        }]);

        let logs: Option<Vec<RawLog>> = self.rpc_call("eth_getLogs", params).await?;
        Ok(logs.unwrap_or_default())
    }

    pub async fn get_transaction_by_hash(&self, hash: &str) -> Result<Option<Transaction>> {
        self.rpc_call("eth_getTransactionByHash", serde_json::json!([hash]))
            .await
    }

    pub async fn get_receipt(&self, hash: &str) -> Result<Option<TransactionReceipt>> {
        self.rpc_call("eth_getTransactionReceipt", serde_json::json!([hash]))
            .await
    }

    pub async fn get_code_at(&self, address: &str) -> Result<String> {
        let code: Option<String> = self
            .rpc_call("eth_getCode", serde_json::json!([address, "latest"]))
            .await?;
        Ok(code.unwrap_or_else(|| "0x".to_string()))
    }

    async fn rpc_call<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Api {
                message: format!("RPC request {} failed: {}", method, response.status()),
                status: Some(response.status().as_u16()),
            });
        }

        let body: JsonRpcResponse<T> = response.json().await?;
        if let Some(error) = body.error {
            return Err(Error::Rpc {
                message: format!("{}: {}", method, error.message),
                code: Some(error.code),
            });
        }

        Ok(body.result)
    }
}

#[async_trait]
impl ChainReader for ChainClient {
    async fn block_number(&self) -> Result<u64> {
        self.get_block_number().await
    }

    async fn get_logs(
        &self,
        address: &str,
        topic: &str,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLog>> {
        ChainClient::get_logs(self, address, from_block, to_block, Some(vec![topic.to_string()]))
            .await
    }

    async fn get_transaction(&self, hash: &str) -> Result<Option<Transaction>> {
        self.get_transaction_by_hash(hash).await
    }

    async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<TransactionReceipt>> {
        self.get_receipt(hash).await
    }

    async fn get_code(&self, address: &str) -> Result<String> {
        self.get_code_at(address).await
    }
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(value: &str) -> Option<u64> {
    let digits = value.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'a str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Ethereum log entry as returned by `eth_getLogs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLog {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(rename = "blockNumber", default)]
    pub block_number: String,
    #[serde(rename = "transactionHash", default)]
    pub transaction_hash: String,
    #[serde(rename = "logIndex", default)]
    pub log_index: String,
}

/// Subset of `eth_getTransactionByHash` used for classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    /// Hex wei amount.
    pub value: String,
    #[serde(default)]
    pub gas: Option<String>,
    #[serde(rename = "blockNumber", default)]
    pub block_number: Option<String>,
}

/// Subset of `eth_getTransactionReceipt` used for classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    #[serde(rename = "gasUsed")]
    pub gas_used: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<RawLog>,
}
