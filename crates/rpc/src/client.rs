//! Ethereum-compatible JSON-RPC client over HTTP.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, instrument, trace, warn};

use custos_core::error::{ChainError, ChainResult};
use custos_core::models::{BlockHeader, RawTransaction, TxHash};
use custos_core::ports::ChainSource;

use crate::wire::{
    parse_hash, parse_u64, to_quantity, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    RpcFullBlock, RpcHeader, RpcReceipt, RpcTransaction,
};

/// JSON-RPC "method not found".
const METHOD_NOT_FOUND: i64 = -32601;

/// Configuration for the JSON-RPC client.
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// HTTP endpoint (e.g., "http://localhost:8545").
    pub url: String,
    /// Chain id the node must report; `None` skips the check.
    pub chain_id: Option<u64>,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Fetch receipts with one `eth_getBlockReceipts` call per block.
    /// Falls back to per-transaction receipts when the node lacks it.
    pub block_receipts: bool,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8545".to_string(),
            chain_id: None,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            block_receipts: true,
        }
    }
}

/// JSON-RPC client adapter implementing the ChainSource port.
pub struct RpcChainClient {
    http: reqwest::Client,
    config: RpcClientConfig,
    next_id: AtomicU64,
}

impl RpcChainClient {
    /// Build the client and check that the node answers on the expected chain.
    #[instrument(skip_all, fields(url = %config.url))]
    pub async fn connect(config: RpcClientConfig) -> ChainResult<Self> {
        debug!("Connecting to node");

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;

        let client = Self {
            http,
            config,
            next_id: AtomicU64::new(1),
        };

        let reported: String = client
            .call("eth_chainId", json!([]))
            .await?
            .ok_or_else(|| ChainError::DecodeError("eth_chainId returned null".into()))?;
        let reported = parse_u64(&reported, "eth_chainId")?;
        match client.config.chain_id {
            Some(expected) if expected != reported => {
                return Err(ChainError::ConnectionFailed(format!(
                    "node reports chain id {}, expected {}",
                    reported, expected
                )));
            }
            _ => {}
        }

        debug!(chain_id = reported, "Connected successfully");
        Ok(client)
    }

    /// Endpoint this client talks to.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Send one request; the inner `Err` is the node's own error object.
    async fn request(&self, method: &str, params: Value) -> ChainResult<Result<Value, JsonRpcError>> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        trace!(method, id = request.id, "RPC request");

        let response = self
            .http
            .post(&self.config.url)
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::RpcError(format!("{} answered HTTP {}", method, status)));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::DecodeError(format!("{}: {}", method, e)))?;

        match body.error {
            Some(error) => Ok(Err(error)),
            None => Ok(Ok(body.result.unwrap_or(Value::Null))),
        }
    }

    /// Call a method and decode its result; `null` becomes `None`.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> ChainResult<Option<T>> {
        let value = self
            .request(method, params)
            .await?
            .map_err(|e| ChainError::RpcError(format!("{}: {}", method, e)))?;
        decode_result(method, value)
    }

    async fn block_receipts(&self, height: u64, hashes: &[String]) -> ChainResult<Vec<RpcReceipt>> {
        if self.config.block_receipts {
            match self
                .request("eth_getBlockReceipts", json!([to_quantity(height)]))
                .await?
            {
                Ok(value) => {
                    if let Some(receipts) = decode_result("eth_getBlockReceipts", value)? {
                        return Ok(receipts);
                    }
                }
                Err(e) if e.code == METHOD_NOT_FOUND => {
                    warn!(block = height, "⚠️ eth_getBlockReceipts unsupported, using per-transaction receipts");
                }
                Err(e) => {
                    return Err(ChainError::RpcError(format!("eth_getBlockReceipts: {}", e)));
                }
            }
        }

        let mut receipts = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if let Some(receipt) = self.receipt(hash).await? {
                receipts.push(receipt);
            }
        }
        Ok(receipts)
    }

    async fn receipt(&self, hash: &str) -> ChainResult<Option<RpcReceipt>> {
        self.call("eth_getTransactionReceipt", json!([hash])).await
    }
}

#[async_trait]
impl ChainSource for RpcChainClient {
    async fn block_header(&self, height: Option<u64>) -> ChainResult<Option<BlockHeader>> {
        let tag = height.map(to_quantity).unwrap_or_else(|| "latest".to_string());
        let header: Option<RpcHeader> = self.call("eth_getBlockByNumber", json!([tag, false])).await?;
        header.map(RpcHeader::into_header).transpose()
    }

    #[instrument(skip(self), level = "debug")]
    async fn block_transactions(&self, height: u64) -> ChainResult<Vec<RawTransaction>> {
        let block: RpcFullBlock = self
            .call("eth_getBlockByNumber", json!([to_quantity(height), true]))
            .await?
            .ok_or_else(|| ChainError::BlockFetchError {
                height,
                message: "block not found".into(),
            })?;

        let number = parse_u64(&block.number, "block.number")?;
        if number != height {
            return Err(ChainError::BlockFetchError {
                height,
                message: format!("node returned block {}", number),
            });
        }
        if block.transactions.is_empty() {
            return Ok(Vec::new());
        }

        let hashes: Vec<String> = block.transactions.iter().map(|t| t.hash.clone()).collect();
        let mut receipts: HashMap<[u8; 32], RpcReceipt> = HashMap::with_capacity(hashes.len());
        for receipt in self.block_receipts(height, &hashes).await? {
            let key = parse_hash(&receipt.transaction_hash, "receipt.transactionHash")?;
            receipts.insert(key, receipt);
        }

        let mut transactions = Vec::with_capacity(block.transactions.len());
        for tx in block.transactions {
            let key = parse_hash(&tx.hash, "tx.hash")?;
            let receipt = receipts.get(&key).ok_or_else(|| ChainError::BlockFetchError {
                height,
                message: format!("missing receipt for {}", tx.hash),
            })?;
            let mut raw = tx.into_raw(Some(receipt))?;
            raw.block_number = height;
            transactions.push(raw);
        }

        trace!(block = height, count = transactions.len(), "Fetched block transactions");
        Ok(transactions)
    }

    async fn transaction_by_hash(&self, hash: &TxHash) -> ChainResult<Option<RawTransaction>> {
        let hex = hash.to_hex();
        let Some(tx) = self
            .call::<RpcTransaction>("eth_getTransactionByHash", json!([hex]))
            .await?
        else {
            return Ok(None);
        };

        // Pending transactions have no receipt yet.
        let receipt = match tx.block_number {
            Some(_) => self.receipt(&hex).await?,
            None => None,
        };
        tx.into_raw(receipt.as_ref()).map(Some)
    }

    #[instrument(skip_all, fields(bytes = raw.len()))]
    async fn send_raw_transaction(&self, raw: &[u8]) -> ChainResult<TxHash> {
        let data = format!("0x{}", hex::encode(raw));
        let value = self
            .request("eth_sendRawTransaction", json!([data]))
            .await?
            .map_err(|e| ChainError::TxRejected(e.to_string()))?;

        let hash: String = decode_result("eth_sendRawTransaction", value)?
            .ok_or_else(|| ChainError::DecodeError("eth_sendRawTransaction returned null".into()))?;
        let hash = parse_hash(&hash, "eth_sendRawTransaction")?;
        debug!(hash = %TxHash(hash).to_hex(), "Raw transaction accepted");
        Ok(TxHash(hash))
    }
}

fn decode_result<T: DeserializeOwned>(method: &str, value: Value) -> ChainResult<Option<T>> {
    if value.is_null() {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| ChainError::DecodeError(format!("{}: {}", method, e)))
}

fn map_transport_error(err: reqwest::Error) -> ChainError {
    if err.is_connect() || err.is_timeout() {
        ChainError::ConnectionFailed(err.to_string())
    } else {
        ChainError::RpcError(err.to_string())
    }
}
