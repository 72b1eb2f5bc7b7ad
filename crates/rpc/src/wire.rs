//! JSON-RPC envelopes and Ethereum-style node payloads.
//!
//! Nodes encode integers as `0x`-prefixed hex quantities and byte strings
//! as `0x`-prefixed hex data. Everything here is converted into domain
//! models before leaving the crate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use custos_core::error::{ChainError, ChainResult};
use custos_core::models::{normalize_address, BlockHash, BlockHeader, RawTransaction, TxHash};

// =============================================================================
// Envelopes
// =============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: Value,
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// Error object returned by the node.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

// =============================================================================
// Node Payloads
// =============================================================================

/// Block as returned by `eth_getBlockByNumber(_, false)`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcHeader {
    pub number: String,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: String,
}

impl RpcHeader {
    pub fn into_header(self) -> ChainResult<BlockHeader> {
        let seconds = parse_u64(&self.timestamp, "block.timestamp")?;
        let timestamp = i64::try_from(seconds)
            .ok()
            .and_then(|s| chrono::DateTime::from_timestamp(s, 0))
            .ok_or_else(|| decode_error("block.timestamp", &self.timestamp))?;

        Ok(BlockHeader {
            number: parse_u64(&self.number, "block.number")?,
            hash: parse_hash(&self.hash, "block.hash").map(BlockHash)?,
            parent_hash: parse_hash(&self.parent_hash, "block.parentHash").map(BlockHash)?,
            timestamp,
        })
    }
}

/// Block as returned by `eth_getBlockByNumber(_, true)`.
#[derive(Debug, Deserialize)]
pub(crate) struct RpcFullBlock {
    pub number: String,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcTransaction {
    pub hash: String,
    #[serde(default)]
    pub block_number: Option<String>,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    pub value: String,
    pub input: String,
    pub gas: String,
    #[serde(default)]
    pub gas_price: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RpcReceipt {
    pub transaction_hash: String,
    /// Absent on pre-Byzantium receipts.
    #[serde(default)]
    pub status: Option<String>,
    pub gas_used: String,
    #[serde(default)]
    pub effective_gas_price: Option<String>,
}

impl RpcTransaction {
    /// Convert into the domain model.
    ///
    /// With a receipt the fee is `gasUsed × effectiveGasPrice`; without one
    /// it falls back to the `gas × gasPrice` upper bound.
    pub fn into_raw(self, receipt: Option<&RpcReceipt>) -> ChainResult<RawTransaction> {
        let block_number = match &self.block_number {
            Some(n) => parse_u64(n, "tx.blockNumber")?,
            None => 0,
        };
        let gas_price = self
            .gas_price
            .as_deref()
            .map(|p| parse_u128(p, "tx.gasPrice"))
            .transpose()?
            .unwrap_or(0);

        let (fee, success) = match receipt {
            Some(r) => {
                let used = parse_u128(&r.gas_used, "receipt.gasUsed")?;
                let price = match &r.effective_gas_price {
                    Some(p) => parse_u128(p, "receipt.effectiveGasPrice")?,
                    None => gas_price,
                };
                let success = match &r.status {
                    Some(s) => parse_u64(s, "receipt.status")? == 1,
                    None => true,
                };
                (used.saturating_mul(price), success)
            }
            None => (parse_u128(&self.gas, "tx.gas")?.saturating_mul(gas_price), true),
        };

        let to = match self.to.as_deref() {
            Some(addr) if !addr.is_empty() => Some(parse_address(addr, "tx.to")?),
            _ => None,
        };

        Ok(RawTransaction {
            hash: parse_hash(&self.hash, "tx.hash").map(TxHash)?,
            block_number,
            from: parse_address(&self.from, "tx.from")?,
            to,
            value: parse_u128(&self.value, "tx.value")?,
            input: parse_data(&self.input, "tx.input")?,
            fee,
            success,
        })
    }
}

// =============================================================================
// Hex Helpers
// =============================================================================

fn decode_error(field: &str, raw: &str) -> ChainError {
    ChainError::DecodeError(format!("{} is not valid: '{}'", field, raw))
}

fn strip_hex_prefix(raw: &str) -> Option<&str> {
    raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))
}

/// Encode a block height as a hex quantity.
pub(crate) fn to_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

pub(crate) fn parse_u64(raw: &str, field: &str) -> ChainResult<u64> {
    let digits = strip_hex_prefix(raw).ok_or_else(|| decode_error(field, raw))?;
    if digits.is_empty() {
        return Err(decode_error(field, raw));
    }
    u64::from_str_radix(digits, 16).map_err(|_| decode_error(field, raw))
}

pub(crate) fn parse_u128(raw: &str, field: &str) -> ChainResult<u128> {
    let digits = strip_hex_prefix(raw).ok_or_else(|| decode_error(field, raw))?;
    if digits.is_empty() {
        return Err(decode_error(field, raw));
    }
    u128::from_str_radix(digits, 16).map_err(|_| decode_error(field, raw))
}

pub(crate) fn parse_data(raw: &str, field: &str) -> ChainResult<Vec<u8>> {
    let digits = strip_hex_prefix(raw).ok_or_else(|| decode_error(field, raw))?;
    hex::decode(digits).map_err(|_| decode_error(field, raw))
}

pub(crate) fn parse_hash(raw: &str, field: &str) -> ChainResult<[u8; 32]> {
    parse_data(raw, field)?
        .try_into()
        .map_err(|_| decode_error(field, raw))
}

pub(crate) fn parse_address(raw: &str, field: &str) -> ChainResult<String> {
    normalize_address(raw).map_err(|_| decode_error(field, raw))
}
