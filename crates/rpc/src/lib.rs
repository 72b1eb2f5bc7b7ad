//! JSON-RPC chain access for the custos ledger engine.
//!
//! Implements the `ChainSource` port from `custos-core` against any
//! Ethereum-compatible node over HTTP:
//!
//! - `eth_getBlockByNumber` for headers and full blocks
//! - `eth_getBlockReceipts` (or per-transaction receipts) for fees and status
//! - `eth_getTransactionByHash`, `eth_sendRawTransaction`
//!
//! # Usage
//!
//! ```ignore
//! use custos_rpc::{RpcChainClient, RpcClientConfig};
//!
//! let chain = RpcChainClient::connect(RpcClientConfig {
//!     url: rpc_url,
//!     chain_id: Some(1),
//!     ..Default::default()
//! })
//! .await?;
//! ```

mod client;
mod wire;

pub use client::{RpcChainClient, RpcClientConfig};
