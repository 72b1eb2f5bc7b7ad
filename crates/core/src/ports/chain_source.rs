//! Port trait for the chain-access RPC service.
//!
//! The engine treats the node as a black-box capability: anything that can
//! answer these calls (JSON-RPC over HTTP, gRPC, a test double) can drive
//! the sync loop. Implementations live in the infrastructure layer
//! (e.g., `custos-rpc`).

use async_trait::async_trait;

use crate::error::ChainResult;
use crate::models::{BlockHeader, RawTransaction, TxHash};

/// Port trait for chain access.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Header at `height`, or the latest header when `height` is `None`.
    ///
    /// Returns `Ok(None)` when the node does not know the block yet.
    async fn block_header(&self, height: Option<u64>) -> ChainResult<Option<BlockHeader>>;

    /// All transactions included in the block at `height`.
    async fn block_transactions(&self, height: u64) -> ChainResult<Vec<RawTransaction>>;

    /// Look a single transaction up by hash.
    async fn transaction_by_hash(&self, hash: &TxHash) -> ChainResult<Option<RawTransaction>>;

    /// Submit a signed raw transaction and return its hash.
    async fn send_raw_transaction(&self, raw: &[u8]) -> ChainResult<TxHash>;
}
