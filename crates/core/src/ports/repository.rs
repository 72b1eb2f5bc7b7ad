//! Port traits for data repositories.
//!
//! These traits define the storage interface used by the domain layer.
//! Implementations live in the infrastructure layer (e.g., `custos-storage`).
//!
//! Every tenant-scoped query takes a [`TenantId`]; there is no way to read
//! or write a ledger row without naming its tenant.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StorageResult;
use crate::models::{
    AddressRecord, AddressRole, Balance, BlockHeader, Deposit, LedgerTable, Outgoing, Tenant,
    TenantId, Token, TransactionRecord, TxHash, TxStatus,
};

// =============================================================================
// Repository Traits
// =============================================================================

/// Append-only log of observed block headers.
#[async_trait]
pub trait HeaderRepository: Send + Sync {
    /// Insert a batch of headers in one write. Re-inserting a number
    /// overwrites it (most-recent-wins).
    async fn insert_headers(&self, headers: &[BlockHeader]) -> StorageResult<()>;

    /// Header with the highest number.
    async fn latest_header(&self) -> StorageResult<Option<BlockHeader>>;

    /// Header by number.
    async fn get_header(&self, number: u64) -> StorageResult<Option<BlockHeader>>;
}

/// Registered tenants.
#[async_trait]
pub trait TenantRepository: Send + Sync {
    /// Insert a tenant. Returns `false` if it already existed.
    async fn insert_tenant(&self, tenant: &Tenant) -> StorageResult<bool>;

    async fn get_tenant(&self, id: &TenantId) -> StorageResult<Option<Tenant>>;

    async fn list_tenants(&self) -> StorageResult<Vec<Tenant>>;
}

/// Tenant-owned addresses.
#[async_trait]
pub trait AddressRepository: Send + Sync {
    /// Insert addresses, skipping existing `(tenant, address)` pairs.
    /// Returns the number of new rows.
    async fn insert_addresses(&self, addresses: &[AddressRecord]) -> StorageResult<u64>;

    async fn list_addresses(&self, tenant: &TenantId) -> StorageResult<Vec<AddressRecord>>;

    /// Addresses of one role, oldest first.
    async fn addresses_by_role(
        &self,
        tenant: &TenantId,
        role: AddressRole,
    ) -> StorageResult<Vec<AddressRecord>>;
}

/// Tenant-registered token contracts.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Insert or update tokens. Returns the number of rows written.
    async fn upsert_tokens(&self, tokens: &[Token]) -> StorageResult<u64>;

    async fn list_tokens(&self, tenant: &TenantId) -> StorageResult<Vec<Token>>;
}

/// Read side of the ledger plus the entry point for transactional writes.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Open a transaction. Dropping it without [`LedgerTx::commit`] rolls
    /// every write back.
    async fn begin(&self) -> StorageResult<Box<dyn LedgerTx>>;

    async fn deposits_by_status(
        &self,
        tenant: &TenantId,
        statuses: &[TxStatus],
        limit: u32,
    ) -> StorageResult<Vec<Deposit>>;

    /// Withdraw or internal rows (`table` must not be `Deposits`).
    async fn outgoing_by_status(
        &self,
        tenant: &TenantId,
        table: LedgerTable,
        statuses: &[TxStatus],
        limit: u32,
    ) -> StorageResult<Vec<Outgoing>>;

    async fn list_transactions(
        &self,
        tenant: &TenantId,
        limit: u32,
    ) -> StorageResult<Vec<TransactionRecord>>;

    async fn get_balance(
        &self,
        tenant: &TenantId,
        address: &str,
        token_address: &str,
    ) -> StorageResult<Option<Balance>>;

    /// Balances of one address role.
    async fn balances_by_role(
        &self,
        tenant: &TenantId,
        role: AddressRole,
    ) -> StorageResult<Vec<Balance>>;
}

/// One database transaction over the ledger tables.
///
/// Reads through this handle lock the rows they return until commit.
#[async_trait]
pub trait LedgerTx: Send {
    /// Insert a transaction record. Returns `false` when `(tenant, hash)`
    /// was already recorded.
    async fn insert_transaction(&mut self, record: &TransactionRecord) -> StorageResult<bool>;

    /// Insert a deposit. Returns `false` when `(tenant, hash)` already exists.
    async fn insert_deposit(&mut self, deposit: &Deposit) -> StorageResult<bool>;

    async fn update_deposit_status(
        &mut self,
        tenant: &TenantId,
        id: Uuid,
        status: TxStatus,
    ) -> StorageResult<()>;

    async fn insert_outgoing(&mut self, row: &Outgoing) -> StorageResult<()>;

    async fn outgoing_by_id(
        &mut self,
        tenant: &TenantId,
        table: LedgerTable,
        id: Uuid,
    ) -> StorageResult<Option<Outgoing>>;

    async fn outgoing_by_hash(
        &mut self,
        tenant: &TenantId,
        table: LedgerTable,
        hash: &TxHash,
    ) -> StorageResult<Option<Outgoing>>;

    /// Persist status, raw tx, hash, block number and fee of a row.
    async fn update_outgoing(&mut self, row: &Outgoing) -> StorageResult<()>;

    async fn balance_for_update(
        &mut self,
        tenant: &TenantId,
        address: &str,
        token_address: &str,
    ) -> StorageResult<Option<Balance>>;

    async fn upsert_balance(&mut self, balance: &Balance) -> StorageResult<()>;

    async fn commit(self: Box<Self>) -> StorageResult<()>;
}

// =============================================================================
// Composite Repository
// =============================================================================

/// Combined repository access for the engine.
pub trait Repositories: Send + Sync {
    fn headers(&self) -> &dyn HeaderRepository;

    fn tenants(&self) -> &dyn TenantRepository;

    fn addresses(&self) -> &dyn AddressRepository;

    fn tokens(&self) -> &dyn TokenRepository;

    fn ledger(&self) -> &dyn LedgerRepository;
}
