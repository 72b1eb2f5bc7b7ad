//! In-memory implementations of every port, for tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::classifier::TRANSFER_SELECTOR;
use crate::error::{ChainError, ChainResult, NotifyError, NotifyResult, StorageError, StorageResult};
use crate::models::{
    AddressRecord, AddressRole, Balance, BlockHash, BlockHeader, Deposit, LedgerTable, Outgoing,
    RawTransaction, Tenant, TenantId, Token, TransactionRecord, TxHash, TxStatus,
};
use crate::ports::{
    AddressRepository, ChainSource, HeaderRepository, LedgerRepository, LedgerTx, NotifyEvent,
    Notifier, Repositories, TenantRepository, TokenRepository,
};

pub fn tenant_id(id: &str) -> TenantId {
    TenantId::parse(id).unwrap()
}

/// Deterministic header for height `n`.
pub fn header(n: u64) -> BlockHeader {
    BlockHeader {
        number: n,
        hash: BlockHash(block_hash_bytes(n)),
        parent_hash: BlockHash(block_hash_bytes(n.wrapping_sub(1))),
        timestamp: Utc.timestamp_opt(1_700_000_000 + n as i64, 0).unwrap(),
    }
}

fn block_hash_bytes(n: u64) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&n.to_be_bytes());
    bytes
}

/// Transaction hash whose first byte is `tag`.
pub fn tx_hash(tag: u8) -> TxHash {
    let mut bytes = [0u8; 32];
    bytes[0] = tag;
    TxHash(bytes)
}

pub fn native_tx(tag: u8, from: &str, to: &str, value: u128) -> RawTransaction {
    RawTransaction {
        hash: tx_hash(tag),
        block_number: 0,
        from: from.into(),
        to: Some(to.into()),
        value,
        input: Vec::new(),
        fee: 1,
        success: true,
    }
}

/// ERC-20 `transfer(to, amount)` call from `from` to the `token` contract.
pub fn token_tx(tag: u8, from: &str, token: &str, to: &str, amount: u128) -> RawTransaction {
    let mut input = TRANSFER_SELECTOR.to_vec();
    input.extend([0u8; 12]);
    input.extend(hex::decode(to.trim_start_matches("0x")).unwrap());
    input.extend([0u8; 16]);
    input.extend(amount.to_be_bytes());
    RawTransaction {
        input,
        ..native_tx(tag, from, token, 0)
    }
}

// =============================================================================
// Chain
// =============================================================================

#[derive(Default)]
struct ChainState {
    headers: BTreeMap<u64, BlockHeader>,
    transactions: HashMap<u64, Vec<RawTransaction>>,
    head_override: Option<u64>,
    failing_heights: HashSet<u64>,
    unavailable: bool,
    rejecting: bool,
    sent: Vec<Vec<u8>>,
}

/// Scriptable chain.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<ChainState>,
}

impl MockChain {
    /// Chain with empty blocks `0..=head`.
    pub fn with_height(head: u64) -> Self {
        let chain = Self::default();
        for _ in 0..=head {
            chain.push_block(Vec::new());
        }
        chain
    }

    /// Append a block carrying `txs` and return its number.
    pub fn push_block(&self, mut txs: Vec<RawTransaction>) -> u64 {
        let mut state = self.state.lock().unwrap();
        let n = state.headers.keys().next_back().map(|n| n + 1).unwrap_or(0);
        for tx in &mut txs {
            tx.block_number = n;
        }
        state.headers.insert(n, header(n));
        state.transactions.insert(n, txs);
        n
    }

    /// Report `head` as the chain head regardless of known blocks.
    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head_override = Some(head);
    }

    pub fn fail_height(&self, height: u64) {
        self.state.lock().unwrap().failing_heights.insert(height);
    }

    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing_heights.clear();
        state.unavailable = false;
        state.rejecting = false;
    }

    pub fn set_unavailable(&self) {
        self.state.lock().unwrap().unavailable = true;
    }

    pub fn reject_broadcasts(&self) {
        self.state.lock().unwrap().rejecting = true;
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().sent.clone()
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn block_header(&self, height: Option<u64>) -> ChainResult<Option<BlockHeader>> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(ChainError::ConnectionFailed("node down".into()));
        }
        let height = match height {
            Some(h) => h,
            None => match state
                .head_override
                .or_else(|| state.headers.keys().next_back().copied())
            {
                Some(h) => h,
                None => return Ok(None),
            },
        };
        if state.failing_heights.contains(&height) {
            return Err(ChainError::BlockFetchError {
                height,
                message: "injected".into(),
            });
        }
        Ok(state.headers.get(&height).cloned())
    }

    async fn block_transactions(&self, height: u64) -> ChainResult<Vec<RawTransaction>> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(ChainError::ConnectionFailed("node down".into()));
        }
        Ok(state.transactions.get(&height).cloned().unwrap_or_default())
    }

    async fn transaction_by_hash(&self, hash: &TxHash) -> ChainResult<Option<RawTransaction>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .transactions
            .values()
            .flatten()
            .find(|tx| tx.hash == *hash)
            .cloned())
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> ChainResult<TxHash> {
        let mut state = self.state.lock().unwrap();
        if state.rejecting {
            return Err(ChainError::TxRejected("nonce too low".into()));
        }
        state.sent.push(raw.to_vec());
        let mut bytes = [0u8; 32];
        let n = raw.len().min(32);
        bytes[..n].copy_from_slice(&raw[..n]);
        Ok(TxHash(bytes))
    }
}

// =============================================================================
// Store
// =============================================================================

#[derive(Default)]
struct Registry {
    headers: BTreeMap<u64, BlockHeader>,
    tenants: BTreeMap<TenantId, Tenant>,
    addresses: Vec<AddressRecord>,
    tokens: Vec<Token>,
}

#[derive(Default, Clone)]
pub struct LedgerState {
    pub transactions: Vec<TransactionRecord>,
    pub deposits: Vec<Deposit>,
    pub withdraws: Vec<Outgoing>,
    pub internals: Vec<Outgoing>,
    pub balances: HashMap<(TenantId, String, String), Balance>,
}

impl LedgerState {
    fn outgoing(&self, table: LedgerTable) -> &Vec<Outgoing> {
        match table {
            LedgerTable::Internals => &self.internals,
            _ => &self.withdraws,
        }
    }

    fn outgoing_mut(&mut self, table: LedgerTable) -> &mut Vec<Outgoing> {
        match table {
            LedgerTable::Internals => &mut self.internals,
            _ => &mut self.withdraws,
        }
    }
}

/// In-memory store. Ledger transactions are serialized by one lock and
/// applied by swapping a working copy in on commit.
#[derive(Default)]
pub struct InMemoryStore {
    registry: Mutex<Registry>,
    ledger: Arc<AsyncMutex<LedgerState>>,
    failing_commits: Arc<AtomicU32>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits fail with a transient error.
    pub fn fail_next_commits(&self, n: u32) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Snapshot of the ledger tables.
    pub async fn ledger_state(&self) -> LedgerState {
        self.ledger.lock().await.clone()
    }

    pub async fn balance(&self, tenant: &str, address: &str, token: &str) -> Option<Balance> {
        self.ledger
            .lock()
            .await
            .balances
            .get(&(tenant_id(tenant), address.to_string(), token.to_string()))
            .cloned()
    }

    /// Seed a balance directly.
    pub async fn put_balance(&self, balance: Balance) {
        let key = (
            balance.tenant_id.clone(),
            balance.address.clone(),
            balance.token_address.clone(),
        );
        self.ledger.lock().await.balances.insert(key, balance);
    }

    pub fn header_numbers(&self) -> Vec<u64> {
        self.registry.lock().unwrap().headers.keys().copied().collect()
    }
}

#[async_trait]
impl HeaderRepository for InMemoryStore {
    async fn insert_headers(&self, headers: &[BlockHeader]) -> StorageResult<()> {
        let mut registry = self.registry.lock().unwrap();
        for h in headers {
            registry.headers.insert(h.number, h.clone());
        }
        Ok(())
    }

    async fn latest_header(&self) -> StorageResult<Option<BlockHeader>> {
        Ok(self.registry.lock().unwrap().headers.values().next_back().cloned())
    }

    async fn get_header(&self, number: u64) -> StorageResult<Option<BlockHeader>> {
        Ok(self.registry.lock().unwrap().headers.get(&number).cloned())
    }
}

#[async_trait]
impl TenantRepository for InMemoryStore {
    async fn insert_tenant(&self, tenant: &Tenant) -> StorageResult<bool> {
        let mut registry = self.registry.lock().unwrap();
        if registry.tenants.contains_key(&tenant.id) {
            return Ok(false);
        }
        registry.tenants.insert(tenant.id.clone(), tenant.clone());
        Ok(true)
    }

    async fn get_tenant(&self, id: &TenantId) -> StorageResult<Option<Tenant>> {
        Ok(self.registry.lock().unwrap().tenants.get(id).cloned())
    }

    async fn list_tenants(&self) -> StorageResult<Vec<Tenant>> {
        Ok(self.registry.lock().unwrap().tenants.values().cloned().collect())
    }
}

#[async_trait]
impl AddressRepository for InMemoryStore {
    async fn insert_addresses(&self, addresses: &[AddressRecord]) -> StorageResult<u64> {
        let mut registry = self.registry.lock().unwrap();
        let mut inserted = 0;
        for a in addresses {
            let exists = registry
                .addresses
                .iter()
                .any(|r| r.tenant_id == a.tenant_id && r.address == a.address);
            if !exists {
                registry.addresses.push(a.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn list_addresses(&self, tenant: &TenantId) -> StorageResult<Vec<AddressRecord>> {
        let registry = self.registry.lock().unwrap();
        Ok(registry
            .addresses
            .iter()
            .filter(|a| a.tenant_id == *tenant)
            .cloned()
            .collect())
    }

    async fn addresses_by_role(
        &self,
        tenant: &TenantId,
        role: AddressRole,
    ) -> StorageResult<Vec<AddressRecord>> {
        let registry = self.registry.lock().unwrap();
        Ok(registry
            .addresses
            .iter()
            .filter(|a| a.tenant_id == *tenant && a.role == role)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TokenRepository for InMemoryStore {
    async fn upsert_tokens(&self, tokens: &[Token]) -> StorageResult<u64> {
        let mut registry = self.registry.lock().unwrap();
        for t in tokens {
            registry
                .tokens
                .retain(|r| !(r.tenant_id == t.tenant_id && r.token_address == t.token_address));
            registry.tokens.push(t.clone());
        }
        Ok(tokens.len() as u64)
    }

    async fn list_tokens(&self, tenant: &TenantId) -> StorageResult<Vec<Token>> {
        let registry = self.registry.lock().unwrap();
        Ok(registry
            .tokens
            .iter()
            .filter(|t| t.tenant_id == *tenant)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LedgerRepository for InMemoryStore {
    async fn begin(&self) -> StorageResult<Box<dyn LedgerTx>> {
        let guard = Arc::clone(&self.ledger).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            failing_commits: Arc::clone(&self.failing_commits),
        }))
    }

    async fn deposits_by_status(
        &self,
        tenant: &TenantId,
        statuses: &[TxStatus],
        limit: u32,
    ) -> StorageResult<Vec<Deposit>> {
        let state = self.ledger.lock().await;
        Ok(state
            .deposits
            .iter()
            .filter(|d| d.tenant_id == *tenant && statuses.contains(&d.status))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn outgoing_by_status(
        &self,
        tenant: &TenantId,
        table: LedgerTable,
        statuses: &[TxStatus],
        limit: u32,
    ) -> StorageResult<Vec<Outgoing>> {
        let state = self.ledger.lock().await;
        Ok(state
            .outgoing(table)
            .iter()
            .filter(|o| o.tenant_id == *tenant && statuses.contains(&o.status))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn list_transactions(
        &self,
        tenant: &TenantId,
        limit: u32,
    ) -> StorageResult<Vec<TransactionRecord>> {
        let state = self.ledger.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.tenant_id == *tenant)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_balance(
        &self,
        tenant: &TenantId,
        address: &str,
        token_address: &str,
    ) -> StorageResult<Option<Balance>> {
        let state = self.ledger.lock().await;
        Ok(state
            .balances
            .get(&(tenant.clone(), address.to_string(), token_address.to_string()))
            .cloned())
    }

    async fn balances_by_role(
        &self,
        tenant: &TenantId,
        role: AddressRole,
    ) -> StorageResult<Vec<Balance>> {
        let state = self.ledger.lock().await;
        Ok(state
            .balances
            .values()
            .filter(|b| b.tenant_id == *tenant && b.role == role)
            .cloned()
            .collect())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
    failing_commits: Arc<AtomicU32>,
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn insert_transaction(&mut self, record: &TransactionRecord) -> StorageResult<bool> {
        let exists = self
            .working
            .transactions
            .iter()
            .any(|t| t.tenant_id == record.tenant_id && t.tx_hash == record.tx_hash);
        if !exists {
            self.working.transactions.push(record.clone());
        }
        Ok(!exists)
    }

    async fn insert_deposit(&mut self, deposit: &Deposit) -> StorageResult<bool> {
        let exists = self
            .working
            .deposits
            .iter()
            .any(|d| d.tenant_id == deposit.tenant_id && d.tx_hash == deposit.tx_hash);
        if !exists {
            self.working.deposits.push(deposit.clone());
        }
        Ok(!exists)
    }

    async fn update_deposit_status(
        &mut self,
        tenant: &TenantId,
        id: Uuid,
        status: TxStatus,
    ) -> StorageResult<()> {
        let row = self
            .working
            .deposits
            .iter_mut()
            .find(|d| d.tenant_id == *tenant && d.id == id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        row.status = status;
        Ok(())
    }

    async fn insert_outgoing(&mut self, row: &Outgoing) -> StorageResult<()> {
        self.working.outgoing_mut(row.table()).push(row.clone());
        Ok(())
    }

    async fn outgoing_by_id(
        &mut self,
        tenant: &TenantId,
        table: LedgerTable,
        id: Uuid,
    ) -> StorageResult<Option<Outgoing>> {
        Ok(self
            .working
            .outgoing(table)
            .iter()
            .find(|o| o.tenant_id == *tenant && o.id == id)
            .cloned())
    }

    async fn outgoing_by_hash(
        &mut self,
        tenant: &TenantId,
        table: LedgerTable,
        hash: &TxHash,
    ) -> StorageResult<Option<Outgoing>> {
        Ok(self
            .working
            .outgoing(table)
            .iter()
            .find(|o| o.tenant_id == *tenant && o.tx_hash.as_ref() == Some(hash))
            .cloned())
    }

    async fn update_outgoing(&mut self, row: &Outgoing) -> StorageResult<()> {
        let slot = self
            .working
            .outgoing_mut(row.table())
            .iter_mut()
            .find(|o| o.tenant_id == row.tenant_id && o.id == row.id)
            .ok_or_else(|| StorageError::NotFound(row.id.to_string()))?;
        *slot = row.clone();
        Ok(())
    }

    async fn balance_for_update(
        &mut self,
        tenant: &TenantId,
        address: &str,
        token_address: &str,
    ) -> StorageResult<Option<Balance>> {
        Ok(self
            .working
            .balances
            .get(&(tenant.clone(), address.to_string(), token_address.to_string()))
            .cloned())
    }

    async fn upsert_balance(&mut self, balance: &Balance) -> StorageResult<()> {
        let key = (
            balance.tenant_id.clone(),
            balance.address.clone(),
            balance.token_address.clone(),
        );
        self.working.balances.insert(key, balance.clone());
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StorageResult<()> {
        let failing = self.failing_commits.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_commits.store(failing - 1, Ordering::SeqCst);
            return Err(StorageError::TransactionError(
                "could not serialize access".into(),
            ));
        }
        let working = std::mem::take(&mut self.working);
        *self.guard = working;
        Ok(())
    }
}

impl Repositories for InMemoryStore {
    fn headers(&self) -> &dyn HeaderRepository {
        self
    }

    fn tenants(&self) -> &dyn TenantRepository {
        self
    }

    fn addresses(&self) -> &dyn AddressRepository {
        self
    }

    fn tokens(&self) -> &dyn TokenRepository {
        self
    }

    fn ledger(&self) -> &dyn LedgerRepository {
        self
    }
}

// =============================================================================
// Notifier
// =============================================================================

/// Records deliveries; can be switched to failing.
#[derive(Default)]
pub struct RecordingNotifier {
    delivered: Mutex<Vec<(TenantId, NotifyEvent)>>,
    failing: std::sync::atomic::AtomicBool,
}

impl RecordingNotifier {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<(TenantId, NotifyEvent)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, tenant: &Tenant, events: &[NotifyEvent]) -> NotifyResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected {
                url: tenant.notify_url.clone(),
                status: 503,
            });
        }
        let mut delivered = self.delivered.lock().unwrap();
        delivered.extend(events.iter().map(|e| (tenant.id.clone(), e.clone())));
        Ok(())
    }
}
