//! Ledger bookkeeping.
//!
//! [`apply_batch`] is the write path of the push consumer: it turns one
//! tenant's classified transactions into ledger rows and balance changes
//! inside a caller-owned transaction. [`LedgerService`] is the ingest side:
//! outgoing transfer requests and their signatures.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{DomainError, SyncError, SyncResult};
use crate::metrics::record_unearmarked_outflow;
use crate::models::{
    AddressRole, Balance, ClassifiedTransaction, Deposit, InternalKind, LedgerTable,
    MovementKind, Outgoing, TenantId, TransactionRecord, TxStatus, normalize_address,
};
use crate::ports::{LedgerTx, Repositories};
use crate::retry::RetryPolicy;

// =============================================================================
// Push-consumer write path
// =============================================================================

/// What one tenant batch did to the ledger.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Transactions recorded for the first time.
    pub inserted: usize,
    /// Transactions already recorded by an earlier delivery.
    pub duplicates: usize,
    /// Outgoing rows that reached `WalletDone`.
    pub settled: usize,
    /// Outflows recorded without any earmarked request behind them.
    pub unearmarked: usize,
}

/// Write one tenant's classified transactions.
///
/// Every transaction is recorded once per `(tenant, hash)`. Side effects
/// (deposit rows, settling outgoing rows, balances) only run for first
/// sightings, so replaying a batch is a no-op. Nothing is committed here.
pub async fn apply_batch(
    tx: &mut dyn LedgerTx,
    tenant: &TenantId,
    batch: &[ClassifiedTransaction],
) -> SyncResult<BatchOutcome> {
    let mut outcome = BatchOutcome::default();
    let now = Utc::now();

    for c in batch.iter().filter(|c| c.tenant_id == *tenant) {
        let record = TransactionRecord {
            id: Uuid::new_v4(),
            tenant_id: tenant.clone(),
            block_number: c.block_number,
            tx_hash: c.hash.clone(),
            from: c.from.clone(),
            to: c.to.clone(),
            token_address: c.token_address.clone(),
            amount: c.amount,
            fee: c.fee,
            kind: c.kind,
            status: TxStatus::WalletDone,
            created_at: now,
        };
        if !tx.insert_transaction(&record).await? {
            debug!(tenant = %tenant, tx = %c.hash, "Transaction already recorded");
            outcome.duplicates += 1;
            continue;
        }
        outcome.inserted += 1;

        let table = match c.kind {
            MovementKind::Deposit => {
                let deposit = Deposit {
                    id: Uuid::new_v4(),
                    tenant_id: tenant.clone(),
                    block_number: c.block_number,
                    tx_hash: c.hash.clone(),
                    from: c.from.clone(),
                    to: c.to.clone(),
                    token_address: c.token_address.clone(),
                    amount: c.amount,
                    fee: c.fee,
                    status: TxStatus::WalletDone,
                    created_at: now,
                    updated_at: now,
                };
                tx.insert_deposit(&deposit).await?;
                credit_available(tx, tenant, &c.to, &c.token_address, c.amount, c.kind).await?;
                continue;
            }
            MovementKind::Withdraw => LedgerTable::Withdraws,
            _ => LedgerTable::Internals,
        };

        match settle_outgoing(tx, tenant, table, c).await? {
            Some(row) => {
                outcome.settled += 1;
                debit_locked(tx, tenant, &row, c.kind).await?;
                if c.kind.destination_role().is_some() {
                    credit_available(tx, tenant, &row.to, &row.token_address, row.amount, c.kind)
                        .await?;
                }
            }
            // User-initiated EOA -> hot sweep: credit only.
            None if c.kind == MovementKind::Collection => {
                credit_available(tx, tenant, &c.to, &c.token_address, c.amount, c.kind).await?;
            }
            None => {
                error!(
                    tenant = %tenant,
                    tx = %c.hash,
                    kind = c.kind.as_str(),
                    from = %c.from,
                    amount = %c.amount,
                    "🚨 Outflow without an earmarked request, balances left untouched"
                );
                record_unearmarked_outflow(c.kind);
                outcome.unearmarked += 1;
            }
        }
    }

    Ok(outcome)
}

/// Mark the outgoing row with this hash `WalletDone` and return it.
///
/// `None` when no unsettled row carries the hash.
async fn settle_outgoing(
    tx: &mut dyn LedgerTx,
    tenant: &TenantId,
    table: LedgerTable,
    c: &ClassifiedTransaction,
) -> SyncResult<Option<Outgoing>> {
    let Some(mut row) = tx.outgoing_by_hash(tenant, table, &c.hash).await? else {
        return Ok(None);
    };
    if row.status.is_settled() {
        return Ok(None);
    }
    if row.token_address != c.token_address || row.amount != c.amount {
        warn!(
            tenant = %tenant,
            tx = %c.hash,
            requested = %row.amount,
            observed = %c.amount,
            "⚠️  Mined transfer differs from its request, settling the requested amount"
        );
    }
    row.block_number = Some(c.block_number);
    row.fee = c.fee;
    row.transition(TxStatus::WalletDone)?;
    tx.update_outgoing(&row).await?;
    Ok(Some(row))
}

async fn load_balance(
    tx: &mut dyn LedgerTx,
    tenant: &TenantId,
    address: &str,
    token_address: &str,
    role: AddressRole,
) -> SyncResult<Balance> {
    Ok(tx
        .balance_for_update(tenant, address, token_address)
        .await?
        .unwrap_or_else(|| {
            Balance::empty(tenant.clone(), address.to_string(), token_address.to_string(), role)
        }))
}

async fn credit_available(
    tx: &mut dyn LedgerTx,
    tenant: &TenantId,
    address: &str,
    token_address: &str,
    amount: u128,
    kind: MovementKind,
) -> SyncResult<()> {
    let role = kind.destination_role().unwrap_or(AddressRole::Eoa);
    let mut balance = load_balance(tx, tenant, address, token_address, role).await?;
    balance.credit_available(amount)?;
    tx.upsert_balance(&balance).await?;
    Ok(())
}

/// Release what the request earmarked on the source.
async fn debit_locked(
    tx: &mut dyn LedgerTx,
    tenant: &TenantId,
    row: &Outgoing,
    kind: MovementKind,
) -> SyncResult<()> {
    let role = kind.source_role().unwrap_or(AddressRole::Hot);
    let mut balance = load_balance(tx, tenant, &row.from, &row.token_address, role).await?;
    balance.debit_locked(row.amount)?;
    tx.upsert_balance(&balance).await?;
    Ok(())
}

/// Move `amount` from available to locked on `row.from` and insert `row`.
pub(crate) async fn earmark_and_insert(
    tx: &mut dyn LedgerTx,
    row: &Outgoing,
    source_role: AddressRole,
) -> SyncResult<()> {
    let mut balance =
        load_balance(tx, &row.tenant_id, &row.from, &row.token_address, source_role).await?;
    balance.lock(row.amount)?;
    tx.upsert_balance(&balance).await?;
    tx.insert_outgoing(row).await?;
    Ok(())
}

// =============================================================================
// Ingest
// =============================================================================

/// Outgoing transfer requests.
///
/// Signing happens outside the engine: a request creates an `Unsigned` row
/// and earmarks the funds, the signer attaches the raw transaction later
/// and the broadcast workers take it from there.
pub struct LedgerService<R: Repositories> {
    repositories: Arc<R>,
    retry: RetryPolicy,
}

impl<R: Repositories> LedgerService<R> {
    pub fn new(repositories: Arc<R>, retry: RetryPolicy) -> Self {
        Self {
            repositories,
            retry,
        }
    }

    /// Request a withdraw from the tenant's hot wallet.
    #[instrument(skip(self))]
    pub async fn request_withdraw(
        &self,
        tenant: &TenantId,
        to: &str,
        token_address: &str,
        amount: u128,
    ) -> SyncResult<Outgoing> {
        let hot = self
            .repositories
            .addresses()
            .addresses_by_role(tenant, AddressRole::Hot)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::ValidationError(format!("tenant {tenant} has no hot wallet")))?;

        let row = Outgoing::new(
            tenant.clone(),
            None,
            hot.address,
            normalize_address(to)?,
            normalize_address(token_address)?,
            amount,
        );
        self.insert_request(&row, AddressRole::Hot).await?;
        info!(tenant = %tenant, id = %row.id, amount, "📝 Withdraw requested");
        Ok(row)
    }

    /// Request a custodial transfer. Both ends must be tenant addresses
    /// with the roles `kind` implies.
    #[instrument(skip(self))]
    pub async fn request_internal(
        &self,
        tenant: &TenantId,
        kind: InternalKind,
        from: &str,
        to: &str,
        token_address: &str,
        amount: u128,
    ) -> SyncResult<Outgoing> {
        let movement = kind.movement();
        let (from, to) = (normalize_address(from)?, normalize_address(to)?);
        let addresses = self.repositories.addresses().list_addresses(tenant).await?;
        let role_of = |address: &str| {
            addresses
                .iter()
                .find(|a| a.address == address)
                .map(|a| a.role)
        };
        if role_of(&from) != movement.source_role() || role_of(&to) != movement.destination_role() {
            return Err(DomainError::ValidationError(format!(
                "{from} -> {to} is not a {movement} transfer"
            ))
            .into());
        }

        let source_role = movement.source_role().unwrap_or(AddressRole::Hot);
        let row = Outgoing::new(
            tenant.clone(),
            Some(kind),
            from,
            to,
            normalize_address(token_address)?,
            amount,
        );
        self.insert_request(&row, source_role).await?;
        info!(tenant = %tenant, id = %row.id, kind = %movement, amount, "📝 Internal transfer requested");
        Ok(row)
    }

    async fn insert_request(&self, row: &Outgoing, source_role: AddressRole) -> SyncResult<()> {
        if row.amount == 0 {
            return Err(DomainError::ValidationError("amount must be positive".into()).into());
        }
        if self.repositories.tenants().get_tenant(&row.tenant_id).await?.is_none() {
            return Err(DomainError::UnknownTenant(row.tenant_id.to_string()).into());
        }

        let ledger = self.repositories.ledger();
        self.retry
            .run("ingest", || async move {
                let mut tx = ledger.begin().await?;
                earmark_and_insert(tx.as_mut(), row, source_role).await?;
                tx.commit().await?;
                Ok::<_, SyncError>(())
            })
            .await
            .map_err(|failure| failure.error)
    }

    pub async fn attach_withdraw_signature(
        &self,
        tenant: &TenantId,
        id: Uuid,
        raw_tx: Vec<u8>,
    ) -> SyncResult<Outgoing> {
        self.attach_signature(tenant, LedgerTable::Withdraws, id, raw_tx)
            .await
    }

    pub async fn attach_internal_signature(
        &self,
        tenant: &TenantId,
        id: Uuid,
        raw_tx: Vec<u8>,
    ) -> SyncResult<Outgoing> {
        self.attach_signature(tenant, LedgerTable::Internals, id, raw_tx)
            .await
    }

    #[instrument(skip(self, raw_tx), fields(len = raw_tx.len()))]
    async fn attach_signature(
        &self,
        tenant: &TenantId,
        table: LedgerTable,
        id: Uuid,
        raw_tx: Vec<u8>,
    ) -> SyncResult<Outgoing> {
        if raw_tx.is_empty() {
            return Err(DomainError::ValidationError("signed transaction is empty".into()).into());
        }

        let ledger = self.repositories.ledger();
        let raw_tx = &raw_tx;
        let row = self
            .retry
            .run("ingest", || async move {
                let mut tx = ledger.begin().await?;
                let mut row = tx
                    .outgoing_by_id(tenant, table, id)
                    .await?
                    .ok_or_else(|| DomainError::RowNotFound(format!("{} {}", table.as_str(), id)))?;
                row.transition(TxStatus::Signed)?;
                row.raw_tx = Some(raw_tx.clone());
                tx.update_outgoing(&row).await?;
                tx.commit().await?;
                Ok::<_, SyncError>(row)
            })
            .await
            .map_err(|failure| failure.error)?;

        info!(tenant = %tenant, id = %id, table = table.as_str(), "✍️  Signature attached");
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NATIVE_TOKEN_ADDRESS, TxHash};
    use crate::ports::{AddressRepository, LedgerRepository, TenantRepository};
    use crate::testing::{InMemoryStore, tenant_id, tx_hash};
    use crate::models::{AddressRecord, Tenant};

    const HOT: &str = "0x00000000000000000000000000000000000000b1";
    const COLD: &str = "0x00000000000000000000000000000000000000c1";
    const EOA: &str = "0x00000000000000000000000000000000000000a1";
    const OUTSIDE: &str = "0x00000000000000000000000000000000000000ff";

    async fn store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_tenant(&Tenant {
                id: tenant_id("T1"),
                notify_url: "http://cb".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let records: Vec<_> = [(HOT, AddressRole::Hot), (COLD, AddressRole::Cold), (EOA, AddressRole::Eoa)]
            .into_iter()
            .map(|(address, role)| AddressRecord {
                tenant_id: tenant_id("T1"),
                address: address.into(),
                role,
                public_key: String::new(),
                created_at: Utc::now(),
            })
            .collect();
        store.insert_addresses(&records).await.unwrap();
        store
    }

    fn classified(tag: u8, kind: MovementKind, from: &str, to: &str, amount: u128) -> ClassifiedTransaction {
        ClassifiedTransaction {
            tenant_id: tenant_id("T1"),
            block_number: 5,
            hash: tx_hash(tag),
            from: from.into(),
            to: to.into(),
            token_address: NATIVE_TOKEN_ADDRESS.into(),
            amount,
            fee: 1,
            kind,
        }
    }

    async fn apply(store: &InMemoryStore, batch: &[ClassifiedTransaction]) -> SyncResult<BatchOutcome> {
        let mut tx = store.begin().await?;
        let outcome = apply_batch(tx.as_mut(), &tenant_id("T1"), batch).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    fn service(store: Arc<InMemoryStore>) -> LedgerService<InMemoryStore> {
        LedgerService::new(store, RetryPolicy::default())
    }

    #[tokio::test]
    async fn replayed_batch_has_no_second_effect() {
        let store = store().await;
        let batch = vec![classified(1, MovementKind::Deposit, OUTSIDE, EOA, 100)];

        let first = apply(&store, &batch).await.unwrap();
        let second = apply(&store, &batch).await.unwrap();
        assert_eq!((first.inserted, second.duplicates), (1, 1));

        let state = store.ledger_state().await;
        assert_eq!(state.deposits.len(), 1);
        assert_eq!(state.transactions.len(), 1);
        let balance = store.balance("T1", EOA, NATIVE_TOKEN_ADDRESS).await.unwrap();
        assert_eq!(balance.available, 100);
    }

    /// Insert a broadcast outgoing row as if requested, signed and sent.
    async fn broadcast_row(
        store: &InMemoryStore,
        kind: Option<InternalKind>,
        from: &str,
        to: &str,
        token: &str,
        amount: u128,
        tag: u8,
    ) -> Outgoing {
        let mut row = Outgoing::new(tenant_id("T1"), kind, from.into(), to.into(), token.into(), amount);
        row.tx_hash = Some(tx_hash(tag));
        row.transition(TxStatus::Broadcast).unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.insert_outgoing(&row).await.unwrap();
        tx.commit().await.unwrap();
        row
    }

    fn locked(address: &str, role: AddressRole, token: &str, locked: u128) -> Balance {
        Balance {
            locked,
            ..Balance::empty(tenant_id("T1"), address.into(), token.into(), role)
        }
    }

    // Test critique: un retrait demandé au-delà du verrouillé est rejeté, le lot entier est annulé
    #[tokio::test]
    async fn withdraw_beyond_locked_rolls_back_the_batch() {
        let store = store().await;
        broadcast_row(&store, None, HOT, OUTSIDE, NATIVE_TOKEN_ADDRESS, 50, 2).await;
        store.put_balance(locked(HOT, AddressRole::Hot, NATIVE_TOKEN_ADDRESS, 10)).await;

        let batch = vec![
            classified(1, MovementKind::Deposit, OUTSIDE, EOA, 10),
            classified(2, MovementKind::Withdraw, HOT, OUTSIDE, 50),
        ];
        let err = apply(&store, &batch).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Domain(DomainError::InsufficientBalance { field: "locked", .. })
        ));

        let state = store.ledger_state().await;
        assert!(state.transactions.is_empty());
        assert!(state.deposits.is_empty());
        assert_eq!(state.withdraws[0].status, TxStatus::Broadcast);
        assert_eq!(store.balance("T1", HOT, NATIVE_TOKEN_ADDRESS).await.unwrap().locked, 10);
        assert!(store.balance("T1", EOA, NATIVE_TOKEN_ADDRESS).await.is_none());
    }

    // Test critique: une sortie du hot wallet sans demande est enregistrée sans toucher aux soldes ni bloquer le lot
    #[tokio::test]
    async fn unrequested_outflow_is_recorded_without_balance_effect() {
        let store = store().await;
        let batch = vec![
            classified(1, MovementKind::Withdraw, HOT, OUTSIDE, 10),
            classified(2, MovementKind::HotToCold, HOT, COLD, 7),
            classified(3, MovementKind::Deposit, OUTSIDE, EOA, 5),
        ];
        let outcome = apply(&store, &batch).await.unwrap();
        assert_eq!((outcome.inserted, outcome.settled, outcome.unearmarked), (3, 0, 2));

        let state = store.ledger_state().await;
        assert_eq!(state.transactions.len(), 3);
        assert!(store.balance("T1", HOT, NATIVE_TOKEN_ADDRESS).await.is_none());
        assert!(store.balance("T1", COLD, NATIVE_TOKEN_ADDRESS).await.is_none());
        assert_eq!(store.balance("T1", EOA, NATIVE_TOKEN_ADDRESS).await.unwrap().available, 5);

        // Replays stay quiet.
        let again = apply(&store, &batch).await.unwrap();
        assert_eq!((again.duplicates, again.unearmarked), (3, 0));
    }

    #[tokio::test]
    async fn withdraw_request_earmarks_then_settles() {
        let store = store().await;
        store
            .put_balance(Balance {
                available: 80,
                ..Balance::empty(tenant_id("T1"), HOT.into(), NATIVE_TOKEN_ADDRESS.into(), AddressRole::Hot)
            })
            .await;
        let service = service(store.clone());

        let row = service
            .request_withdraw(&tenant_id("T1"), OUTSIDE, NATIVE_TOKEN_ADDRESS, 50)
            .await
            .unwrap();
        let hot = store.balance("T1", HOT, NATIVE_TOKEN_ADDRESS).await.unwrap();
        assert_eq!((hot.available, hot.locked), (30, 50));

        let signed = service
            .attach_withdraw_signature(&tenant_id("T1"), row.id, vec![9u8; 32])
            .await
            .unwrap();
        assert_eq!(signed.status, TxStatus::Signed);

        // Broadcast by the worker, simulated here.
        {
            let mut tx = store.begin().await.unwrap();
            let mut row = tx
                .outgoing_by_id(&tenant_id("T1"), LedgerTable::Withdraws, row.id)
                .await
                .unwrap()
                .unwrap();
            row.tx_hash = Some(TxHash([9u8; 32]));
            row.transition(TxStatus::Broadcast).unwrap();
            tx.update_outgoing(&row).await.unwrap();
            tx.commit().await.unwrap();
        }

        let mut observed = classified(0, MovementKind::Withdraw, HOT, OUTSIDE, 50);
        observed.hash = TxHash([9u8; 32]);
        let outcome = apply(&store, &[observed]).await.unwrap();
        assert_eq!(outcome.settled, 1);

        let hot = store.balance("T1", HOT, NATIVE_TOKEN_ADDRESS).await.unwrap();
        assert_eq!((hot.available, hot.locked), (30, 0));
        let state = store.ledger_state().await;
        assert_eq!(state.withdraws[0].status, TxStatus::WalletDone);
        assert_eq!(state.withdraws[0].block_number, Some(5));
    }

    #[tokio::test]
    async fn request_validation() {
        let store = store().await;
        let service = service(store.clone());
        let t1 = tenant_id("T1");

        // No funds to earmark.
        assert!(service.request_withdraw(&t1, OUTSIDE, NATIVE_TOKEN_ADDRESS, 1).await.is_err());
        // Wrong roles for the kind.
        assert!(
            service
                .request_internal(&t1, InternalKind::HotToCold, COLD, HOT, NATIVE_TOKEN_ADDRESS, 1)
                .await
                .is_err()
        );
        // Signature on a missing row.
        assert!(matches!(
            service
                .attach_internal_signature(&t1, Uuid::new_v4(), vec![1])
                .await
                .unwrap_err(),
            SyncError::Domain(DomainError::RowNotFound(_))
        ));
        assert!(store.ledger_state().await.withdraws.is_empty());
    }

    #[tokio::test]
    async fn signature_cannot_be_attached_twice() {
        let store = store().await;
        store
            .put_balance(Balance {
                available: 5,
                ..Balance::empty(tenant_id("T1"), HOT.into(), NATIVE_TOKEN_ADDRESS.into(), AddressRole::Hot)
            })
            .await;
        let service = service(store.clone());
        let t1 = tenant_id("T1");
        let row = service
            .request_internal(&t1, InternalKind::HotToCold, HOT, COLD, NATIVE_TOKEN_ADDRESS, 5)
            .await
            .unwrap();
        service.attach_internal_signature(&t1, row.id, vec![1]).await.unwrap();
        let err = service
            .attach_internal_signature(&t1, row.id, vec![2])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Domain(DomainError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn internal_transfer_moves_funds_between_wallets() {
        let store = store().await;
        broadcast_row(&store, Some(InternalKind::HotToCold), HOT, COLD, NATIVE_TOKEN_ADDRESS, 40, 3).await;
        store.put_balance(locked(HOT, AddressRole::Hot, NATIVE_TOKEN_ADDRESS, 40)).await;

        let outcome = apply(&store, &[classified(3, MovementKind::HotToCold, HOT, COLD, 40)])
            .await
            .unwrap();
        assert_eq!(outcome.settled, 1);

        let hot = store.balance("T1", HOT, NATIVE_TOKEN_ADDRESS).await.unwrap();
        let cold = store.balance("T1", COLD, NATIVE_TOKEN_ADDRESS).await.unwrap();
        assert_eq!(hot.locked, 0);
        assert_eq!((cold.available, cold.role), (40, AddressRole::Cold));
    }

    // Test critique: le rapatriement cold -> hot libère le verrouillé du cold et crédite le hot
    #[tokio::test]
    async fn cold_to_hot_settles_the_cold_wallet() {
        let store = store().await;
        broadcast_row(&store, Some(InternalKind::ColdToHot), COLD, HOT, NATIVE_TOKEN_ADDRESS, 25, 4).await;
        store.put_balance(locked(COLD, AddressRole::Cold, NATIVE_TOKEN_ADDRESS, 25)).await;

        let outcome = apply(&store, &[classified(4, MovementKind::ColdToHot, COLD, HOT, 25)])
            .await
            .unwrap();
        assert_eq!(outcome.settled, 1);

        let cold = store.balance("T1", COLD, NATIVE_TOKEN_ADDRESS).await.unwrap();
        let hot = store.balance("T1", HOT, NATIVE_TOKEN_ADDRESS).await.unwrap();
        assert_eq!((cold.available, cold.locked), (0, 0));
        assert_eq!((hot.available, hot.role), (25, AddressRole::Hot));
        let state = store.ledger_state().await;
        assert_eq!(state.internals[0].status, TxStatus::WalletDone);
        assert_eq!(state.internals[0].fee, 1);
    }

    // Test critique: le règlement débite le jeton et le montant de la demande
    #[tokio::test]
    async fn settlement_debits_the_requested_token() {
        const TOKEN: &str = "0x00000000000000000000000000000000000000cc";
        let store = store().await;
        broadcast_row(&store, None, HOT, OUTSIDE, TOKEN, 50, 6).await;
        store.put_balance(locked(HOT, AddressRole::Hot, TOKEN, 50)).await;

        let mut observed = classified(6, MovementKind::Withdraw, HOT, OUTSIDE, 50);
        observed.token_address = TOKEN.into();
        apply(&store, &[observed]).await.unwrap();

        assert_eq!(store.balance("T1", HOT, TOKEN).await.unwrap().locked, 0);
        assert!(store.balance("T1", HOT, NATIVE_TOKEN_ADDRESS).await.is_none());
    }
}
