//! Ledger tables for PostgreSQL.
//!
//! Reads outside a transaction go through [`PgLedgerRepository`]; every
//! write goes through a [`PgLedgerTx`] whose reads take row locks
//! (`FOR UPDATE`) so balance read-modify-write cycles cannot interleave.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use custos_core::error::{StorageError, StorageResult};
use custos_core::models::{
    AddressRole, Balance, Deposit, LedgerTable, MovementKind, Outgoing, TenantId, TransactionRecord,
    TxHash, TxStatus,
};
use custos_core::ports::{LedgerRepository, LedgerTx};

use super::database::Database;
use super::helpers::{bytes_to_hash32, map_sqlx_error, parse_amount, parse_enum, parse_tenant_id};

const DEPOSIT_COLUMNS: &str = "id, tenant_id, block_number, tx_hash, from_address, to_address, \
     token_address, amount::TEXT AS amount, fee::TEXT AS fee, status, created_at, updated_at";

const OUTGOING_COLUMNS: &str = "id, tenant_id, internal_kind, from_address, to_address, \
     token_address, amount::TEXT AS amount, fee::TEXT AS fee, status, raw_tx, tx_hash, \
     block_number, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, tenant_id, block_number, tx_hash, from_address, to_address, \
     token_address, amount::TEXT AS amount, fee::TEXT AS fee, kind, status, created_at";

const BALANCE_COLUMNS: &str = "tenant_id, address, token_address, role, \
     available::TEXT AS available, locked::TEXT AS locked, updated_at";

/// Table name of an outgoing ledger table.
fn outgoing_table(table: LedgerTable) -> StorageResult<&'static str> {
    match table {
        LedgerTable::Withdraws | LedgerTable::Internals => Ok(table.as_str()),
        LedgerTable::Deposits => Err(StorageError::QueryError(
            "deposits is not an outgoing table".into(),
        )),
    }
}

fn status_list(statuses: &[TxStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

// =============================================================================
// Repository
// =============================================================================

/// PostgreSQL implementation of LedgerRepository.
pub struct PgLedgerRepository {
    pool: PgPool,
}

impl PgLedgerRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl LedgerRepository for PgLedgerRepository {
    async fn begin(&self) -> StorageResult<Box<dyn LedgerTx>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn deposits_by_status(
        &self,
        tenant: &TenantId,
        statuses: &[TxStatus],
        limit: u32,
    ) -> StorageResult<Vec<Deposit>> {
        let sql = format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits \
             WHERE tenant_id = $1 AND status = ANY($2) \
             ORDER BY created_at LIMIT $3"
        );
        let rows = sqlx::query_as::<_, DepositRow>(&sql)
            .bind(tenant.as_str())
            .bind(status_list(statuses))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(DepositRow::into_deposit).collect()
    }

    async fn outgoing_by_status(
        &self,
        tenant: &TenantId,
        table: LedgerTable,
        statuses: &[TxStatus],
        limit: u32,
    ) -> StorageResult<Vec<Outgoing>> {
        let sql = format!(
            "SELECT {OUTGOING_COLUMNS} FROM {} \
             WHERE tenant_id = $1 AND status = ANY($2) \
             ORDER BY created_at LIMIT $3",
            outgoing_table(table)?
        );
        let rows = sqlx::query_as::<_, OutgoingRow>(&sql)
            .bind(tenant.as_str())
            .bind(status_list(statuses))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(OutgoingRow::into_outgoing).collect()
    }

    async fn list_transactions(
        &self,
        tenant: &TenantId,
        limit: u32,
    ) -> StorageResult<Vec<TransactionRecord>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE tenant_id = $1 \
             ORDER BY block_number DESC, created_at DESC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, TransactionRow>(&sql)
            .bind(tenant.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(TransactionRow::into_record).collect()
    }

    async fn get_balance(
        &self,
        tenant: &TenantId,
        address: &str,
        token_address: &str,
    ) -> StorageResult<Option<Balance>> {
        let sql = format!(
            "SELECT {BALANCE_COLUMNS} FROM balances \
             WHERE tenant_id = $1 AND address = $2 AND token_address = $3"
        );
        let row = sqlx::query_as::<_, BalanceRow>(&sql)
            .bind(tenant.as_str())
            .bind(address)
            .bind(token_address)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(BalanceRow::into_balance).transpose()
    }

    async fn balances_by_role(
        &self,
        tenant: &TenantId,
        role: AddressRole,
    ) -> StorageResult<Vec<Balance>> {
        let sql = format!(
            "SELECT {BALANCE_COLUMNS} FROM balances \
             WHERE tenant_id = $1 AND role = $2 \
             ORDER BY address, token_address"
        );
        let rows = sqlx::query_as::<_, BalanceRow>(&sql)
            .bind(tenant.as_str())
            .bind(role.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(BalanceRow::into_balance).collect()
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// One open database transaction. Dropping it rolls back.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn insert_transaction(&mut self, record: &TransactionRecord) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions (
                id, tenant_id, block_number, tx_hash, from_address, to_address,
                token_address, amount, fee, kind, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8::NUMERIC, $9::NUMERIC, $10, $11, $12)
            ON CONFLICT (tenant_id, tx_hash) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.tenant_id.as_str())
        .bind(record.block_number as i64)
        .bind(&record.tx_hash.0[..])
        .bind(&record.from)
        .bind(&record.to)
        .bind(&record.token_address)
        .bind(record.amount.to_string())
        .bind(record.fee.to_string())
        .bind(record.kind.as_str())
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_deposit(&mut self, deposit: &Deposit) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO deposits (
                id, tenant_id, block_number, tx_hash, from_address, to_address,
                token_address, amount, fee, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8::NUMERIC, $9::NUMERIC, $10, $11, $12)
            ON CONFLICT (tenant_id, tx_hash) DO NOTHING
            "#,
        )
        .bind(deposit.id)
        .bind(deposit.tenant_id.as_str())
        .bind(deposit.block_number as i64)
        .bind(&deposit.tx_hash.0[..])
        .bind(&deposit.from)
        .bind(&deposit.to)
        .bind(&deposit.token_address)
        .bind(deposit.amount.to_string())
        .bind(deposit.fee.to_string())
        .bind(deposit.status.as_str())
        .bind(deposit.created_at)
        .bind(deposit.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_deposit_status(
        &mut self,
        tenant: &TenantId,
        id: Uuid,
        status: TxStatus,
    ) -> StorageResult<()> {
        let result = sqlx::query(
            "UPDATE deposits SET status = $3, updated_at = NOW() WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant.as_str())
        .bind(id)
        .bind(status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("deposit {id}")));
        }
        Ok(())
    }

    async fn insert_outgoing(&mut self, row: &Outgoing) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO {} (
                id, tenant_id, internal_kind, from_address, to_address, token_address,
                amount, fee, status, raw_tx, tx_hash, block_number, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7::NUMERIC, $8::NUMERIC, $9, $10, $11, $12, $13, $14)",
            outgoing_table(row.table())?
        );
        sqlx::query(&sql)
            .bind(row.id)
            .bind(row.tenant_id.as_str())
            .bind(row.internal_kind.map(|k| k.movement().as_str()))
            .bind(&row.from)
            .bind(&row.to)
            .bind(&row.token_address)
            .bind(row.amount.to_string())
            .bind(row.fee.to_string())
            .bind(row.status.as_str())
            .bind(row.raw_tx.as_deref())
            .bind(row.tx_hash.as_ref().map(|h| &h.0[..]))
            .bind(row.block_number.map(|n| n as i64))
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn outgoing_by_id(
        &mut self,
        tenant: &TenantId,
        table: LedgerTable,
        id: Uuid,
    ) -> StorageResult<Option<Outgoing>> {
        let sql = format!(
            "SELECT {OUTGOING_COLUMNS} FROM {} WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
            outgoing_table(table)?
        );
        let row = sqlx::query_as::<_, OutgoingRow>(&sql)
            .bind(tenant.as_str())
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        row.map(OutgoingRow::into_outgoing).transpose()
    }

    async fn outgoing_by_hash(
        &mut self,
        tenant: &TenantId,
        table: LedgerTable,
        hash: &TxHash,
    ) -> StorageResult<Option<Outgoing>> {
        let sql = format!(
            "SELECT {OUTGOING_COLUMNS} FROM {} \
             WHERE tenant_id = $1 AND tx_hash = $2 \
             ORDER BY created_at LIMIT 1 FOR UPDATE",
            outgoing_table(table)?
        );
        let row = sqlx::query_as::<_, OutgoingRow>(&sql)
            .bind(tenant.as_str())
            .bind(&hash.0[..])
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        row.map(OutgoingRow::into_outgoing).transpose()
    }

    async fn update_outgoing(&mut self, row: &Outgoing) -> StorageResult<()> {
        let sql = format!(
            "UPDATE {} SET
                status = $3, raw_tx = $4, tx_hash = $5, block_number = $6,
                fee = $7::NUMERIC, updated_at = $8
            WHERE tenant_id = $1 AND id = $2",
            outgoing_table(row.table())?
        );
        let result = sqlx::query(&sql)
            .bind(row.tenant_id.as_str())
            .bind(row.id)
            .bind(row.status.as_str())
            .bind(row.raw_tx.as_deref())
            .bind(row.tx_hash.as_ref().map(|h| &h.0[..]))
            .bind(row.block_number.map(|n| n as i64))
            .bind(row.fee.to_string())
            .bind(row.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("{} {}", row.table().as_str(), row.id)));
        }
        Ok(())
    }

    async fn balance_for_update(
        &mut self,
        tenant: &TenantId,
        address: &str,
        token_address: &str,
    ) -> StorageResult<Option<Balance>> {
        let sql = format!(
            "SELECT {BALANCE_COLUMNS} FROM balances \
             WHERE tenant_id = $1 AND address = $2 AND token_address = $3 FOR UPDATE"
        );
        let row = sqlx::query_as::<_, BalanceRow>(&sql)
            .bind(tenant.as_str())
            .bind(address)
            .bind(token_address)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;

        row.map(BalanceRow::into_balance).transpose()
    }

    async fn upsert_balance(&mut self, balance: &Balance) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO balances (tenant_id, address, token_address, role, available, locked, updated_at)
            VALUES ($1, $2, $3, $4, $5::NUMERIC, $6::NUMERIC, $7)
            ON CONFLICT (tenant_id, address, token_address) DO UPDATE SET
                available = EXCLUDED.available,
                locked = EXCLUDED.locked,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(balance.tenant_id.as_str())
        .bind(&balance.address)
        .bind(&balance.token_address)
        .bind(balance.role.as_str())
        .bind(balance.available.to_string())
        .bind(balance.locked.to_string())
        .bind(balance.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let PgLedgerTx { tx } = *self;
        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))
    }
}

// =============================================================================
// Rows
// =============================================================================

#[derive(sqlx::FromRow)]
struct DepositRow {
    id: Uuid,
    tenant_id: String,
    block_number: i64,
    tx_hash: Vec<u8>,
    from_address: String,
    to_address: String,
    token_address: String,
    amount: String,
    fee: String,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl DepositRow {
    fn into_deposit(self) -> StorageResult<Deposit> {
        Ok(Deposit {
            id: self.id,
            tenant_id: parse_tenant_id(&self.tenant_id)?,
            block_number: self.block_number as u64,
            tx_hash: TxHash(bytes_to_hash32(self.tx_hash, "deposit.tx_hash")?),
            from: self.from_address,
            to: self.to_address,
            token_address: self.token_address,
            amount: parse_amount(&self.amount, "deposit.amount")?,
            fee: parse_amount(&self.fee, "deposit.fee")?,
            status: parse_enum(&self.status, "deposit.status")?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OutgoingRow {
    id: Uuid,
    tenant_id: String,
    internal_kind: Option<String>,
    from_address: String,
    to_address: String,
    token_address: String,
    amount: String,
    fee: String,
    status: String,
    raw_tx: Option<Vec<u8>>,
    tx_hash: Option<Vec<u8>>,
    block_number: Option<i64>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl OutgoingRow {
    fn into_outgoing(self) -> StorageResult<Outgoing> {
        let internal_kind = self
            .internal_kind
            .map(|k| {
                parse_enum::<MovementKind>(&k, "outgoing.internal_kind")?
                    .internal_kind()
                    .ok_or_else(|| {
                        StorageError::SerializationError(format!(
                            "outgoing.internal_kind: '{k}' is not an internal movement"
                        ))
                    })
            })
            .transpose()?;

        Ok(Outgoing {
            id: self.id,
            tenant_id: parse_tenant_id(&self.tenant_id)?,
            internal_kind,
            from: self.from_address,
            to: self.to_address,
            token_address: self.token_address,
            amount: parse_amount(&self.amount, "outgoing.amount")?,
            fee: parse_amount(&self.fee, "outgoing.fee")?,
            status: parse_enum(&self.status, "outgoing.status")?,
            raw_tx: self.raw_tx,
            tx_hash: self
                .tx_hash
                .map(|h| bytes_to_hash32(h, "outgoing.tx_hash").map(TxHash))
                .transpose()?,
            block_number: self.block_number.map(|n| n as u64),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    tenant_id: String,
    block_number: i64,
    tx_hash: Vec<u8>,
    from_address: String,
    to_address: String,
    token_address: String,
    amount: String,
    fee: String,
    kind: String,
    status: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TransactionRow {
    fn into_record(self) -> StorageResult<TransactionRecord> {
        Ok(TransactionRecord {
            id: self.id,
            tenant_id: parse_tenant_id(&self.tenant_id)?,
            block_number: self.block_number as u64,
            tx_hash: TxHash(bytes_to_hash32(self.tx_hash, "transaction.tx_hash")?),
            from: self.from_address,
            to: self.to_address,
            token_address: self.token_address,
            amount: parse_amount(&self.amount, "transaction.amount")?,
            fee: parse_amount(&self.fee, "transaction.fee")?,
            kind: parse_enum(&self.kind, "transaction.kind")?,
            status: parse_enum(&self.status, "transaction.status")?,
            created_at: self.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BalanceRow {
    tenant_id: String,
    address: String,
    token_address: String,
    role: String,
    available: String,
    locked: String,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl BalanceRow {
    fn into_balance(self) -> StorageResult<Balance> {
        Ok(Balance {
            tenant_id: parse_tenant_id(&self.tenant_id)?,
            address: self.address,
            token_address: self.token_address,
            role: parse_enum(&self.role, "balance.role")?,
            available: parse_amount(&self.available, "balance.available")?,
            locked: parse_amount(&self.locked, "balance.locked")?,
            updated_at: self.updated_at,
        })
    }
}
