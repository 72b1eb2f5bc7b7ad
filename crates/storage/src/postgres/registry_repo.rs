//! Tenant, address and token registry for PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use custos_core::error::{StorageError, StorageResult};
use custos_core::models::{AddressRecord, AddressRole, Tenant, TenantId, Token};
use custos_core::ports::{AddressRepository, TenantRepository, TokenRepository};

use super::database::Database;
use super::helpers::{map_sqlx_error, parse_amount, parse_enum, parse_tenant_id};

// =============================================================================
// Tenants
// =============================================================================

/// PostgreSQL implementation of TenantRepository.
pub struct PgTenantRepository {
    pool: PgPool,
}

impl PgTenantRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl TenantRepository for PgTenantRepository {
    async fn insert_tenant(&self, tenant: &Tenant) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO tenants (id, notify_url, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(tenant.id.as_str())
        .bind(&tenant.notify_url)
        .bind(tenant.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_tenant(&self, id: &TenantId) -> StorageResult<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>(
            "SELECT id, notify_url, created_at FROM tenants WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(TenantRow::into_tenant).transpose()
    }

    async fn list_tenants(&self) -> StorageResult<Vec<Tenant>> {
        let rows = sqlx::query_as::<_, TenantRow>(
            "SELECT id, notify_url, created_at FROM tenants ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(TenantRow::into_tenant).collect()
    }
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: String,
    notify_url: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TenantRow {
    fn into_tenant(self) -> StorageResult<Tenant> {
        Ok(Tenant {
            id: parse_tenant_id(&self.id)?,
            notify_url: self.notify_url,
            created_at: self.created_at,
        })
    }
}

// =============================================================================
// Addresses
// =============================================================================

/// PostgreSQL implementation of AddressRepository.
pub struct PgAddressRepository {
    pool: PgPool,
}

impl PgAddressRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl AddressRepository for PgAddressRepository {
    async fn insert_addresses(&self, addresses: &[AddressRecord]) -> StorageResult<u64> {
        if addresses.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        let mut inserted = 0;
        for record in addresses {
            let result = sqlx::query(
                r#"
                INSERT INTO addresses (tenant_id, address, role, public_key, created_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (tenant_id, address) DO NOTHING
                "#,
            )
            .bind(record.tenant_id.as_str())
            .bind(&record.address)
            .bind(record.role.as_str())
            .bind(&record.public_key)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(inserted)
    }

    async fn list_addresses(&self, tenant: &TenantId) -> StorageResult<Vec<AddressRecord>> {
        let rows = sqlx::query_as::<_, AddressRow>(
            r#"
            SELECT tenant_id, address, role, public_key, created_at
            FROM addresses
            WHERE tenant_id = $1
            ORDER BY created_at, address
            "#,
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(AddressRow::into_record).collect()
    }

    async fn addresses_by_role(
        &self,
        tenant: &TenantId,
        role: AddressRole,
    ) -> StorageResult<Vec<AddressRecord>> {
        let rows = sqlx::query_as::<_, AddressRow>(
            r#"
            SELECT tenant_id, address, role, public_key, created_at
            FROM addresses
            WHERE tenant_id = $1 AND role = $2
            ORDER BY created_at, address
            "#,
        )
        .bind(tenant.as_str())
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(AddressRow::into_record).collect()
    }
}

#[derive(sqlx::FromRow)]
struct AddressRow {
    tenant_id: String,
    address: String,
    role: String,
    public_key: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl AddressRow {
    fn into_record(self) -> StorageResult<AddressRecord> {
        Ok(AddressRecord {
            tenant_id: parse_tenant_id(&self.tenant_id)?,
            address: self.address,
            role: parse_enum(&self.role, "address.role")?,
            public_key: self.public_key,
            created_at: self.created_at,
        })
    }
}

// =============================================================================
// Tokens
// =============================================================================

/// PostgreSQL implementation of TokenRepository.
pub struct PgTokenRepository {
    pool: PgPool,
}

impl PgTokenRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn upsert_tokens(&self, tokens: &[Token]) -> StorageResult<u64> {
        if tokens.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        let mut written = 0;
        for token in tokens {
            let result = sqlx::query(
                r#"
                INSERT INTO tokens (tenant_id, token_address, symbol, decimals, collect_threshold)
                VALUES ($1, $2, $3, $4, $5::NUMERIC)
                ON CONFLICT (tenant_id, token_address) DO UPDATE SET
                    symbol = EXCLUDED.symbol,
                    decimals = EXCLUDED.decimals,
                    collect_threshold = EXCLUDED.collect_threshold
                "#,
            )
            .bind(token.tenant_id.as_str())
            .bind(&token.token_address)
            .bind(&token.symbol)
            .bind(token.decimals as i16)
            .bind(token.collect_threshold.to_string())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
            written += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(written)
    }

    async fn list_tokens(&self, tenant: &TenantId) -> StorageResult<Vec<Token>> {
        let rows = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT tenant_id, token_address, symbol, decimals, collect_threshold::TEXT
            FROM tokens
            WHERE tenant_id = $1
            ORDER BY token_address
            "#,
        )
        .bind(tenant.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(TokenRow::into_token).collect()
    }
}

#[derive(sqlx::FromRow)]
struct TokenRow {
    tenant_id: String,
    token_address: String,
    symbol: String,
    decimals: i16,
    collect_threshold: String,
}

impl TokenRow {
    fn into_token(self) -> StorageResult<Token> {
        let decimals = u8::try_from(self.decimals).map_err(|_| {
            StorageError::SerializationError(format!("token.decimals out of range: {}", self.decimals))
        })?;
        Ok(Token {
            tenant_id: parse_tenant_id(&self.tenant_id)?,
            token_address: self.token_address,
            symbol: self.symbol,
            decimals,
            collect_threshold: parse_amount(&self.collect_threshold, "token.collect_threshold")?,
        })
    }
}
