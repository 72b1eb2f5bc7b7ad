//! Block header log for PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use custos_core::error::{StorageError, StorageResult};
use custos_core::models::{BlockHash, BlockHeader};
use custos_core::ports::HeaderRepository;

use super::database::Database;
use super::helpers::{bytes_to_hash32, map_sqlx_error};

/// PostgreSQL implementation of HeaderRepository.
pub struct PgHeaderRepository {
    pool: PgPool,
}

impl PgHeaderRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl HeaderRepository for PgHeaderRepository {
    async fn insert_headers(&self, headers: &[BlockHeader]) -> StorageResult<()> {
        if headers.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        for header in headers {
            sqlx::query(
                r#"
                INSERT INTO block_headers (number, hash, parent_hash, timestamp, synced_at)
                VALUES ($1, $2, $3, $4, NOW())
                ON CONFLICT (number) DO UPDATE SET
                    hash = EXCLUDED.hash,
                    parent_hash = EXCLUDED.parent_hash,
                    timestamp = EXCLUDED.timestamp,
                    synced_at = EXCLUDED.synced_at
                "#,
            )
            .bind(header.number as i64)
            .bind(&header.hash.0[..])
            .bind(&header.parent_hash.0[..])
            .bind(header.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }

        tx.commit()
            .await
            .map_err(|e| StorageError::TransactionError(e.to_string()))?;

        Ok(())
    }

    async fn latest_header(&self) -> StorageResult<Option<BlockHeader>> {
        let row = sqlx::query_as::<_, HeaderRow>(
            r#"
            SELECT number, hash, parent_hash, timestamp
            FROM block_headers
            ORDER BY number DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(HeaderRow::into_header).transpose()
    }

    async fn get_header(&self, number: u64) -> StorageResult<Option<BlockHeader>> {
        let row = sqlx::query_as::<_, HeaderRow>(
            r#"
            SELECT number, hash, parent_hash, timestamp
            FROM block_headers
            WHERE number = $1
            "#,
        )
        .bind(number as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(HeaderRow::into_header).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct HeaderRow {
    number: i64,
    hash: Vec<u8>,
    parent_hash: Vec<u8>,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl HeaderRow {
    fn into_header(self) -> StorageResult<BlockHeader> {
        Ok(BlockHeader {
            number: self.number as u64,
            hash: BlockHash(bytes_to_hash32(self.hash, "block_header.hash")?),
            parent_hash: BlockHash(bytes_to_hash32(self.parent_hash, "block_header.parent_hash")?),
            timestamp: self.timestamp,
        })
    }
}
