//! Shared helper functions for PostgreSQL row conversion.

use std::str::FromStr;

use custos_core::error::{StorageError, StorageResult};
use custos_core::models::TenantId;

/// SQLSTATE codes a retry can get past.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

/// Map a driver error onto the storage taxonomy.
///
/// Serialization failures and deadlocks become `TransactionError` so the
/// retry policy replays the whole transaction; integrity violations become
/// `ConstraintViolation` and are never retried.
pub fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code();
            match code.as_deref() {
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
                    StorageError::TransactionError(err.to_string())
                }
                // Class 23: integrity constraint violation.
                Some(c) if c.starts_with("23") => StorageError::ConstraintViolation(err.to_string()),
                _ => StorageError::QueryError(err.to_string()),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StorageError::ConnectionError(err.to_string())
        }
        _ => StorageError::QueryError(err.to_string()),
    }
}

/// Convert a `Vec<u8>` to a fixed-size 32-byte array.
///
/// Returns an error if the length doesn't match.
pub fn bytes_to_hash32(bytes: Vec<u8>, field_name: &str) -> StorageResult<[u8; 32]> {
    bytes.try_into().map_err(|v: Vec<u8>| {
        StorageError::SerializationError(format!(
            "{} has invalid length: expected 32, got {}",
            field_name,
            v.len()
        ))
    })
}

/// Parse a `NUMERIC` column selected as text.
pub fn parse_amount(text: &str, field_name: &str) -> StorageResult<u128> {
    text.parse::<u128>().map_err(|_| {
        StorageError::SerializationError(format!(
            "{} is not an unsigned 128-bit amount: '{}'",
            field_name, text
        ))
    })
}

/// Parse an enum stored as text.
pub fn parse_enum<T>(text: &str, field_name: &str) -> StorageResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    text.parse::<T>()
        .map_err(|e| StorageError::SerializationError(format!("{}: {}", field_name, e)))
}

/// Re-validate a tenant id read back from storage.
pub fn parse_tenant_id(raw: &str) -> StorageResult<TenantId> {
    TenantId::parse(raw).map_err(|e| StorageError::SerializationError(e.to_string()))
}
