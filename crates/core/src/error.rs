//! Error types for the synchronization engine.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`DomainError`] - Business rule violations
//! - [`StorageError`] - Database/repository errors
//! - [`ChainError`] - Chain-access RPC errors
//! - [`NotifyError`] - Tenant callback delivery errors
//! - [`SyncError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

use crate::models::TxStatus;

/// Classifies an error as worth retrying or not.
pub trait Retryable {
    /// Whether a retry may succeed without any outside intervention.
    fn is_transient(&self) -> bool;
}

// =============================================================================
// Domain Errors
// =============================================================================

/// Business logic and domain rule violations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Tenant id failed charset/length validation.
    #[error("Invalid tenant id: {0}")]
    InvalidTenantId(String),

    /// Address failed validation.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Tenant is not registered.
    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),

    /// Ledger status moved backwards or sideways.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: TxStatus,
        /// Requested status.
        to: TxStatus,
    },

    /// A balance would become negative.
    #[error("Insufficient {field} balance for {address}: have {available}, need {required}")]
    InsufficientBalance {
        /// Address whose balance was touched.
        address: String,
        /// Which bucket (`available` or `locked`).
        field: &'static str,
        /// Current amount in the bucket.
        available: u128,
        /// Amount the operation required.
        required: u128,
    },

    /// Amount arithmetic overflowed.
    #[error("Amount overflow for {0}")]
    AmountOverflow(String),

    /// Ledger row referenced by an operation does not exist.
    #[error("Ledger row not found: {0}")]
    RowNotFound(String),

    /// Data decoding failed.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// Generic validation error.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl Retryable for DomainError {
    fn is_transient(&self) -> bool {
        match self {
            DomainError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Database and repository errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to establish database connection.
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// SQL query execution failed.
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Database constraint was violated (unique, foreign key, etc.).
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// Transaction begin/commit/rollback failed.
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Data serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Retryable for StorageError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::ConnectionError(_)
                | StorageError::QueryError(_)
                | StorageError::TransactionError(_)
        )
    }
}

// =============================================================================
// Chain Errors
// =============================================================================

/// Chain-access RPC errors.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Transport-level connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// RPC request failed or returned an error object.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// Node response could not be decoded.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Block could not be fetched.
    #[error("Block fetch error at height {height}: {message}")]
    BlockFetchError {
        /// Height that failed to fetch.
        height: u64,
        /// Error details.
        message: String,
    },

    /// Node rejected a raw transaction.
    #[error("Transaction rejected: {0}")]
    TxRejected(String),
}

impl Retryable for ChainError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::ConnectionFailed(_)
                | ChainError::RpcError(_)
                | ChainError::BlockFetchError { .. }
        )
    }
}

// =============================================================================
// Notify Errors
// =============================================================================

/// Tenant callback delivery errors.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Callback could not be reached.
    #[error("Callback unreachable for {url}: {message}")]
    Unreachable {
        /// Callback URL.
        url: String,
        /// Error details.
        message: String,
    },

    /// Callback answered with a non-success status.
    #[error("Callback {url} answered {status}")]
    Rejected {
        /// Callback URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Payload could not be built.
    #[error("Payload error: {0}")]
    Payload(String),
}

impl Retryable for NotifyError {
    fn is_transient(&self) -> bool {
        match self {
            NotifyError::Unreachable { .. } => true,
            NotifyError::Rejected { status, .. } => *status == 429 || *status >= 500,
            NotifyError::Payload(_) => false,
        }
    }
}

// =============================================================================
// Sync Errors
// =============================================================================

/// Top-level orchestration errors returned by the sync loop, workers and
/// task supervisor.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Domain logic error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Storage/database error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Chain connectivity error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Notification delivery error.
    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),

    /// Chain head could not be read.
    #[error("Chain unavailable: {0}")]
    ChainUnavailable(String),

    /// Local cursor is ahead of the confirmed chain head.
    ///
    /// This is a fatal error that requires manual intervention: either the
    /// local header log is corrupt or the confirmation depth was raised.
    #[error("Cursor at block {cursor} is ahead of the confirmed chain head {safe_height}")]
    CursorAheadOfChain {
        /// Last traversed block number.
        cursor: u64,
        /// Head minus confirmation depth.
        safe_height: u64,
    },

    /// A retried operation kept failing.
    #[error("Worker {worker} gave up after {attempts} attempts (tenant {tenant}): {message}")]
    RetryExhausted {
        /// Worker name.
        worker: &'static str,
        /// Tenant being processed.
        tenant: String,
        /// Attempts made.
        attempts: u32,
        /// Last error.
        message: String,
    },

    /// A supervised task panicked.
    #[error("Task {task} panicked: {message}")]
    TaskPanicked {
        /// Task name.
        task: String,
        /// Panic payload.
        message: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Graceful shutdown was requested.
    ///
    /// This is not really an error but uses the error type for control flow.
    #[error("Shutdown requested")]
    ShutdownRequested,
}

impl SyncError {
    /// Whether this error must bring the whole process down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::CursorAheadOfChain { .. }
                | SyncError::RetryExhausted { .. }
                | SyncError::TaskPanicked { .. }
                | SyncError::ConfigError(_)
        )
    }
}

impl Retryable for SyncError {
    fn is_transient(&self) -> bool {
        match self {
            SyncError::Domain(e) => e.is_transient(),
            SyncError::Storage(e) => e.is_transient(),
            SyncError::Chain(e) => e.is_transient(),
            SyncError::ChainUnavailable(_) => true,
            _ => false,
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for orchestration.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Result type for notification delivery.
pub type NotifyResult<T> = Result<T, NotifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    // Test critique: la chaîne de conversion d'erreurs fonctionne
    // Permet d'utiliser ? à travers les couches
    #[test]
    fn test_error_conversion_chain() {
        let storage_err = StorageError::QueryError("db failed".into());
        let domain_err: DomainError = storage_err.into();
        let sync_err: SyncError = domain_err.into();
        assert!(sync_err.to_string().contains("db failed"));

        let chain_err = ChainError::RpcError("rpc failed".into());
        let sync_err: SyncError = chain_err.into();
        assert!(sync_err.to_string().contains("rpc failed"));
    }

    // Test critique: une erreur de stockage enveloppée reste retentable
    #[test]
    fn test_transient_classification_survives_wrapping() {
        let wrapped = DomainError::Storage(StorageError::TransactionError("conflict".into()));
        assert!(wrapped.is_transient());
        assert!(SyncError::from(wrapped).is_transient());

        let balance = DomainError::InsufficientBalance {
            address: "0xabc".into(),
            field: "locked",
            available: 1,
            required: 2,
        };
        assert!(!balance.is_transient());
        assert!(!StorageError::ConstraintViolation("dup".into()).is_transient());
    }

    #[test]
    fn test_callback_statuses() {
        let rejected = |status| NotifyError::Rejected {
            url: "https://t1.example/cb".into(),
            status,
        };
        assert!(rejected(503).is_transient());
        assert!(rejected(429).is_transient());
        assert!(!rejected(400).is_transient());
        assert!(!NotifyError::Payload("bad".into()).is_transient());
    }

    // Test critique: le curseur en avance est fatal et affiche les deux hauteurs
    #[test]
    fn test_cursor_ahead_is_fatal_and_diagnosable() {
        let err = SyncError::CursorAheadOfChain {
            cursor: 120,
            safe_height: 100,
        };
        assert!(err.is_fatal());
        let msg = err.to_string();
        assert!(msg.contains("120") && msg.contains("100"));
        assert!(!SyncError::ChainUnavailable("down".into()).is_fatal());
    }
}
