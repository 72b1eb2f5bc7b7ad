//! Ledger rows, their status machine and balances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AddressRole, MovementKind, TenantId, TxHash};
use crate::error::{DomainError, DomainResult};

// =============================================================================
// Status machine
// =============================================================================

/// Lifecycle of a ledger row.
///
/// Statuses only ever move forward. Skipping ahead is allowed (a deposit is
/// born `WalletDone`), going back or staying put is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Unsigned,
    Signed,
    Broadcast,
    WalletDone,
    Notified,
    Success,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Unsigned => "unsigned",
            TxStatus::Signed => "signed",
            TxStatus::Broadcast => "broadcast",
            TxStatus::WalletDone => "wallet_done",
            TxStatus::Notified => "notified",
            TxStatus::Success => "success",
        }
    }

    /// Validate a transition and return the new status.
    pub fn advance(self, to: TxStatus) -> DomainResult<TxStatus> {
        if to > self {
            Ok(to)
        } else {
            Err(DomainError::InvalidTransition { from: self, to })
        }
    }

    /// Whether the on-chain part of the row's life is over.
    pub fn is_settled(&self) -> bool {
        *self >= TxStatus::WalletDone
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TxStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsigned" => Ok(TxStatus::Unsigned),
            "signed" => Ok(TxStatus::Signed),
            "broadcast" => Ok(TxStatus::Broadcast),
            "wallet_done" => Ok(TxStatus::WalletDone),
            "notified" => Ok(TxStatus::Notified),
            "success" => Ok(TxStatus::Success),
            other => Err(DomainError::ValidationError(format!(
                "unknown status '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// Ledger rows
// =============================================================================

/// Kind of custodial-to-custodial transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalKind {
    Collection,
    HotToCold,
    ColdToHot,
}

impl InternalKind {
    pub fn movement(&self) -> MovementKind {
        match self {
            InternalKind::Collection => MovementKind::Collection,
            InternalKind::HotToCold => MovementKind::HotToCold,
            InternalKind::ColdToHot => MovementKind::ColdToHot,
        }
    }
}

/// Incoming transfer to an end-customer address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub block_number: u64,
    pub tx_hash: TxHash,
    pub from: String,
    pub to: String,
    pub token_address: String,
    pub amount: u128,
    pub fee: u128,
    pub status: TxStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outgoing transfer, shared shape of withdraws and internal transfers.
///
/// Created `Unsigned` by a request, then signed, broadcast and finally
/// observed on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outgoing {
    pub id: Uuid,
    pub tenant_id: TenantId,
    /// `None` for withdraws, the internal kind otherwise.
    pub internal_kind: Option<InternalKind>,
    pub from: String,
    pub to: String,
    pub token_address: String,
    pub amount: u128,
    pub fee: u128,
    pub status: TxStatus,
    /// Signed raw transaction, attached when the row becomes `Signed`.
    pub raw_tx: Option<Vec<u8>>,
    /// Set once broadcast.
    pub tx_hash: Option<TxHash>,
    /// Set once observed on chain.
    pub block_number: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Outgoing {
    /// Build a fresh `Unsigned` row.
    pub fn new(
        tenant_id: TenantId,
        internal_kind: Option<InternalKind>,
        from: String,
        to: String,
        token_address: String,
        amount: u128,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            internal_kind,
            from,
            to,
            token_address,
            amount,
            fee: 0,
            status: TxStatus::Unsigned,
            raw_tx: None,
            tx_hash: None,
            block_number: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Which ledger table this row lives in.
    pub fn table(&self) -> LedgerTable {
        if self.internal_kind.is_some() {
            LedgerTable::Internals
        } else {
            LedgerTable::Withdraws
        }
    }

    /// Move to a new status, rejecting regressions.
    pub fn transition(&mut self, to: TxStatus) -> DomainResult<()> {
        self.status = self.status.advance(to)?;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Ledger tables holding rows with a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerTable {
    Deposits,
    Withdraws,
    Internals,
}

impl LedgerTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerTable::Deposits => "deposits",
            LedgerTable::Withdraws => "withdraws",
            LedgerTable::Internals => "internals",
        }
    }
}

/// Every classified transaction a tenant saw, whatever its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub block_number: u64,
    pub tx_hash: TxHash,
    pub from: String,
    pub to: String,
    pub token_address: String,
    pub amount: u128,
    pub fee: u128,
    pub kind: MovementKind,
    pub status: TxStatus,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Balances
// =============================================================================

/// Per-address, per-token balance.
///
/// `available` is spendable, `locked` is earmarked for an outgoing transfer
/// that has not landed yet. Both stay non-negative: every mutation is
/// checked and a violation is an error, never a clamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub tenant_id: TenantId,
    pub address: String,
    pub token_address: String,
    pub role: AddressRole,
    pub available: u128,
    pub locked: u128,
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// Zero balance for an address.
    pub fn empty(tenant_id: TenantId, address: String, token_address: String, role: AddressRole) -> Self {
        Self {
            tenant_id,
            address,
            token_address,
            role,
            available: 0,
            locked: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn credit_available(&mut self, amount: u128) -> DomainResult<()> {
        self.available = self
            .available
            .checked_add(amount)
            .ok_or_else(|| DomainError::AmountOverflow(self.address.clone()))?;
        self.touch();
        Ok(())
    }

    /// Move funds from `available` to `locked`.
    pub fn lock(&mut self, amount: u128) -> DomainResult<()> {
        let available = self.checked_sub(self.available, amount, "available")?;
        let locked = self
            .locked
            .checked_add(amount)
            .ok_or_else(|| DomainError::AmountOverflow(self.address.clone()))?;
        self.available = available;
        self.locked = locked;
        self.touch();
        Ok(())
    }

    /// Remove earmarked funds once the outgoing transfer landed.
    pub fn debit_locked(&mut self, amount: u128) -> DomainResult<()> {
        self.locked = self.checked_sub(self.locked, amount, "locked")?;
        self.touch();
        Ok(())
    }

    fn checked_sub(&self, have: u128, amount: u128, field: &'static str) -> DomainResult<u128> {
        have.checked_sub(amount)
            .ok_or_else(|| DomainError::InsufficientBalance {
                address: self.address.clone(),
                field,
                available: have,
                required: amount,
            })
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
