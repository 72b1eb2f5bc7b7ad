//! Domain models for chain data, tenants and their addresses.
//!
//! These models are storage-agnostic and represent the canonical
//! form of synchronized data within the domain layer. Ledger rows and
//! balances live in [`ledger`].

mod ledger;

pub use ledger::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Token address used for movements of the chain's native coin.
pub const NATIVE_TOKEN_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Maximum accepted tenant id length.
pub const MAX_TENANT_ID_LEN: usize = 64;

// =============================================================================
// 32-byte Hash Types
// =============================================================================

/// Macro to generate 32-byte hash newtypes with common functionality.
///
/// Generates:
/// - `from_hex()` - Parse from hex string (with or without 0x prefix)
/// - `to_hex()` - Convert to 0x-prefixed hex string
/// - `Display` trait implementation
/// - `From<[u8; 32]>` implementation
macro_rules! hash32_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Parse from hex string (with or without 0x prefix).
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes = hex::decode(s)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(arr))
            }

            /// Convert to 0x-prefixed hex string.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }

            /// Get the inner bytes.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

hash32_newtype!(
    /// 32-byte block hash.
    BlockHash
);

hash32_newtype!(
    /// 32-byte transaction hash.
    TxHash
);

// =============================================================================
// Tenants
// =============================================================================

/// Validated tenant (business) identifier.
///
/// Only `[A-Za-z0-9_-]` with a length of 1 to [`MAX_TENANT_ID_LEN`] is
/// accepted, so the id is safe to use anywhere storage needs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Validate and wrap a raw tenant id.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let valid_len = !raw.is_empty() && raw.len() <= MAX_TENANT_ID_LEN;
        let valid_chars = raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
        if valid_len && valid_chars {
            Ok(Self(raw.to_string()))
        } else {
            Err(DomainError::InvalidTenantId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

/// A registered tenant and its callback endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    /// URL classified events are pushed to.
    pub notify_url: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Addresses & Tokens
// =============================================================================

/// Role of a tenant-owned address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressRole {
    /// End-customer deposit address (externally owned account).
    Eoa,
    /// Operational custodial wallet.
    Hot,
    /// Long-term custodial wallet.
    Cold,
}

impl AddressRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressRole::Eoa => "eoa",
            AddressRole::Hot => "hot",
            AddressRole::Cold => "cold",
        }
    }
}

impl std::str::FromStr for AddressRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eoa" => Ok(AddressRole::Eoa),
            "hot" => Ok(AddressRole::Hot),
            "cold" => Ok(AddressRole::Cold),
            other => Err(DomainError::ValidationError(format!(
                "unknown address role '{}'",
                other
            ))),
        }
    }
}

/// A tenant-owned address.
///
/// Uniqueness: one role per `(tenant_id, address)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub tenant_id: TenantId,
    /// Normalized (lower-case) address.
    pub address: String,
    pub role: AddressRole,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

/// A token contract registered by a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub tenant_id: TenantId,
    /// Normalized contract address.
    pub token_address: String,
    pub symbol: String,
    pub decimals: u8,
    /// EOA balance at which a collection sweep is created. Zero disables sweeps.
    pub collect_threshold: u128,
}

/// Lower-case an address and validate its shape.
///
/// Accepts `0x`-prefixed hex of any even length so that the engine is not
/// tied to one address width.
pub fn normalize_address(raw: &str) -> DomainResult<String> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| DomainError::InvalidAddress(raw.to_string()))?;
    if body.is_empty() || body.len() % 2 != 0 || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DomainError::InvalidAddress(raw.to_string()));
    }
    Ok(format!("0x{}", body.to_ascii_lowercase()))
}

// =============================================================================
// Chain Data
// =============================================================================

/// Block header as observed on the chain. Immutable once observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    pub timestamp: DateTime<Utc>,
}

/// Transaction as returned by the chain-access RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    pub hash: TxHash,
    pub block_number: u64,
    /// Normalized sender.
    pub from: String,
    /// Normalized recipient, `None` for contract creation.
    pub to: Option<String>,
    /// Native value transferred.
    pub value: u128,
    /// Call data.
    pub input: Vec<u8>,
    /// Fee paid by the sender.
    pub fee: u128,
    /// Whether execution succeeded.
    pub success: bool,
}

/// Classified purpose of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Deposit,
    Withdraw,
    Collection,
    HotToCold,
    ColdToHot,
}

impl MovementKind {
    pub const ALL: [MovementKind; 5] = [
        MovementKind::Deposit,
        MovementKind::Withdraw,
        MovementKind::Collection,
        MovementKind::HotToCold,
        MovementKind::ColdToHot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Deposit => "deposit",
            MovementKind::Withdraw => "withdraw",
            MovementKind::Collection => "collection",
            MovementKind::HotToCold => "hot2cold",
            MovementKind::ColdToHot => "cold2hot",
        }
    }

    /// Internal kind for custodial-to-custodial movements.
    pub fn internal_kind(&self) -> Option<InternalKind> {
        match self {
            MovementKind::Collection => Some(InternalKind::Collection),
            MovementKind::HotToCold => Some(InternalKind::HotToCold),
            MovementKind::ColdToHot => Some(InternalKind::ColdToHot),
            MovementKind::Deposit | MovementKind::Withdraw => None,
        }
    }

    /// Role of the tenant address funds leave, `None` for deposits.
    pub fn source_role(&self) -> Option<AddressRole> {
        match self {
            MovementKind::Deposit => None,
            MovementKind::Withdraw | MovementKind::HotToCold => Some(AddressRole::Hot),
            MovementKind::Collection => Some(AddressRole::Eoa),
            MovementKind::ColdToHot => Some(AddressRole::Cold),
        }
    }

    /// Role of the tenant address funds reach, `None` for withdraws.
    pub fn destination_role(&self) -> Option<AddressRole> {
        match self {
            MovementKind::Deposit => Some(AddressRole::Eoa),
            MovementKind::Withdraw => None,
            MovementKind::Collection | MovementKind::ColdToHot => Some(AddressRole::Hot),
            MovementKind::HotToCold => Some(AddressRole::Cold),
        }
    }
}

impl std::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MovementKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DomainError::ValidationError(format!("unknown movement kind '{}'", s)))
    }
}

/// A transaction with its tenant and movement kind resolved.
///
/// Always the output of the classifier; never created independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedTransaction {
    pub tenant_id: TenantId,
    pub block_number: u64,
    pub hash: TxHash,
    pub from: String,
    pub to: String,
    pub token_address: String,
    pub amount: u128,
    pub fee: u128,
    pub kind: MovementKind,
}

// =============================================================================
// Tests
// =============================================================================
