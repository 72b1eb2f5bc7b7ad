//! Movement-kind classification.
//!
//! Classification is a pure function of the roles the tenant gave to the
//! sender and the recipient. A call to a token contract registered by the
//! tenant is decoded first: when it is an ERC-20 transfer, only the unwrapped
//! transfer is classified, so a hot wallet paying out tokens is a token
//! withdraw and not a zero-value native one. Other calls fall back to the
//! native roles. A second unwrap never happens.

use std::collections::HashSet;

use crate::cache::AddressCache;
use crate::models::{
    AddressRole, ClassifiedTransaction, MovementKind, NATIVE_TOKEN_ADDRESS, RawTransaction,
    TenantId,
};

/// `transfer(address,uint256)`
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
/// `transferFrom(address,address,uint256)`
pub const TRANSFER_FROM_SELECTOR: [u8; 4] = [0x23, 0xb8, 0x72, 0xdd];

const WORD: usize = 32;

/// Decision table over the tenant roles of `from` and `to`.
///
/// `None` means the address is not a tenant address. Rows are evaluated top
/// to bottom and the first match wins.
pub fn classify_roles(from: Option<AddressRole>, to: Option<AddressRole>) -> Option<MovementKind> {
    use AddressRole::*;

    match (from, to) {
        (None, Some(Eoa)) => Some(MovementKind::Deposit),
        (Some(Hot), None) => Some(MovementKind::Withdraw),
        (Some(Eoa), Some(Hot)) => Some(MovementKind::Collection),
        (Some(Hot), Some(Cold)) => Some(MovementKind::HotToCold),
        (Some(Cold), Some(Hot)) => Some(MovementKind::ColdToHot),
        _ => None,
    }
}

/// Decoded ERC-20 transfer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    /// Token holder for `transferFrom`, `None` for `transfer`.
    pub from: Option<String>,
    pub to: String,
    pub amount: u128,
}

/// Decode `transfer`/`transferFrom` call data.
///
/// Returns `None` for any other selector, truncated data, or an amount that
/// does not fit in 128 bits.
pub fn decode_token_transfer(input: &[u8]) -> Option<TokenTransfer> {
    let (selector, args) = input.split_at_checked(4)?;
    if selector == TRANSFER_SELECTOR {
        Some(TokenTransfer {
            from: None,
            to: word_address(args, 0)?,
            amount: word_amount(args, 1)?,
        })
    } else if selector == TRANSFER_FROM_SELECTOR {
        Some(TokenTransfer {
            from: Some(word_address(args, 0)?),
            to: word_address(args, 1)?,
            amount: word_amount(args, 2)?,
        })
    } else {
        None
    }
}

fn word(args: &[u8], index: usize) -> Option<&[u8]> {
    args.get(index * WORD..(index + 1) * WORD)
}

fn word_address(args: &[u8], index: usize) -> Option<String> {
    let w = word(args, index)?;
    if w[..12].iter().any(|b| *b != 0) {
        return None;
    }
    Some(format!("0x{}", hex::encode(&w[12..])))
}

fn word_amount(args: &[u8], index: usize) -> Option<u128> {
    let w = word(args, index)?;
    if w[..16].iter().any(|b| *b != 0) {
        return None;
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&w[16..]);
    Some(u128::from_be_bytes(low))
}

/// Outcome of classifying one transaction for one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Classified(ClassifiedTransaction),
    /// Touches a tenant address but matches no movement kind.
    Unknown,
    /// Touches no tenant address.
    Unrelated,
}

impl Classification {
    pub fn into_classified(self) -> Option<ClassifiedTransaction> {
        match self {
            Classification::Classified(c) => Some(c),
            _ => None,
        }
    }
}

/// Classify one transaction for one tenant.
///
/// `tokens` holds the normalized contract addresses the tenant registered.
/// Cache misses count as "not a tenant address".
pub fn classify(
    tenant: &TenantId,
    tx: &RawTransaction,
    cache: &AddressCache,
    tokens: &HashSet<String>,
) -> Classification {
    let role = |address: &str| cache.get(tenant, address).map(|c| c.role);
    let from_role = role(&tx.from);

    let Some(to) = tx.to.as_deref() else {
        return unmatched(from_role, None);
    };
    let to_role = role(to);

    let transfer = tokens
        .contains(to)
        .then(|| decode_token_transfer(&tx.input))
        .flatten();
    if let Some(transfer) = transfer {
        let from = transfer.from.unwrap_or_else(|| tx.from.clone());
        let (token_from_role, token_to_role) = (role(&from), role(&transfer.to));
        if let Some(kind) = classify_roles(token_from_role, token_to_role) {
            return Classification::Classified(ClassifiedTransaction {
                tenant_id: tenant.clone(),
                block_number: tx.block_number,
                hash: tx.hash.clone(),
                from,
                to: transfer.to,
                token_address: to.to_string(),
                amount: transfer.amount,
                fee: tx.fee,
                kind,
            });
        }
        return unmatched(token_from_role.or(from_role), token_to_role);
    }

    match classify_roles(from_role, to_role) {
        Some(kind) => Classification::Classified(ClassifiedTransaction {
            tenant_id: tenant.clone(),
            block_number: tx.block_number,
            hash: tx.hash.clone(),
            from: tx.from.clone(),
            to: to.to_string(),
            token_address: NATIVE_TOKEN_ADDRESS.to_string(),
            amount: tx.value,
            fee: tx.fee,
            kind,
        }),
        None => unmatched(from_role, to_role),
    }
}

fn unmatched(from: Option<AddressRole>, to: Option<AddressRole>) -> Classification {
    if from.is_some() || to.is_some() {
        Classification::Unknown
    } else {
        Classification::Unrelated
    }
}
