//! Port trait for delivering ledger events to tenant callbacks.
//!
//! Delivery retries belong to the notifier; the notify worker only
//! redelivers rows that were never acknowledged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NotifyResult;
use crate::models::{Deposit, MovementKind, Outgoing, Tenant, TxHash, TxStatus};

/// One ledger row as pushed to a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyEvent {
    pub id: Uuid,
    pub kind: MovementKind,
    pub tx_hash: Option<TxHash>,
    pub block_number: Option<u64>,
    pub from: String,
    pub to: String,
    pub token_address: String,
    /// Decimal string, amounts may exceed JSON number precision.
    pub amount: String,
    pub fee: String,
    pub status: TxStatus,
}

impl From<&Deposit> for NotifyEvent {
    fn from(d: &Deposit) -> Self {
        Self {
            id: d.id,
            kind: MovementKind::Deposit,
            tx_hash: Some(d.tx_hash.clone()),
            block_number: Some(d.block_number),
            from: d.from.clone(),
            to: d.to.clone(),
            token_address: d.token_address.clone(),
            amount: d.amount.to_string(),
            fee: d.fee.to_string(),
            status: d.status,
        }
    }
}

impl From<&Outgoing> for NotifyEvent {
    fn from(o: &Outgoing) -> Self {
        Self {
            id: o.id,
            kind: o
                .internal_kind
                .map(|k| k.movement())
                .unwrap_or(MovementKind::Withdraw),
            tx_hash: o.tx_hash.clone(),
            block_number: o.block_number,
            from: o.from.clone(),
            to: o.to.clone(),
            token_address: o.token_address.clone(),
            amount: o.amount.to_string(),
            fee: o.fee.to_string(),
            status: o.status,
        }
    }
}

/// Port trait for tenant notification delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a batch of events to the tenant's callback.
    ///
    /// `Ok` means the tenant acknowledged every event in the batch.
    async fn notify(&self, tenant: &Tenant, events: &[NotifyEvent]) -> NotifyResult<()>;
}
