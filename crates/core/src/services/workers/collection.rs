//! Poll producer: sweeps EOA balances into the hot wallet.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, trace};

use crate::error::{SyncError, SyncResult};
use crate::metrics::record_batch_committed;
use crate::models::{
    AddressRole, InternalKind, LedgerTable, NATIVE_TOKEN_ADDRESS, Outgoing, TenantId, TxStatus,
};
use crate::ports::Repositories;
use crate::retry::RetryPolicy;
use crate::services::ledger::earmark_and_insert;

use super::{PollWorker, WorkerConfig, exhausted};

const NAME: &str = "collection";

/// Creates `Unsigned` collection rows for EOA balances at or above the
/// token's threshold and earmarks the swept amount on the EOA.
///
/// An EOA with a collection still in flight for the same token is left
/// alone until that collection lands.
pub struct CollectionWorker<R: Repositories> {
    repositories: Arc<R>,
    retry: RetryPolicy,
    config: WorkerConfig,
}

impl<R: Repositories> CollectionWorker<R> {
    pub fn new(repositories: Arc<R>, retry: RetryPolicy, config: WorkerConfig) -> Self {
        Self {
            repositories,
            retry,
            config,
        }
    }

    /// Sweep one tenant. Returns the number of collection rows created.
    #[instrument(skip(self), fields(tenant = %tenant))]
    pub async fn sweep_tenant(&self, tenant: &TenantId) -> SyncResult<usize> {
        let Some(hot) = self
            .repositories
            .addresses()
            .addresses_by_role(tenant, AddressRole::Hot)
            .await?
            .into_iter()
            .next()
        else {
            trace!("No hot wallet, nothing to sweep into");
            return Ok(0);
        };

        let mut thresholds: HashMap<String, u128> = self
            .repositories
            .tokens()
            .list_tokens(tenant)
            .await?
            .into_iter()
            .map(|t| (t.token_address, t.collect_threshold))
            .collect();
        thresholds.insert(
            NATIVE_TOKEN_ADDRESS.to_string(),
            self.config.native_collect_threshold,
        );

        let ledger = self.repositories.ledger();
        let in_flight: HashSet<(String, String)> = ledger
            .outgoing_by_status(
                tenant,
                LedgerTable::Internals,
                &[TxStatus::Unsigned, TxStatus::Signed, TxStatus::Broadcast],
                u32::MAX,
            )
            .await?
            .into_iter()
            .filter(|row| row.internal_kind == Some(InternalKind::Collection))
            .map(|row| (row.from, row.token_address))
            .collect();

        let candidates: Vec<_> = ledger
            .balances_by_role(tenant, AddressRole::Eoa)
            .await?
            .into_iter()
            .filter_map(|b| {
                let threshold = *thresholds.get(&b.token_address)?;
                let due = threshold > 0 && b.available >= threshold;
                let busy = in_flight.contains(&(b.address.clone(), b.token_address.clone()));
                (due && !busy).then_some((b, threshold))
            })
            .take(self.config.batch_limit as usize)
            .collect();

        let hot = &hot.address;
        let mut created = 0;
        for (balance, threshold) in &candidates {
            let row = self
                .retry
                .run(NAME, || async move {
                    let mut tx = ledger.begin().await?;
                    let current = tx
                        .balance_for_update(tenant, &balance.address, &balance.token_address)
                        .await?;
                    let Some(current) = current.filter(|c| c.available >= *threshold) else {
                        return Ok::<_, SyncError>(None);
                    };
                    let row = Outgoing::new(
                        tenant.clone(),
                        Some(InternalKind::Collection),
                        current.address.clone(),
                        hot.clone(),
                        current.token_address.clone(),
                        current.available,
                    );
                    earmark_and_insert(tx.as_mut(), &row, AddressRole::Eoa).await?;
                    tx.commit().await?;
                    Ok(Some(row))
                })
                .await
                .map_err(|failure| exhausted(NAME, tenant, failure))?;

            if let Some(row) = row {
                info!(
                    id = %row.id,
                    from = %row.from,
                    token = %row.token_address,
                    amount = row.amount,
                    "🧹 Collection requested"
                );
                created += 1;
            }
        }

        if created > 0 {
            record_batch_committed(NAME);
        }
        Ok(created)
    }
}

#[async_trait]
impl<R: Repositories> PollWorker for CollectionWorker<R> {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn tick(&self) -> SyncResult<()> {
        for tenant in self.repositories.tenants().list_tenants().await? {
            self.sweep_tenant(&tenant.id).await?;
        }
        Ok(())
    }
}
