//! Poll producer: broadcasts signed withdraws and internal transfers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::metrics::record_batch_committed;
use crate::models::{LedgerTable, TenantId, TxStatus};
use crate::ports::{ChainSource, Repositories};
use crate::retry::RetryPolicy;

use super::{PollWorker, WorkerConfig, exhausted};

/// Sends `Signed` rows of one ledger table and records their hash.
///
/// A row whose broadcast succeeded but whose status write did not is sent
/// again on the next tick; the node answers with the same hash or rejects
/// the duplicate, both harmless.
pub struct BroadcastWorker<C: ChainSource, R: Repositories> {
    name: &'static str,
    table: LedgerTable,
    chain: Arc<C>,
    repositories: Arc<R>,
    retry: RetryPolicy,
    config: WorkerConfig,
}

impl<C: ChainSource, R: Repositories> BroadcastWorker<C, R> {
    /// Worker for the withdraws table.
    pub fn withdraws(chain: Arc<C>, repositories: Arc<R>, retry: RetryPolicy, config: WorkerConfig) -> Self {
        Self {
            name: "withdraw",
            table: LedgerTable::Withdraws,
            chain,
            repositories,
            retry,
            config,
        }
    }

    /// Worker for the internals table.
    pub fn internals(chain: Arc<C>, repositories: Arc<R>, retry: RetryPolicy, config: WorkerConfig) -> Self {
        Self {
            name: "internal",
            table: LedgerTable::Internals,
            chain,
            repositories,
            retry,
            config,
        }
    }

    /// Broadcast one tenant's signed rows. Returns how many moved to
    /// `Broadcast`.
    pub async fn broadcast_tenant(&self, tenant: &TenantId) -> SyncResult<usize> {
        let ledger = self.repositories.ledger();
        let rows = ledger
            .outgoing_by_status(tenant, self.table, &[TxStatus::Signed], self.config.batch_limit)
            .await?;

        let (table, name) = (self.table, self.name);
        let mut broadcast = 0;
        for row in &rows {
            let Some(raw) = row.raw_tx.as_deref() else {
                warn!(worker = name, tenant = %tenant, id = %row.id, "⚠️  Signed row without raw transaction");
                continue;
            };

            let hash = match self.chain.send_raw_transaction(raw).await {
                Ok(hash) => hash,
                Err(e) => {
                    warn!(worker = name, tenant = %tenant, id = %row.id, error = %e, "⚠️  Broadcast failed, will retry");
                    continue;
                }
            };

            let hash = &hash;
            let recorded = self
                .retry
                .run(name, || async move {
                    let mut tx = ledger.begin().await?;
                    let Some(mut current) = tx.outgoing_by_id(tenant, table, row.id).await? else {
                        return Ok::<_, SyncError>(false);
                    };
                    if current.status != TxStatus::Signed {
                        return Ok(false);
                    }
                    current.tx_hash = Some(hash.clone());
                    current.transition(TxStatus::Broadcast)?;
                    tx.update_outgoing(&current).await?;
                    tx.commit().await?;
                    Ok(true)
                })
                .await
                .map_err(|failure| exhausted(name, tenant, failure))?;

            if recorded {
                info!(worker = name, tenant = %tenant, id = %row.id, tx = %hash, "📡 Transaction broadcast");
                broadcast += 1;
            } else {
                debug!(worker = name, id = %row.id, "Row moved on concurrently, skipped");
            }
        }

        if broadcast > 0 {
            record_batch_committed(name);
        }
        Ok(broadcast)
    }
}

#[async_trait]
impl<C: ChainSource, R: Repositories> PollWorker for BroadcastWorker<C, R> {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn tick(&self) -> SyncResult<()> {
        for tenant in self.repositories.tenants().list_tenants().await? {
            self.broadcast_tenant(&tenant.id).await?;
        }
        Ok(())
    }
}
