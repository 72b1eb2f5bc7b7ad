//! Push consumer: commits the tenant batches published by the sync loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::error::{SyncError, SyncResult};
use crate::metrics::record_batch_committed;
use crate::ports::Repositories;
use crate::retry::RetryPolicy;
use crate::services::ledger::apply_batch;
use crate::services::synchronizer::TenantBatch;

use super::exhausted;

const NAME: &str = "deposit";

/// Drains the tenant batch channel.
///
/// Each tenant's slice of a batch is written in its own retried
/// transaction; tenants never share a transaction, so one tenant's failure
/// cannot roll another's rows back.
pub struct DepositWorker<R: Repositories> {
    repositories: Arc<R>,
    retry: RetryPolicy,
    receiver: mpsc::Receiver<TenantBatch>,
}

impl<R: Repositories> DepositWorker<R> {
    pub fn new(repositories: Arc<R>, retry: RetryPolicy, receiver: mpsc::Receiver<TenantBatch>) -> Self {
        Self {
            repositories,
            retry,
            receiver,
        }
    }

    /// Consume batches until cancelled or the channel closes.
    pub async fn run(mut self, token: CancellationToken) -> SyncResult<()> {
        info!(worker = NAME, "👷 Worker started");
        loop {
            let batch = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!(worker = NAME, "🛑 Worker stopped");
                    return Ok(());
                }
                batch = self.receiver.recv() => match batch {
                    Some(batch) => batch,
                    None => {
                        info!(worker = NAME, "🛑 Batch channel closed");
                        return Ok(());
                    }
                },
            };

            self.commit_batch(batch).await?;
        }
    }

    /// Commit every tenant of one batch. Returns the number of newly
    /// recorded transactions.
    #[instrument(skip_all, fields(tenants = batch.len()))]
    pub async fn commit_batch(&self, batch: TenantBatch) -> SyncResult<usize> {
        let mut tenants: Vec<_> = batch.into_iter().collect();
        tenants.sort_by(|a, b| a.0.cmp(&b.0));

        let ledger = self.repositories.ledger();
        let mut inserted = 0;
        for (tenant, transactions) in &tenants {
            let outcome = self
                .retry
                .run(NAME, || async move {
                    let mut tx = ledger.begin().await?;
                    let outcome = apply_batch(tx.as_mut(), tenant, transactions).await?;
                    tx.commit().await?;
                    Ok::<_, SyncError>(outcome)
                })
                .await
                .map_err(|failure| exhausted(NAME, tenant, failure))?;

            record_batch_committed(NAME);
            info!(
                tenant = %tenant,
                inserted = outcome.inserted,
                duplicates = outcome.duplicates,
                settled = outcome.settled,
                unearmarked = outcome.unearmarked,
                "💾 Tenant batch committed"
            );
            inserted += outcome.inserted;
        }
        Ok(inserted)
    }
}
