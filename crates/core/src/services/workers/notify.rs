//! Poll producer: pushes settled ledger rows to the tenant's callback.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::error::{SyncError, SyncResult};
use crate::metrics::{record_batch_committed, record_notifications_sent};
use crate::models::{Deposit, LedgerTable, Outgoing, Tenant, TenantId, TxStatus};
use crate::ports::{LedgerTx, Notifier, NotifyEvent, Repositories};
use crate::retry::RetryPolicy;

use super::{PollWorker, WorkerConfig, exhausted};

const NAME: &str = "notify";

/// Rows of one tenant waiting for delivery.
#[derive(Default)]
struct Pending {
    deposits: Vec<Deposit>,
    outgoing: Vec<Outgoing>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.deposits.is_empty() && self.outgoing.is_empty()
    }

    fn events(&self) -> Vec<NotifyEvent> {
        self.deposits
            .iter()
            .map(NotifyEvent::from)
            .chain(self.outgoing.iter().map(NotifyEvent::from))
            .map(|mut event| {
                event.status = TxStatus::Notified;
                event
            })
            .collect()
    }
}

/// Delivers `WalletDone` rows and finishes them as `Success`.
///
/// Rows are claimed as `Notified` before delivery and only reach `Success`
/// once the tenant acknowledged them. A row left `Notified` by a failed
/// delivery or a crash is delivered again, so tenants see each event at
/// least once.
pub struct NotifyWorker<R: Repositories, N: Notifier> {
    repositories: Arc<R>,
    notifier: Arc<N>,
    retry: RetryPolicy,
    config: WorkerConfig,
}

impl<R: Repositories, N: Notifier> NotifyWorker<R, N> {
    pub fn new(repositories: Arc<R>, notifier: Arc<N>, retry: RetryPolicy, config: WorkerConfig) -> Self {
        Self {
            repositories,
            notifier,
            retry,
            config,
        }
    }

    /// Deliver one tenant's pending rows. Returns how many reached
    /// `Success`.
    #[instrument(skip_all, fields(tenant = %tenant.id))]
    pub async fn notify_tenant(&self, tenant: &Tenant) -> SyncResult<usize> {
        let pending = self.load_pending(&tenant.id).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        self.advance(&tenant.id, &pending, TxStatus::Notified).await?;

        let events = pending.events();
        if let Err(e) = self.notifier.notify(tenant, &events).await {
            warn!(url = %tenant.notify_url, events = events.len(), error = %e, "⚠️  Delivery failed, will retry");
            return Ok(0);
        }
        record_notifications_sent(events.len() as u64);

        self.advance(&tenant.id, &pending, TxStatus::Success).await?;
        record_batch_committed(NAME);
        info!(events = events.len(), "📨 Tenant notified");
        Ok(events.len())
    }

    async fn load_pending(&self, tenant: &TenantId) -> SyncResult<Pending> {
        let ledger = self.repositories.ledger();
        let statuses = [TxStatus::WalletDone, TxStatus::Notified];
        let limit = self.config.batch_limit;

        let mut pending = Pending {
            deposits: ledger.deposits_by_status(tenant, &statuses, limit).await?,
            outgoing: Vec::new(),
        };
        for table in [LedgerTable::Withdraws, LedgerTable::Internals] {
            pending
                .outgoing
                .extend(ledger.outgoing_by_status(tenant, table, &statuses, limit).await?);
        }
        Ok(pending)
    }

    /// Move every pending row still below `to` up to `to` in one retried
    /// transaction.
    async fn advance(&self, tenant: &TenantId, pending: &Pending, to: TxStatus) -> SyncResult<()> {
        let ledger = self.repositories.ledger();
        self.retry
            .run(NAME, || async move {
                let mut tx = ledger.begin().await?;
                advance_rows(tx.as_mut(), tenant, pending, to).await?;
                tx.commit().await?;
                Ok::<_, SyncError>(())
            })
            .await
            .map_err(|failure| exhausted(NAME, tenant, failure))
    }
}

async fn advance_rows(
    tx: &mut dyn LedgerTx,
    tenant: &TenantId,
    pending: &Pending,
    to: TxStatus,
) -> SyncResult<()> {
    for deposit in &pending.deposits {
        if deposit.status < to {
            tx.update_deposit_status(tenant, deposit.id, to).await?;
        }
    }
    for row in &pending.outgoing {
        let Some(mut current) = tx.outgoing_by_id(tenant, row.table(), row.id).await? else {
            continue;
        };
        if current.status < to {
            current.transition(to)?;
            tx.update_outgoing(&current).await?;
        }
    }
    Ok(())
}

#[async_trait]
impl<R: Repositories, N: Notifier> PollWorker for NotifyWorker<R, N> {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn tick(&self) -> SyncResult<()> {
        for tenant in self.repositories.tenants().list_tenants().await? {
            self.notify_tenant(&tenant).await?;
        }
        Ok(())
    }
}
