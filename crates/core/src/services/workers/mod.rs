//! Ledger workers.
//!
//! Two operating modes:
//!
//! - **Push consumer**: [`DepositWorker`] drains the tenant batches the sync
//!   loop publishes and commits them.
//! - **Poll producers**: [`BroadcastWorker`] (withdraws and internal
//!   transfers), [`CollectionWorker`] and [`NotifyWorker`] query rows left
//!   in an intermediate status on every tick and move them forward.
//!
//! All writes for one tenant happen in one transaction wrapped in the
//! [`RetryPolicy`](crate::retry::RetryPolicy). Exhausting the retries is a
//! fatal error for the task group.

mod broadcast;
mod collection;
mod deposit;
mod notify;

pub use broadcast::BroadcastWorker;
pub use collection::CollectionWorker;
pub use deposit::DepositWorker;
pub use notify::NotifyWorker;

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};
use crate::models::TenantId;
use crate::retry::RetryFailure;

/// Configuration shared by the ledger workers.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Poll interval.
    pub interval: Duration,
    /// Maximum rows handled per tenant and tick.
    pub batch_limit: u32,
    /// EOA balance of the native coin that triggers a sweep. Zero disables
    /// native sweeps.
    pub native_collect_threshold: u128,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_limit: 100,
            native_collect_threshold: 0,
        }
    }
}

/// A worker driven by a fixed-interval ticker.
#[async_trait]
pub trait PollWorker: Send + Sync {
    fn name(&self) -> &'static str;

    /// One pass over every tenant.
    async fn tick(&self) -> SyncResult<()>;
}

/// Tick `worker` until cancelled or a fatal error occurs.
///
/// Ticks never overlap; a cancelled token lets the in-flight tick finish.
pub async fn run_poll_worker<W: PollWorker>(
    worker: W,
    interval: Duration,
    token: CancellationToken,
) -> SyncResult<()> {
    let name = worker.name();
    info!(worker = name, interval_ms = interval.as_millis() as u64, "👷 Worker started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!(worker = name, "🛑 Worker stopped");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        match worker.tick().await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(worker = name, error = %e, "⚠️  Worker tick failed"),
        }
    }
}

/// Turn a failed retried ledger transaction into the fatal error.
pub(crate) fn exhausted(
    worker: &'static str,
    tenant: &TenantId,
    failure: RetryFailure<SyncError>,
) -> SyncError {
    SyncError::RetryExhausted {
        worker,
        tenant: tenant.to_string(),
        attempts: failure.attempts,
        message: failure.error.to_string(),
    }
}
