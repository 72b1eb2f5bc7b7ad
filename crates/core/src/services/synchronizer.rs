//! Ticker-driven synchronization loop.
//!
//! Pulls header windows, classifies every transaction for every tenant,
//! persists the headers and publishes tenant batches on the shared channel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::cache::AddressCache;
use crate::classifier::{Classification, classify};
use crate::error::{Retryable, SyncError, SyncResult};
use crate::metrics::{
    ProcessingTimer, record_blocks_synced, record_classified, record_unclassified,
};
use crate::models::{BlockHeader, ClassifiedTransaction, TenantId};
use crate::ports::{ChainSource, Repositories};

use super::window::HeaderWindow;

/// Largest header window one tick may pull.
pub const MAX_BATCH_SIZE: u64 = 10_000;

/// Classified transactions of one sync batch, grouped by tenant.
pub type TenantBatch = HashMap<TenantId, Vec<ClassifiedTransaction>>;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the sync loop.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Chain identifier, for logs.
    pub chain_id: String,
    /// Blocks a transaction must be behind the head.
    pub confirmations: u64,
    /// Maximum headers per window.
    pub batch_size: u64,
    /// Tick interval.
    pub interval: Duration,
    /// Capacity of the tenant batch channel.
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chain_id: String::new(),
            confirmations: 12,
            batch_size: 20,
            interval: Duration::from_secs(3),
            channel_capacity: 16,
        }
    }
}

impl SyncConfig {
    /// How far behind the latest persisted header the cursor resumes.
    ///
    /// Batches that were published but not committed when the process
    /// stopped are at most the channel's content, the batch being consumed
    /// and the batch being sent. Replaying that many windows is harmless
    /// since ledger writes are idempotent per `(tenant, hash)`.
    pub fn resume_depth(&self) -> u64 {
        self.batch_size
            .saturating_mul(self.channel_capacity as u64 + 2)
    }

    /// Reject settings the loop cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.batch_size == 0 {
            return Err(SyncError::ConfigError("batch_size must be at least 1".into()));
        }
        if self.batch_size > MAX_BATCH_SIZE {
            return Err(SyncError::ConfigError(format!(
                "batch_size must be at most {MAX_BATCH_SIZE}"
            )));
        }
        if self.channel_capacity == 0 {
            return Err(SyncError::ConfigError("channel_capacity must be at least 1".into()));
        }
        if self.interval.is_zero() {
            return Err(SyncError::ConfigError("interval must be positive".into()));
        }
        Ok(())
    }
}

// =============================================================================
// SyncLoop
// =============================================================================

/// Producer side of the engine.
///
/// # Flow
///
/// 1. Take the pending window, or pull a new one from [`HeaderWindow`]
/// 2. Fetch each block's transactions, skipping failed ones
/// 3. Classify each transaction for each tenant
/// 4. Persist the headers in one write
/// 5. Publish the tenant batch, waiting for channel capacity
/// 6. Clear the pending window
pub struct SyncLoop<C: ChainSource, R: Repositories> {
    config: SyncConfig,
    window: HeaderWindow<C>,
    chain: Arc<C>,
    repositories: Arc<R>,
    cache: Arc<AddressCache>,
    sender: mpsc::Sender<TenantBatch>,
    pending: Vec<BlockHeader>,
}

impl<C: ChainSource, R: Repositories> SyncLoop<C, R> {
    /// Build the loop, resuming the cursor from the persisted header log.
    pub async fn new(
        config: SyncConfig,
        chain: Arc<C>,
        repositories: Arc<R>,
        cache: Arc<AddressCache>,
        sender: mpsc::Sender<TenantBatch>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let cursor = Self::resume_cursor(&config, repositories.as_ref()).await?;
        match &cursor {
            Some(c) => info!(block = c.number, "📍 Resuming after block"),
            None => info!("📍 No header log, starting from genesis"),
        }
        let window = HeaderWindow::new(Arc::clone(&chain), config.confirmations, cursor);

        Ok(Self {
            config,
            window,
            chain,
            repositories,
            cache,
            sender,
            pending: Vec::new(),
        })
    }

    async fn resume_cursor(config: &SyncConfig, repositories: &R) -> SyncResult<Option<BlockHeader>> {
        let Some(latest) = repositories.headers().latest_header().await? else {
            return Ok(None);
        };
        let depth = config.resume_depth();
        if depth == 0 {
            return Ok(Some(latest));
        }
        // The replay reaches back past genesis: start over from block 0.
        if latest.number < depth {
            debug!(latest = latest.number, "Replaying from genesis");
            return Ok(None);
        }
        let target = latest.number - depth;
        match repositories.headers().get_header(target).await? {
            Some(header) => {
                debug!(latest = latest.number, replay_from = target + 1, "Replaying recent blocks");
                Ok(Some(header))
            }
            None => {
                warn!(target, latest = latest.number, "⚠️  Header log has a gap, resuming at latest");
                Ok(Some(latest))
            }
        }
    }

    /// Last traversed header.
    pub fn cursor(&self) -> Option<&BlockHeader> {
        self.window.cursor()
    }

    /// Run until cancelled or a fatal error occurs.
    #[instrument(skip_all, fields(chain = %self.config.chain_id))]
    pub async fn run(mut self, token: CancellationToken) -> SyncResult<()> {
        info!(
            confirmations = self.config.confirmations,
            batch_size = self.config.batch_size,
            "⛓️  Starting sync loop"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("🛑 Sync loop stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            match self.tick(&token).await {
                Ok(()) => {}
                Err(SyncError::ShutdownRequested) => {
                    info!("🛑 Sync loop stopped while publishing");
                    return Ok(());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(
                    error = %e,
                    transient = e.is_transient(),
                    pending = self.pending.len(),
                    "⚠️  Sync tick failed, retrying next tick"
                ),
            }
        }
    }

    /// One tick: retry the pending window or pull a new one, then process it.
    pub async fn tick(&mut self, token: &CancellationToken) -> SyncResult<()> {
        if self.pending.is_empty() {
            self.pending = self.window.next_headers(self.config.batch_size).await?;
        } else {
            debug!(
                from = self.pending.first().map(|h| h.number),
                count = self.pending.len(),
                "Retrying pending window"
            );
        }
        if self.pending.is_empty() {
            return Ok(());
        }

        let headers = std::mem::take(&mut self.pending);
        let result = self.process_batch(&headers, token).await;
        if result.is_err() {
            self.pending = headers;
        }
        result.map(|_| ())
    }

    /// Classify, persist and publish one window. Returns the number of
    /// classified transactions.
    #[instrument(skip_all, fields(from = headers.first().map(|h| h.number), count = headers.len()))]
    pub async fn process_batch(
        &self,
        headers: &[BlockHeader],
        token: &CancellationToken,
    ) -> SyncResult<usize> {
        let _timer = ProcessingTimer::new();

        let tenants = self.repositories.tenants().list_tenants().await?;
        let mut token_sets: HashMap<TenantId, HashSet<String>> = HashMap::with_capacity(tenants.len());
        for tenant in &tenants {
            let tokens = self.repositories.tokens().list_tokens(&tenant.id).await?;
            token_sets.insert(
                tenant.id.clone(),
                tokens.into_iter().map(|t| t.token_address).collect(),
            );
        }

        let mut batch = TenantBatch::new();
        let mut classified = 0;
        for header in headers {
            let transactions = self.chain.block_transactions(header.number).await?;
            for tx in transactions.iter().filter(|tx| tx.success) {
                for (tenant, tokens) in &token_sets {
                    match classify(tenant, tx, &self.cache, tokens) {
                        Classification::Classified(c) => {
                            trace!(tenant = %tenant, tx = %c.hash, kind = %c.kind, "Transaction classified");
                            record_classified(c.kind);
                            classified += 1;
                            batch.entry(tenant.clone()).or_default().push(c);
                        }
                        Classification::Unknown => {
                            debug!(tenant = %tenant, tx = %tx.hash, "Tenant transaction matches no movement kind, dropped");
                            record_unclassified();
                        }
                        Classification::Unrelated => {}
                    }
                }
            }
        }

        self.repositories.headers().insert_headers(headers).await?;
        record_blocks_synced(headers.len() as u64);

        if !batch.is_empty() {
            let tenant_count = batch.len();
            tokio::select! {
                biased;
                sent = self.sender.send(batch) => {
                    sent.map_err(|_| SyncError::ShutdownRequested)?;
                }
                _ = token.cancelled() => return Err(SyncError::ShutdownRequested),
            }
            debug!(tenants = tenant_count, transactions = classified, "📤 Tenant batch published");
        }

        if let Some(last) = headers.last() {
            info!(block = last.number, transactions = classified, "⛓️  Blocks synced");
        }
        Ok(classified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachedAddress;
    use crate::models::{AddressRole, MovementKind, Tenant};
    use crate::ports::{HeaderRepository, TenantRepository};
    use crate::testing::{InMemoryStore, MockChain, header, native_tx, tenant_id};
    use chrono::Utc;

    const EOA: &str = "0x00000000000000000000000000000000000000a1";
    const STRANGER: &str = "0x00000000000000000000000000000000000000ff";

    fn config() -> SyncConfig {
        SyncConfig {
            confirmations: 0,
            batch_size: 10,
            interval: Duration::from_millis(10),
            channel_capacity: 1,
            ..Default::default()
        }
    }

    async fn setup(
        chain: MockChain,
    ) -> (
        SyncLoop<MockChain, InMemoryStore>,
        mpsc::Receiver<TenantBatch>,
        Arc<InMemoryStore>,
    ) {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_tenant(&Tenant {
                id: tenant_id("T1"),
                notify_url: "http://localhost/cb".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let cache = Arc::new(AddressCache::default());
        cache.set(CachedAddress {
            tenant_id: tenant_id("T1"),
            address: EOA.into(),
            role: AddressRole::Eoa,
        });
        let (tx, rx) = mpsc::channel(1);
        let sync = SyncLoop::new(config(), Arc::new(chain), store.clone(), cache, tx)
            .await
            .unwrap();
        (sync, rx, store)
    }

    #[tokio::test]
    async fn publishes_tenant_batch_and_persists_headers() {
        let chain = MockChain::default();
        chain.push_block(Vec::new());
        chain.push_block(vec![
            native_tx(1, STRANGER, EOA, 100),
            native_tx(2, STRANGER, STRANGER, 5),
        ]);
        let mut failed = native_tx(3, STRANGER, EOA, 7);
        failed.success = false;
        chain.push_block(vec![failed]);

        let (mut sync, mut rx, store) = setup(chain).await;
        sync.tick(&CancellationToken::new()).await.unwrap();

        let batch = rx.try_recv().unwrap();
        let txs = &batch[&tenant_id("T1")];
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].kind, MovementKind::Deposit);
        assert_eq!(txs[0].block_number, 1);
        assert_eq!(store.header_numbers(), vec![0, 1, 2]);
        assert_eq!(sync.cursor().unwrap().number, 2);
    }

    // Test critique: un échec en aval rejoue exactement la même fenêtre
    #[tokio::test]
    async fn failed_batch_is_retried_with_same_window() {
        let chain = MockChain::default();
        chain.push_block(vec![native_tx(1, STRANGER, EOA, 100)]);
        chain.push_block(Vec::new());

        let (mut sync, mut rx, _store) = setup(chain).await;
        // Fill the only channel slot, then shut down while publishing.
        let token = CancellationToken::new();
        sync.sender.send(TenantBatch::new()).await.unwrap();
        token.cancel();
        assert!(matches!(
            sync.tick(&token).await,
            Err(SyncError::ShutdownRequested)
        ));
        assert_eq!(sync.pending.len(), 2);

        rx.recv().await.unwrap();
        sync.tick(&CancellationToken::new()).await.unwrap();
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch[&tenant_id("T1")][0].hash, crate::testing::tx_hash(1));
        assert!(sync.pending.is_empty());
    }

    #[tokio::test]
    async fn empty_batches_are_not_published() {
        let (mut sync, mut rx, store) = setup(MockChain::with_height(3)).await;
        sync.tick(&CancellationToken::new()).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(store.header_numbers().len(), 4);
    }

    #[tokio::test]
    async fn resume_replays_recent_windows() {
        let store = Arc::new(InMemoryStore::new());
        let headers: Vec<_> = (0..=100).map(header).collect();
        store.insert_headers(&headers).await.unwrap();

        let (tx, _rx) = mpsc::channel(1);
        let sync = SyncLoop::new(
            config(),
            Arc::new(MockChain::with_height(100)),
            store,
            Arc::new(AddressCache::default()),
            tx,
        )
        .await
        .unwrap();
        // batch_size 10 * (capacity 1 + 2)
        assert_eq!(sync.cursor().unwrap().number, 70);
    }

    // Test critique: un journal plus court que la profondeur de rejeu repart du bloc 0
    #[tokio::test]
    async fn short_header_log_replays_from_genesis() {
        let store = Arc::new(InMemoryStore::new());
        let headers: Vec<_> = (0..=12).map(header).collect();
        store.insert_headers(&headers).await.unwrap();

        // A deposit mined in block 0 must be seen again.
        let chain = MockChain::default();
        chain.push_block(vec![native_tx(1, STRANGER, EOA, 100)]);
        for _ in 0..12 {
            chain.push_block(Vec::new());
        }
        let (tx, mut rx) = mpsc::channel(1);
        let cache = Arc::new(AddressCache::default());
        cache.set(CachedAddress {
            tenant_id: tenant_id("T1"),
            address: EOA.into(),
            role: AddressRole::Eoa,
        });
        store
            .insert_tenant(&Tenant {
                id: tenant_id("T1"),
                notify_url: "http://localhost/cb".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let mut sync = SyncLoop::new(config(), Arc::new(chain), store, cache, tx)
            .await
            .unwrap();
        assert!(sync.cursor().is_none());

        sync.tick(&CancellationToken::new()).await.unwrap();
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch[&tenant_id("T1")][0].block_number, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel_and_surfaces_fatal_errors() {
        let (sync, _rx, _store) = setup(MockChain::with_height(5)).await;
        let token = CancellationToken::new();
        let handle = tokio::spawn(sync.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        assert!(handle.await.unwrap().is_ok());

        let store = Arc::new(InMemoryStore::new());
        store.insert_headers(&[header(50)]).await.unwrap();
        let chain = Arc::new(MockChain::with_height(10));
        let (tx, _rx) = mpsc::channel(1);
        let sync = SyncLoop::new(
            config(),
            chain,
            store,
            Arc::new(AddressCache::default()),
            tx,
        )
        .await
        .unwrap();
        let err = sync.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::CursorAheadOfChain { cursor: 50, .. }));
    }

    #[test]
    fn out_of_range_sizes_are_rejected() {
        assert!(config().validate().is_ok());
        assert!(SyncConfig { batch_size: MAX_BATCH_SIZE, ..config() }.validate().is_ok());
        for bad in [
            SyncConfig { batch_size: 0, ..config() },
            SyncConfig { batch_size: u64::MAX, ..config() },
            SyncConfig { channel_capacity: 0, ..config() },
            SyncConfig { interval: Duration::ZERO, ..config() },
        ] {
            assert!(matches!(bad.validate(), Err(SyncError::ConfigError(_))));
        }
    }
}
