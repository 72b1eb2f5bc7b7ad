//! Custos - block synchronization and tenant ledger engine.
//!
//! # Usage
//!
//! ```bash
//! # Start with default config
//! custos
//!
//! # Start with environment overrides
//! DATABASE_URL=postgres://localhost/custos RPC_URL=http://localhost:8545 custos
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use custos_core::cache::{AddressCache, AddressCacheConfig};
use custos_core::metrics::init_metrics;
use custos_core::retry::RetryPolicy;
use custos_core::services::{
    BroadcastWorker, CollectionWorker, DepositWorker, NotifyWorker, RegistrationService,
    SyncConfig, SyncLoop, WorkerConfig, run_poll_worker,
};
use custos_core::task_group::TaskGroup;
use custos_notify::{WebhookConfig, WebhookNotifier};
use custos_rpc::{RpcChainClient, RpcClientConfig};
use custos_storage::{Database, DatabaseConfig, PgRepositories};

/// Custos CLI - chain synchronization and custody ledger.
#[derive(Parser, Debug)]
#[command(name = "custos")]
#[command(about = "Custos - block synchronization and tenant ledger engine")]
#[command(version)]
struct Cli {
    /// Ethereum-compatible JSON-RPC endpoint.
    #[arg(long, env = "RPC_URL", default_value = "http://127.0.0.1:8545")]
    rpc_url: String,

    /// PostgreSQL database URL.
    #[arg(long, env = "DATABASE_URL", default_value = "postgres://localhost/custos")]
    database_url: String,

    /// Chain id the node must report. Unchecked when omitted.
    #[arg(long, env = "CHAIN_ID")]
    chain_id: Option<u64>,

    /// Blocks a transaction must be behind the head before it is synced.
    #[arg(long, env = "CONFIRMATIONS", default_value = "12")]
    confirmations: u64,

    /// Maximum headers per sync window.
    #[arg(long, env = "BATCH_SIZE", default_value = "20")]
    batch_size: u64,

    /// Sync loop tick interval.
    #[arg(long, env = "SYNC_INTERVAL_MS", default_value = "3000")]
    sync_interval_ms: u64,

    /// Poll worker tick interval.
    #[arg(long, env = "WORKER_INTERVAL_MS", default_value = "5000")]
    worker_interval_ms: u64,

    /// Capacity of the tenant batch channel.
    #[arg(long, env = "CHANNEL_CAPACITY", default_value = "16")]
    channel_capacity: usize,

    /// Address cache budget (one unit per cached address).
    #[arg(long, env = "CACHE_MAX_COST", default_value = "100000")]
    cache_max_cost: u64,

    /// How often the address cache is reloaded from storage.
    #[arg(long, env = "CACHE_REFRESH_SECS", default_value = "60")]
    cache_refresh_secs: u64,

    /// First retry delay.
    #[arg(long, env = "RETRY_MIN_DELAY_MS", default_value = "200")]
    retry_min_delay_ms: u64,

    /// Retry delay cap.
    #[arg(long, env = "RETRY_MAX_DELAY_MS", default_value = "10000")]
    retry_max_delay_ms: u64,

    /// Attempts per ledger transaction, the first one included.
    #[arg(long, env = "RETRY_MAX_ATTEMPTS", default_value = "5")]
    retry_max_attempts: u32,

    /// EOA native balance that triggers a sweep to the hot wallet (0 disables).
    #[arg(long, env = "NATIVE_COLLECT_THRESHOLD", default_value = "0")]
    native_collect_threshold: u128,

    /// Tenant callback timeout.
    #[arg(long, env = "NOTIFY_TIMEOUT_SECS", default_value = "10")]
    notify_timeout_secs: u64,

    /// How long tasks get to finish after a shutdown request.
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value = "30")]
    shutdown_grace_secs: u64,

    /// Prometheus metrics port.
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    metrics_port: u16,

    /// Enable JSON log output.
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Run database migrations and exit.
    #[arg(long)]
    migrate_only: bool,
}

impl Cli {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            min_delay: Duration::from_millis(self.retry_min_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            max_attempts: self.retry_max_attempts,
            ..Default::default()
        }
    }

    fn sync_config(&self, chain_id: String) -> SyncConfig {
        SyncConfig {
            chain_id,
            confirmations: self.confirmations,
            batch_size: self.batch_size,
            interval: Duration::from_millis(self.sync_interval_ms),
            channel_capacity: self.channel_capacity,
        }
    }

    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            interval: Duration::from_millis(self.worker_interval_ms),
            native_collect_threshold: self.native_collect_threshold,
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    // Prometheus metrics exporter (optional - failures don't crash the app)
    let metrics_enabled = match format!("0.0.0.0:{}", cli.metrics_port).parse::<std::net::SocketAddr>() {
        Ok(metrics_addr) => match PrometheusBuilder::new().with_http_listener(metrics_addr).install() {
            Ok(()) => {
                init_metrics();
                true
            }
            Err(e) => {
                warn!("⚠️  Failed to start metrics exporter: {}. Continuing without metrics.", e);
                false
            }
        },
        Err(e) => {
            warn!("⚠️  Invalid metrics address: {}. Continuing without metrics.", e);
            false
        }
    };

    // ─────────────────────────────────────────────────────────────────────────
    // 🚀 STARTUP
    // ─────────────────────────────────────────────────────────────────────────
    info!("🚀 Starting Custos");
    debug!(rpc_url = %cli.rpc_url, "Chain endpoint");
    debug!(database_url = %mask_password(&cli.database_url), "Database endpoint");

    // ─────────────────────────────────────────────────────────────────────────
    // 🗄️ DATABASE
    // ─────────────────────────────────────────────────────────────────────────
    info!("🗄️  Connecting to database...");
    let db = Database::connect(&DatabaseConfig::for_sync(&cli.database_url))
        .await
        .context("Failed to connect to database")?;

    db.migrate().await.context("Failed to run migrations")?;
    info!("🗄️  Database ready (migrations applied)");

    if cli.migrate_only {
        info!("🛑 --migrate-only flag set, exiting");
        db.close().await;
        return Ok(());
    }

    let repositories = Arc::new(PgRepositories::new(&db));

    // ─────────────────────────────────────────────────────────────────────────
    // 📇 ADDRESS CACHE
    // ─────────────────────────────────────────────────────────────────────────
    let cache = Arc::new(AddressCache::new(AddressCacheConfig {
        max_cost: cli.cache_max_cost,
        ..Default::default()
    }));
    let registration = RegistrationService::new(Arc::clone(&repositories), Arc::clone(&cache));
    let warmed = registration
        .refresh_all()
        .await
        .context("Failed to warm the address cache")?;
    info!(addresses = warmed, "📇 Address cache warmed");
    let cache_refresh = Duration::from_secs(cli.cache_refresh_secs.max(1));

    // ─────────────────────────────────────────────────────────────────────────
    // 📡 CHAIN CONNECTION
    // ─────────────────────────────────────────────────────────────────────────
    info!("📡 Connecting to node...");
    let chain = RpcChainClient::connect(RpcClientConfig {
        url: cli.rpc_url.clone(),
        chain_id: cli.chain_id,
        ..Default::default()
    })
    .await
    .context("Failed to connect to node")?;
    let chain = Arc::new(chain);

    let notifier = WebhookNotifier::new(WebhookConfig {
        timeout: Duration::from_secs(cli.notify_timeout_secs),
        ..Default::default()
    })
    .context("Failed to build webhook client")?;
    let notifier = Arc::new(notifier);

    // ─────────────────────────────────────────────────────────────────────────
    // ⚡ SERVICES START
    // ─────────────────────────────────────────────────────────────────────────
    let chain_id = cli.chain_id.map(|id| id.to_string()).unwrap_or_default();
    let retry = cli.retry_policy();
    let workers = cli.worker_config();
    let (sender, receiver) = mpsc::channel(cli.channel_capacity.max(1));

    let sync = SyncLoop::new(
        cli.sync_config(chain_id),
        Arc::clone(&chain),
        Arc::clone(&repositories),
        Arc::clone(&cache),
        sender,
    )
    .await
    .context("Failed to start the sync loop")?;
    let deposits = DepositWorker::new(Arc::clone(&repositories), retry.clone(), receiver);

    let root = CancellationToken::new();
    let mut group = TaskGroup::new(root.clone());

    group.spawn("sync", sync.run(root.clone()));
    group.spawn("deposit", deposits.run(root.clone()));
    group.spawn(
        "withdraw",
        run_poll_worker(
            BroadcastWorker::withdraws(Arc::clone(&chain), Arc::clone(&repositories), retry.clone(), workers.clone()),
            workers.interval,
            root.clone(),
        ),
    );
    group.spawn(
        "internal",
        run_poll_worker(
            BroadcastWorker::internals(Arc::clone(&chain), Arc::clone(&repositories), retry.clone(), workers.clone()),
            workers.interval,
            root.clone(),
        ),
    );
    group.spawn(
        "collection",
        run_poll_worker(
            CollectionWorker::new(Arc::clone(&repositories), retry.clone(), workers.clone()),
            workers.interval,
            root.clone(),
        ),
    );
    group.spawn(
        "notify",
        run_poll_worker(
            NotifyWorker::new(Arc::clone(&repositories), notifier, retry, workers.clone()),
            workers.interval,
            root.clone(),
        ),
    );
    group.spawn("cache-refresh", run_poll_worker(registration, cache_refresh, root.clone()));

    // ─────────────────────────────────────────────────────────────────────────
    // ✅ READY
    // ─────────────────────────────────────────────────────────────────────────
    info!(
        confirmations = cli.confirmations,
        batch_size = cli.batch_size,
        "✅ Custos ready"
    );
    if metrics_enabled {
        info!("   📊 Metrics:  http://localhost:{}/metrics", cli.metrics_port);
    } else {
        info!("   📊 Metrics:  disabled");
    }
    info!("   Press Ctrl+C to stop");

    tokio::select! {
        _ = shutdown_signal() => info!("🛑 Shutdown requested"),
        _ = root.cancelled() => {}
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 🛑 SHUTDOWN
    // ─────────────────────────────────────────────────────────────────────────
    info!("🛑 Shutting down...");
    let critical = group
        .shutdown(Duration::from_secs(cli.shutdown_grace_secs))
        .await;

    let stats = cache.stats();
    debug!(
        hits = stats.hits,
        misses = stats.misses,
        evictions = stats.evictions,
        entries = stats.entries,
        "Address cache statistics"
    );

    db.close().await;

    match critical {
        Some(e) => {
            error!(task = %e.task, error = %e.error, "❌ Stopped on critical error");
            Err(e.into())
        }
        None => {
            info!("🛑 Shutdown complete");
            Ok(())
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

/// Mask password in database URL for logging.
fn mask_password(url_str: &str) -> String {
    match url::Url::parse(url_str) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => url_str.to_string(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "⚠️  Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "⚠️  Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
