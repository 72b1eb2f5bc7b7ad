//! Metrics definitions for the engine.
//!
//! This module defines all metrics used throughout the engine.
//! Metrics are collected using the `metrics` crate and can be exported
//! to Prometheus via `metrics-exporter-prometheus`.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

use crate::models::MovementKind;

/// Initialize all metric descriptions.
/// Call this once at startup before any metrics are recorded.
pub fn init_metrics() {
    describe_counter!(
        "blocks_synced_total",
        "Total number of block headers traversed and persisted"
    );
    describe_counter!(
        "transactions_classified_total",
        "Total number of transactions assigned a movement kind"
    );
    describe_counter!(
        "transactions_unclassified_total",
        "Total number of tenant transactions dropped as unknown"
    );
    describe_counter!(
        "ledger_batches_committed_total",
        "Total number of tenant batches committed by ledger workers"
    );
    describe_counter!(
        "ledger_retries_total",
        "Total number of retried ledger transactions"
    );
    describe_counter!(
        "ledger_unearmarked_outflows_total",
        "Outflows from tenant wallets seen on chain without a matching request"
    );
    describe_counter!(
        "critical_errors_total",
        "Total number of critical errors that triggered shutdown"
    );
    describe_counter!("address_cache_hits_total", "Address cache hits");
    describe_counter!("address_cache_misses_total", "Address cache misses");
    describe_counter!(
        "address_cache_evictions_total",
        "Address cache entries evicted to stay under the cost budget"
    );
    describe_histogram!(
        "sync_batch_duration_seconds",
        "Time taken to process one header window in seconds"
    );
    describe_counter!(
        "notifications_sent_total",
        "Total number of ledger events acknowledged by tenants"
    );
}

/// Record traversed block headers.
pub fn record_blocks_synced(count: u64) {
    counter!("blocks_synced_total").increment(count);
}

/// Record a classified transaction.
pub fn record_classified(kind: MovementKind) {
    counter!("transactions_classified_total", "kind" => kind.as_str()).increment(1);
}

/// Record a transaction touching a tenant that matched no movement kind.
pub fn record_unclassified() {
    counter!("transactions_unclassified_total").increment(1);
}

/// Record a committed tenant batch.
///
/// # Arguments
/// * `worker` - The worker name ("deposit", "withdraw", ...)
pub fn record_batch_committed(worker: &'static str) {
    counter!("ledger_batches_committed_total", "worker" => worker).increment(1);
}

/// Record a retried ledger transaction.
pub fn record_retry(worker: &'static str) {
    counter!("ledger_retries_total", "worker" => worker).increment(1);
}

/// Record an outflow that settled no outgoing request.
pub fn record_unearmarked_outflow(kind: MovementKind) {
    counter!("ledger_unearmarked_outflows_total", "kind" => kind.as_str()).increment(1);
}

/// Record a critical error.
///
/// # Arguments
/// * `task` - The supervised task that failed
pub fn record_critical_error(task: &str) {
    counter!("critical_errors_total", "task" => task.to_string()).increment(1);
}

pub fn record_cache_hit() {
    counter!("address_cache_hits_total").increment(1);
}

pub fn record_cache_miss() {
    counter!("address_cache_misses_total").increment(1);
}

pub fn record_cache_eviction() {
    counter!("address_cache_evictions_total").increment(1);
}

/// Record events acknowledged by a tenant callback.
pub fn record_notifications_sent(count: u64) {
    counter!("notifications_sent_total").increment(count);
}

/// Record sync batch duration.
pub fn record_sync_batch_duration(duration_secs: f64) {
    histogram!("sync_batch_duration_seconds").record(duration_secs);
}

/// A timer that automatically records duration when dropped.
pub struct ProcessingTimer {
    start: Instant,
}

impl ProcessingTimer {
    /// Start a new processing timer.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for ProcessingTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessingTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_sync_batch_duration(duration);
    }
}
