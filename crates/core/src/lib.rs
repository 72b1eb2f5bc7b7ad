//! Core domain layer for the Custos custody ledger engine.
//!
//! This crate contains the domain models, port traits (interfaces), and
//! services that follow a single chain, classify every transaction that
//! touches a tenant-owned address and keep per-tenant ledgers and balances.
//! It follows hexagonal architecture principles - this is the innermost
//! layer with no dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      custos (binary)                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │      custos-rpc       │      custos-notify                  │
//! │   (JSON-RPC chain)    │    (tenant webhooks)                │
//! ├───────────────────────┴─────────────────────────────────────┤
//! │                     custos-storage                          │
//! │                      (PostgreSQL)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     custos-core  ← YOU ARE HERE             │
//! │        (models, ports, cache, classifier, services)         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain models (headers, tenants, ledger rows, balances)
//! - [`ports`] - Interface traits for adapters to implement
//! - [`cache`] - Frequency-weighted address cache
//! - [`classifier`] - Movement-kind decision table and token call decoding
//! - [`services`] - Header window, sync loop, registration and ledger workers
//! - [`retry`] - Bounded exponential backoff
//! - [`task_group`] - Supervision of long-lived tasks
//! - [`error`] - Error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Engine Lifecycle
//!
//! 1. Resume the header cursor from the persisted header log
//! 2. Pull confirmation-safe header windows from the chain
//! 3. Classify each transaction per tenant through the address cache
//! 4. Persist headers and publish tenant batches on a bounded channel
//! 5. Ledger workers commit each tenant batch in one retried transaction
//! 6. Poll workers broadcast, sweep and notify rows still in flight

pub mod cache;
pub mod classifier;
pub mod error;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod retry;
pub mod services;
pub mod task_group;

#[cfg(test)]
pub(crate) mod testing;
