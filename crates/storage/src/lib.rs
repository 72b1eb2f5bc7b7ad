//! Storage layer for the custos ledger engine.
//!
//! This crate provides PostgreSQL implementations of the repository traits
//! defined in `custos-core`: the block header log, the tenant registry
//! (tenants, addresses, tokens) and the ledger tables with their
//! transactional write handle.
//!
//! # Usage
//!
//! ```ignore
//! use custos_storage::{Database, DatabaseConfig, PgRepositories};
//!
//! // Connect to the database
//! let config = DatabaseConfig::for_sync(&database_url);
//! let db = Database::connect(&config).await?;
//!
//! // Run migrations
//! db.migrate().await?;
//!
//! // Create repositories
//! let repositories = Arc::new(PgRepositories::new(&db));
//! ```

pub mod postgres;

pub use postgres::{Database, DatabaseConfig, PgRepositories};
