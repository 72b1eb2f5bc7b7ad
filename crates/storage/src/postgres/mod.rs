//! PostgreSQL storage adapter.
//!
//! This module implements the repository traits defined in `custos-core`
//! using PostgreSQL as the backing store.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool and migrations
//! - [`PgRepositories`] - Composite repository implementing `Repositories` trait
//! - Individual repos: `PgHeaderRepository`, `PgLedgerRepository`, etc.
//!
//! Every tenant-owned table has a `tenant_id` column and every query
//! filters on it; tenant ids are validated before they reach a query.
//!
//! # Usage
//!
//! ```ignore
//! let config = DatabaseConfig::for_sync(&database_url);
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let repositories = PgRepositories::new(&db);
//! ```

mod database;
mod header_repo;
mod helpers;
mod ledger_repo;
mod registry_repo;

pub use database::{Database, DatabaseConfig};
pub use header_repo::PgHeaderRepository;
pub use ledger_repo::{PgLedgerRepository, PgLedgerTx};
pub use registry_repo::{PgAddressRepository, PgTenantRepository, PgTokenRepository};

use custos_core::ports::{
    AddressRepository, HeaderRepository, LedgerRepository, Repositories, TenantRepository,
    TokenRepository,
};

// =============================================================================
// Composite Repository
// =============================================================================

/// Aggregated PostgreSQL repositories implementing the `Repositories` trait.
pub struct PgRepositories {
    headers: PgHeaderRepository,
    tenants: PgTenantRepository,
    addresses: PgAddressRepository,
    tokens: PgTokenRepository,
    ledger: PgLedgerRepository,
}

impl PgRepositories {
    /// Create a new repository aggregate over one pool.
    pub fn new(db: &Database) -> Self {
        Self {
            headers: PgHeaderRepository::new(db),
            tenants: PgTenantRepository::new(db),
            addresses: PgAddressRepository::new(db),
            tokens: PgTokenRepository::new(db),
            ledger: PgLedgerRepository::new(db),
        }
    }
}

impl Repositories for PgRepositories {
    fn headers(&self) -> &dyn HeaderRepository {
        &self.headers
    }

    fn tenants(&self) -> &dyn TenantRepository {
        &self.tenants
    }

    fn addresses(&self) -> &dyn AddressRepository {
        &self.addresses
    }

    fn tokens(&self) -> &dyn TokenRepository {
        &self.tokens
    }

    fn ledger(&self) -> &dyn LedgerRepository {
        &self.ledger
    }
}
