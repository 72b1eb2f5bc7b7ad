//! Tenant, address and token registration.
//!
//! These operations back the registration surface exposed to integrators.
//! Addresses are written to storage first and then pushed into the address
//! cache, so the sync loop sees them from its next batch on. Rows written to
//! storage by anything else reach the cache on the next periodic refresh,
//! which runs this service as a [`PollWorker`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::cache::{AddressCache, CachedAddress};
use crate::error::{DomainError, SyncResult};
use crate::models::{AddressRecord, AddressRole, Tenant, TenantId, Token, normalize_address};
use crate::ports::Repositories;

use super::workers::PollWorker;

/// One address in a registration request.
#[derive(Debug, Clone)]
pub struct NewAddress {
    pub address: String,
    pub role: AddressRole,
    pub public_key: String,
}

/// One token in a registration request.
#[derive(Debug, Clone)]
pub struct NewToken {
    pub token_address: String,
    pub symbol: String,
    pub decimals: u8,
    pub collect_threshold: u128,
}

pub struct RegistrationService<R: Repositories> {
    repositories: Arc<R>,
    cache: Arc<AddressCache>,
}

impl<R: Repositories> RegistrationService<R> {
    pub fn new(repositories: Arc<R>, cache: Arc<AddressCache>) -> Self {
        Self {
            repositories,
            cache,
        }
    }

    /// Register a tenant. Re-registering an existing tenant is a no-op.
    #[instrument(skip(self))]
    pub async fn register_tenant(&self, tenant_id: &str, notify_url: &str) -> SyncResult<Tenant> {
        let id = TenantId::parse(tenant_id)?;
        if notify_url.trim().is_empty() {
            return Err(DomainError::ValidationError("notify url is empty".into()).into());
        }
        let tenant = Tenant {
            id,
            notify_url: notify_url.trim().to_string(),
            created_at: Utc::now(),
        };
        if self.repositories.tenants().insert_tenant(&tenant).await? {
            info!(tenant = %tenant.id, "🏢 Tenant registered");
            Ok(tenant)
        } else {
            self.require_tenant(&tenant.id).await
        }
    }

    /// Persist scan addresses and warm the cache with them.
    ///
    /// Returns the number of addresses that were new.
    #[instrument(skip(self, addresses), fields(count = addresses.len()))]
    pub async fn register_addresses(
        &self,
        tenant_id: &TenantId,
        addresses: &[NewAddress],
    ) -> SyncResult<u64> {
        self.require_tenant(tenant_id).await?;

        let now = Utc::now();
        let records = addresses
            .iter()
            .map(|a| {
                Ok(AddressRecord {
                    tenant_id: tenant_id.clone(),
                    address: normalize_address(&a.address)?,
                    role: a.role,
                    public_key: a.public_key.clone(),
                    created_at: now,
                })
            })
            .collect::<Result<Vec<_>, DomainError>>()?;

        let inserted = self.repositories.addresses().insert_addresses(&records).await?;

        // Roles are immutable: cache what storage holds, not the request.
        let stored = self.repositories.addresses().list_addresses(tenant_id).await?;
        for record in stored.iter().filter(|s| records.iter().any(|r| r.address == s.address)) {
            self.cache.set(CachedAddress::from(record));
        }

        info!(tenant = %tenant_id, inserted, "📒 Addresses registered");
        Ok(inserted)
    }

    /// Register or update token contracts.
    #[instrument(skip(self, tokens), fields(count = tokens.len()))]
    pub async fn register_tokens(&self, tenant_id: &TenantId, tokens: &[NewToken]) -> SyncResult<u64> {
        self.require_tenant(tenant_id).await?;

        let records = tokens
            .iter()
            .map(|t| {
                Ok(Token {
                    tenant_id: tenant_id.clone(),
                    token_address: normalize_address(&t.token_address)?,
                    symbol: t.symbol.clone(),
                    decimals: t.decimals,
                    collect_threshold: t.collect_threshold,
                })
            })
            .collect::<Result<Vec<_>, DomainError>>()?;

        let written = self.repositories.tokens().upsert_tokens(&records).await?;
        info!(tenant = %tenant_id, written, "🪙 Tokens registered");
        Ok(written)
    }

    /// Reload every address of a tenant into the cache.
    #[instrument(skip(self))]
    pub async fn refresh_addresses(&self, tenant_id: &TenantId) -> SyncResult<usize> {
        self.require_tenant(tenant_id).await?;
        let records = self.repositories.addresses().list_addresses(tenant_id).await?;
        self.cache.refresh(tenant_id, &records);
        Ok(records.len())
    }

    /// Reload the cache for every tenant. Warms it at startup, then runs
    /// on every refresh tick.
    pub async fn refresh_all(&self) -> SyncResult<usize> {
        let mut total = 0;
        for tenant in self.repositories.tenants().list_tenants().await? {
            let records = self.repositories.addresses().list_addresses(&tenant.id).await?;
            self.cache.refresh(&tenant.id, &records);
            total += records.len();
        }
        let stats = self.cache.stats();
        debug!(addresses = total, entries = stats.entries, "🔄 Address cache reloaded");
        Ok(total)
    }

    async fn require_tenant(&self, tenant_id: &TenantId) -> SyncResult<Tenant> {
        self.repositories
            .tenants()
            .get_tenant(tenant_id)
            .await?
            .ok_or_else(|| DomainError::UnknownTenant(tenant_id.to_string()).into())
    }
}

#[async_trait]
impl<R: Repositories> PollWorker for RegistrationService<R> {
    fn name(&self) -> &'static str {
        "cache-refresh"
    }

    async fn tick(&self) -> SyncResult<()> {
        self.refresh_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::testing::{InMemoryStore, tenant_id};

    fn service() -> (RegistrationService<InMemoryStore>, Arc<AddressCache>) {
        let cache = Arc::new(AddressCache::default());
        (
            RegistrationService::new(Arc::new(InMemoryStore::new()), cache.clone()),
            cache,
        )
    }

    #[tokio::test]
    async fn registered_addresses_are_cached_normalized() {
        let (service, cache) = service();
        service.register_tenant("T1", "http://cb").await.unwrap();
        let inserted = service
            .register_addresses(
                &tenant_id("T1"),
                &[NewAddress {
                    address: "0xABCD".into(),
                    role: AddressRole::Eoa,
                    public_key: "pk".into(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(
            cache.get(&tenant_id("T1"), "0xabcd").unwrap().role,
            AddressRole::Eoa
        );
    }

    // Test critique: un rôle déjà enregistré n'est jamais réattribué
    #[tokio::test]
    async fn roles_are_immutable() {
        let (service, cache) = service();
        service.register_tenant("T1", "http://cb").await.unwrap();
        let t1 = tenant_id("T1");
        let address = |role| NewAddress {
            address: "0xaa".into(),
            role,
            public_key: String::new(),
        };
        service.register_addresses(&t1, &[address(AddressRole::Hot)]).await.unwrap();
        let inserted = service
            .register_addresses(&t1, &[address(AddressRole::Cold)])
            .await
            .unwrap();
        assert_eq!(inserted, 0);
        assert_eq!(cache.get(&t1, "0xaa").unwrap().role, AddressRole::Hot);
    }

    #[tokio::test]
    async fn rejects_unknown_tenant_and_bad_input() {
        let (service, _) = service();
        assert!(service.register_tenant("bad id", "http://cb").await.is_err());
        let err = service
            .register_tokens(&tenant_id("T9"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Domain(DomainError::UnknownTenant(_))));

        service.register_tenant("T1", "http://cb").await.unwrap();
        let err = service
            .register_addresses(
                &tenant_id("T1"),
                &[NewAddress {
                    address: "not-an-address".into(),
                    role: AddressRole::Eoa,
                    public_key: String::new(),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Domain(DomainError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn refresh_restores_evicted_state() {
        let (service, cache) = service();
        service.register_tenant("T1", "http://cb").await.unwrap();
        let t1 = tenant_id("T1");
        service
            .register_addresses(
                &t1,
                &[NewAddress {
                    address: "0xaa".into(),
                    role: AddressRole::Hot,
                    public_key: String::new(),
                }],
            )
            .await
            .unwrap();
        cache.remove_tenant(&t1);
        assert!(cache.get(&t1, "0xaa").is_none());

        assert_eq!(service.refresh_addresses(&t1).await.unwrap(), 1);
        assert!(cache.get(&t1, "0xaa").is_some());
        assert_eq!(service.refresh_all().await.unwrap(), 1);
    }

    // Test critique: une adresse écrite hors du service atteint le cache au rafraîchissement suivant
    #[tokio::test]
    async fn refresh_tick_picks_up_rows_written_elsewhere() {
        use crate::ports::AddressRepository;

        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(AddressCache::default());
        let service = RegistrationService::new(store.clone(), cache.clone());
        service.register_tenant("T1", "http://cb").await.unwrap();
        let t1 = tenant_id("T1");

        store
            .insert_addresses(&[AddressRecord {
                tenant_id: t1.clone(),
                address: "0xbb".into(),
                role: AddressRole::Cold,
                public_key: String::new(),
                created_at: Utc::now(),
            }])
            .await
            .unwrap();
        assert!(cache.get(&t1, "0xbb").is_none());

        PollWorker::tick(&service).await.unwrap();
        assert_eq!(cache.get(&t1, "0xbb").unwrap().role, AddressRole::Cold);
        assert_eq!(service.name(), "cache-refresh");
    }
}
