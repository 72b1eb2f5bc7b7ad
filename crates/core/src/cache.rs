//! Frequency-weighted address cache.
//!
//! Maps `(tenant, address)` to the address role so that classification
//! never touches the database. The cache is populated when addresses are
//! registered and reloaded per tenant on refresh; a miss means "not a
//! tenant address".
//!
//! Eviction is approximate LFU under a fixed cost budget: when an insert
//! pushes the used cost over the budget, a sample of entries is scanned and
//! the one with the fewest hits is dropped.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::metrics::{record_cache_eviction, record_cache_hit, record_cache_miss};
use crate::models::{AddressRecord, AddressRole, TenantId};

/// Fixed per-entry overhead added to the key length when costing an entry.
const ENTRY_OVERHEAD: u64 = 64;

/// Configuration for [`AddressCache`].
#[derive(Debug, Clone)]
pub struct AddressCacheConfig {
    /// Cost budget, roughly bytes.
    pub max_cost: u64,
    /// Number of entries scanned per eviction.
    pub sample_size: usize,
}

impl Default for AddressCacheConfig {
    fn default() -> Self {
        Self {
            max_cost: 64 * 1024 * 1024,
            sample_size: 16,
        }
    }
}

/// A cached address lookup result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAddress {
    pub tenant_id: TenantId,
    pub address: String,
    pub role: AddressRole,
}

impl From<&AddressRecord> for CachedAddress {
    fn from(record: &AddressRecord) -> Self {
        Self {
            tenant_id: record.tenant_id.clone(),
            address: record.address.clone(),
            role: record.role,
        }
    }
}

#[derive(Debug)]
struct Slot {
    value: CachedAddress,
    cost: u64,
    hits: AtomicU64,
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub used_cost: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Concurrent address cache.
///
/// Reads never block writers for long: lookups and inserts lock a single
/// shard. Readers may observe a tenant half-way through a refresh.
#[derive(Debug)]
pub struct AddressCache {
    entries: DashMap<String, Slot>,
    config: AddressCacheConfig,
    used_cost: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl AddressCache {
    pub fn new(config: AddressCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            used_cost: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn key(tenant: &TenantId, address: &str) -> String {
        // ':' is outside the tenant id charset, keys cannot collide.
        format!("{}:{}", tenant, address)
    }

    fn entry_cost(tenant: &TenantId, address: &str) -> u64 {
        (tenant.as_str().len() + 1 + address.len()) as u64 + ENTRY_OVERHEAD
    }

    /// Look an address up for a tenant. `address` must be normalized.
    pub fn get(&self, tenant: &TenantId, address: &str) -> Option<CachedAddress> {
        match self.entries.get(&Self::key(tenant, address)) {
            Some(slot) => {
                slot.hits.fetch_add(1, Ordering::Relaxed);
                self.hits.fetch_add(1, Ordering::Relaxed);
                record_cache_hit();
                Some(slot.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                record_cache_miss();
                None
            }
        }
    }

    /// Insert or replace an entry.
    ///
    /// Returns `false` when the entry alone exceeds the budget and was not
    /// cached.
    pub fn set(&self, value: CachedAddress) -> bool {
        let cost = Self::entry_cost(&value.tenant_id, &value.address);
        if cost > self.config.max_cost {
            debug!(address = %value.address, cost, "Entry larger than cache budget, skipped");
            return false;
        }

        let key = Self::key(&value.tenant_id, &value.address);
        self.used_cost.fetch_add(cost, Ordering::Relaxed);
        let previous = self.entries.insert(
            key.clone(),
            Slot {
                value,
                cost,
                hits: AtomicU64::new(0),
            },
        );
        if let Some(old) = previous {
            self.used_cost.fetch_sub(old.cost, Ordering::Relaxed);
        }

        while self.used_cost.load(Ordering::Relaxed) > self.config.max_cost {
            if !self.evict_one(&key) {
                break;
            }
        }
        true
    }

    /// Drop the least-hit entry among a sample, never `protected`.
    fn evict_one(&self, protected: &str) -> bool {
        let victim = self
            .entries
            .iter()
            .filter(|entry| entry.key() != protected)
            .take(self.config.sample_size.max(1))
            .min_by_key(|entry| entry.value().hits.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone());

        let Some(victim) = victim else {
            return false;
        };
        if let Some((_, slot)) = self.entries.remove(&victim) {
            self.used_cost.fetch_sub(slot.cost, Ordering::Relaxed);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            record_cache_eviction();
            trace!(key = %victim, "Address evicted from cache");
        }
        true
    }

    /// Remove every entry of a tenant. Returns the number removed.
    pub fn remove_tenant(&self, tenant: &TenantId) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, slot| {
            if slot.value.tenant_id == *tenant {
                self.used_cost.fetch_sub(slot.cost, Ordering::Relaxed);
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    /// Replace all cached addresses of a tenant with `records`.
    pub fn refresh(&self, tenant: &TenantId, records: &[AddressRecord]) {
        let removed = self.remove_tenant(tenant);
        let mut cached = 0;
        for record in records.iter().filter(|r| r.tenant_id == *tenant) {
            if self.set(CachedAddress::from(record)) {
                cached += 1;
            }
        }
        debug!(tenant = %tenant, removed, cached, "🔄 Address cache refreshed");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
            used_cost: self.used_cost.load(Ordering::Relaxed),
        }
    }
}

impl Default for AddressCache {
    fn default() -> Self {
        Self::new(AddressCacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn tenant(id: &str) -> TenantId {
        TenantId::parse(id).unwrap()
    }

    fn entry(t: &str, address: &str, role: AddressRole) -> CachedAddress {
        CachedAddress {
            tenant_id: tenant(t),
            address: address.into(),
            role,
        }
    }

    #[test]
    fn get_after_set_and_miss_counting() {
        let cache = AddressCache::default();
        cache.set(entry("T1", "0xaa", AddressRole::Hot));

        assert_eq!(
            cache.get(&tenant("T1"), "0xaa").map(|c| c.role),
            Some(AddressRole::Hot)
        );
        assert!(cache.get(&tenant("T1"), "0xbb").is_none());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    // Test critique: la même adresse chez deux tenants reste isolée
    #[test]
    fn tenants_do_not_share_entries() {
        let cache = AddressCache::default();
        cache.set(entry("T1", "0xaa", AddressRole::Eoa));
        cache.set(entry("T2", "0xaa", AddressRole::Cold));

        assert_eq!(cache.get(&tenant("T1"), "0xaa").unwrap().role, AddressRole::Eoa);
        assert_eq!(cache.get(&tenant("T2"), "0xaa").unwrap().role, AddressRole::Cold);
        assert!(cache.get(&tenant("T3"), "0xaa").is_none());
    }

    // Test critique: l'éviction retire l'entrée la moins consultée
    #[test]
    fn eviction_keeps_frequently_used_entries() {
        let t = tenant("T1");
        let per_entry = AddressCache::entry_cost(&t, "0x01");
        let cache = AddressCache::new(AddressCacheConfig {
            max_cost: per_entry * 3,
            sample_size: 16,
        });

        cache.set(entry("T1", "0x01", AddressRole::Eoa));
        cache.set(entry("T1", "0x02", AddressRole::Eoa));
        cache.set(entry("T1", "0x03", AddressRole::Eoa));
        for _ in 0..3 {
            cache.get(&t, "0x01");
            cache.get(&t, "0x03");
        }

        cache.set(entry("T1", "0x04", AddressRole::Eoa));

        let stats = cache.stats();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.evictions, 1);
        assert!(stats.used_cost <= per_entry * 3);
        assert!(cache.get(&t, "0x02").is_none());
        assert!(cache.get(&t, "0x01").is_some());
        assert!(cache.get(&t, "0x04").is_some());
    }

    #[test]
    fn replacing_an_entry_does_not_leak_cost() {
        let cache = AddressCache::default();
        cache.set(entry("T1", "0xaa", AddressRole::Eoa));
        let before = cache.stats().used_cost;
        cache.set(entry("T1", "0xaa", AddressRole::Hot));
        assert_eq!(cache.stats().used_cost, before);
        assert_eq!(cache.get(&tenant("T1"), "0xaa").unwrap().role, AddressRole::Hot);
    }

    #[test]
    fn refresh_replaces_only_the_tenant() {
        let cache = AddressCache::default();
        cache.set(entry("T1", "0xaa", AddressRole::Eoa));
        cache.set(entry("T1", "0xbb", AddressRole::Eoa));
        cache.set(entry("T2", "0xcc", AddressRole::Hot));

        let records = vec![AddressRecord {
            tenant_id: tenant("T1"),
            address: "0xdd".into(),
            role: AddressRole::Cold,
            public_key: String::new(),
            created_at: Utc::now(),
        }];
        cache.refresh(&tenant("T1"), &records);

        assert!(cache.get(&tenant("T1"), "0xaa").is_none());
        assert_eq!(cache.get(&tenant("T1"), "0xdd").unwrap().role, AddressRole::Cold);
        assert!(cache.get(&tenant("T2"), "0xcc").is_some());
        assert_eq!(cache.stats().entries, 2);
    }
}
