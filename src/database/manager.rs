use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{OnceCell, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::pool::{PoolError, PoolFactory};
use crate::crypto::{CipherError, CredentialCipher};
use crate::directory::{DirectoryError, TenantDirectory};
use crate::types::TenantId;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

const DEFAULT_REVALIDATE_AFTER: Duration = Duration::from_secs(5);

/// Errors from TenantConnectionManager
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Unknown tenant, or a tenant that is not `Active`. The edge answers both with 404.
    #[error("Tenant not ready: {0}")]
    TenantNotReady(TenantId),

    #[error("Active tenant {0} has no connection secret")]
    MissingSecret(TenantId),

    #[error("Connection secret for tenant {tenant_id} is unusable")]
    Credential {
        tenant_id: TenantId,
        #[source]
        source: CipherError,
    },

    #[error("Failed to open pool for tenant {tenant_id}")]
    Connect {
        tenant_id: TenantId,
        #[source]
        source: PoolError,
    },

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl ConnectionError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, ConnectionError::TenantNotReady(_))
    }
}

struct CachedPool<P> {
    id: u64,
    tenant_id: TenantId,
    pool: P,
    opened_at: Instant,
    /// Millis after `opened_at`
    last_used_ms: AtomicU64,
    /// Millis after `opened_at` the directory last confirmed the tenant `Active`
    validated_ms: AtomicU64,
    retired: AtomicBool,
}

impl<P> CachedPool<P> {
    fn new(tenant_id: TenantId, pool: P) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            tenant_id,
            pool,
            opened_at: Instant::now(),
            last_used_ms: AtomicU64::new(0),
            validated_ms: AtomicU64::new(0),
            retired: AtomicBool::new(false),
        }
    }

    fn age_ms(&self) -> u64 {
        u64::try_from(self.opened_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn touch(&self) {
        self.last_used_ms.fetch_max(self.age_ms(), Ordering::Relaxed);
    }

    fn mark_validated(&self) {
        self.validated_ms.fetch_max(self.age_ms(), Ordering::Relaxed);
    }

    fn validated_for(&self) -> Duration {
        (self.opened_at + Duration::from_millis(self.validated_ms.load(Ordering::Relaxed))).elapsed()
    }

    /// True for exactly one caller; that caller closes the pool
    fn retire(&self) -> bool {
        !self.retired.swap(true, Ordering::AcqRel)
    }

    fn last_used_at(&self) -> Instant {
        self.opened_at + Duration::from_millis(self.last_used_ms.load(Ordering::Relaxed))
    }

    fn idle_for(&self) -> Duration {
        self.last_used_at().elapsed()
    }
}

/// A tenant's cached pool, lent out for the duration of one request
pub struct ConnectionHandle<P> {
    entry: Arc<CachedPool<P>>,
}

impl<P> ConnectionHandle<P> {
    pub fn tenant_id(&self) -> &TenantId {
        &self.entry.tenant_id
    }

    pub fn pool(&self) -> &P {
        &self.entry.pool
    }

    /// Process-unique id of the underlying pool; equal ids mean the same pool
    pub fn id(&self) -> u64 {
        self.entry.id
    }

    pub fn last_used_at(&self) -> Instant {
        self.entry.last_used_at()
    }

    /// Live references to the pool, the cache's own included
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.entry)
    }
}

impl<P> std::fmt::Debug for ConnectionHandle<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.entry.id)
            .field("tenant_id", &self.entry.tenant_id)
            .finish()
    }
}

/// At most one pool creation in flight per tenant id: concurrent misses wait on the same cell
type Slot<P> = Arc<OnceCell<Arc<CachedPool<P>>>>;

/// Resolves tenant ids to live pooled connections, caching one pool per tenant
pub struct TenantConnectionManager<F: PoolFactory> {
    directory: Arc<dyn TenantDirectory>,
    cipher: Arc<CredentialCipher>,
    factory: F,
    idle_timeout: Duration,
    revalidate_after: Duration,
    slots: RwLock<HashMap<TenantId, Slot<F::Pool>>>,
}

impl<F: PoolFactory> TenantConnectionManager<F> {
    pub fn new(
        directory: Arc<dyn TenantDirectory>,
        cipher: Arc<CredentialCipher>,
        factory: F,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            cipher,
            factory,
            idle_timeout,
            revalidate_after: DEFAULT_REVALIDATE_AFTER,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// How long a cached pool is served before the tenant's status is read again
    pub fn with_revalidate_after(mut self, revalidate_after: Duration) -> Self {
        self.revalidate_after = revalidate_after;
        self
    }

    pub async fn get_connection(&self, tenant_id: &TenantId) -> Result<ConnectionHandle<F::Pool>, ConnectionError> {
        // Fast path: cached, alive and still routable
        if let Some(entry) = self.cached(tenant_id).await {
            if !self.factory.is_alive(&entry.pool) {
                warn!("Pool #{} for tenant {} failed its liveness check", entry.id, tenant_id);
                self.discard(tenant_id, &entry, "dead").await;
            } else if self.still_routable(&entry).await {
                entry.touch();
                debug!("Reusing pool #{} for tenant {}", entry.id, tenant_id);
                return Ok(ConnectionHandle { entry });
            } else {
                self.discard(tenant_id, &entry, "tenant no longer active").await;
                return Err(ConnectionError::TenantNotReady(tenant_id.clone()));
            }
        }

        let slot = self.slot(tenant_id).await;
        match slot.get_or_try_init(|| self.open(tenant_id)).await {
            Ok(entry) => {
                let entry = Arc::clone(entry);
                // Invalidated or shut down while the pool was opening
                if !self.is_current(tenant_id, &slot).await {
                    self.close_entry(&entry, "invalidated while opening").await;
                    return Err(ConnectionError::TenantNotReady(tenant_id.clone()));
                }
                entry.touch();
                Ok(ConnectionHandle { entry })
            }
            Err(err) => {
                self.forget_empty_slot(tenant_id, &slot).await;
                Err(err)
            }
        }
    }

    /// Round trip through a handle's pool
    pub async fn ping(&self, handle: &ConnectionHandle<F::Pool>) -> Result<(), PoolError> {
        self.factory.ping(handle.pool()).await
    }

    /// Drop and close a tenant's pool, e.g. after the tenant was suspended
    pub async fn invalidate(&self, tenant_id: &TenantId) -> bool {
        let slot = self.slots.write().await.remove(tenant_id);
        match slot.and_then(|slot| slot.get().cloned()) {
            Some(entry) => {
                self.close_entry(&entry, "invalidated").await;
                true
            }
            None => false,
        }
    }

    /// Close pools unused for longer than the idle timeout that nobody is holding.
    /// Returns how many were evicted.
    pub async fn evict_idle(&self) -> usize {
        let expired: Vec<Arc<CachedPool<F::Pool>>> = {
            let mut slots = self.slots.write().await;
            let idle: Vec<TenantId> = slots
                .iter()
                .filter_map(|(tenant_id, slot)| {
                    let entry = slot.get()?;
                    // The cache's own reference is the only one left
                    let unused = Arc::strong_count(entry) == 1;
                    (unused && entry.idle_for() >= self.idle_timeout).then(|| tenant_id.clone())
                })
                .collect();

            idle.iter()
                .filter_map(|tenant_id| slots.remove(tenant_id))
                .filter_map(|slot| slot.get().cloned())
                .collect()
        };

        for entry in &expired {
            self.close_entry(entry, "idle").await;
        }
        expired.len()
    }

    /// Close every cached pool, for shutdown
    pub async fn close_all(&self) {
        let drained: Vec<Slot<F::Pool>> = self.slots.write().await.drain().map(|(_, slot)| slot).collect();
        for entry in drained.iter().filter_map(|slot| slot.get()) {
            self.close_entry(entry, "shutdown").await;
        }
    }

    /// Tenants with an open pool in the cache
    pub async fn cached_tenants(&self) -> Vec<TenantId> {
        let slots = self.slots.read().await;
        let mut tenants: Vec<TenantId> = slots
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(tenant_id, _)| tenant_id.clone())
            .collect();
        tenants.sort();
        tenants
    }

    /// Run `evict_idle` every `interval` until the manager is dropped
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let evicted = manager.evict_idle().await;
                if evicted > 0 {
                    debug!("Reaper evicted {} idle tenant pools", evicted);
                }
            }
        })
    }

    async fn cached(&self, tenant_id: &TenantId) -> Option<Arc<CachedPool<F::Pool>>> {
        let slots = self.slots.read().await;
        slots.get(tenant_id).and_then(|slot| slot.get().cloned())
    }

    /// Re-read the tenant's status once the last confirmation is older than `revalidate_after`.
    /// A directory outage keeps the pool in service.
    async fn still_routable(&self, entry: &CachedPool<F::Pool>) -> bool {
        if entry.validated_for() < self.revalidate_after {
            return true;
        }
        match self.directory.lookup(&entry.tenant_id).await {
            Ok(Some(record)) if record.status.is_routable() => {
                entry.mark_validated();
                true
            }
            Ok(record) => {
                let status = record.map_or_else(|| "gone".to_string(), |r| r.status.to_string());
                info!("Tenant {} is {}, dropping pool #{}", entry.tenant_id, status, entry.id);
                false
            }
            Err(e) => {
                warn!(
                    "Could not revalidate tenant {}, keeping pool #{}: {}",
                    entry.tenant_id, entry.id, e
                );
                true
            }
        }
    }

    async fn is_current(&self, tenant_id: &TenantId, slot: &Slot<F::Pool>) -> bool {
        let slots = self.slots.read().await;
        slots.get(tenant_id).is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    async fn slot(&self, tenant_id: &TenantId) -> Slot<F::Pool> {
        // Fast path: read lock for an existing slot
        {
            let slots = self.slots.read().await;
            if let Some(slot) = slots.get(tenant_id) {
                return Arc::clone(slot);
            }
        }

        // Slow path: double-check under the write lock
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(tenant_id.clone()).or_default())
    }

    async fn open(&self, tenant_id: &TenantId) -> Result<Arc<CachedPool<F::Pool>>, ConnectionError> {
        let record = self
            .directory
            .lookup(tenant_id)
            .await?
            .ok_or_else(|| ConnectionError::TenantNotReady(tenant_id.clone()))?;

        if !record.status.is_routable() {
            debug!("Tenant {} is {}, refusing to route", tenant_id, record.status);
            return Err(ConnectionError::TenantNotReady(tenant_id.clone()));
        }

        let secret = record
            .encrypted_connection_secret
            .as_deref()
            .ok_or_else(|| ConnectionError::MissingSecret(tenant_id.clone()))?;

        let connection_string = self
            .cipher
            .decrypt(secret)
            .map_err(|source| ConnectionError::Credential {
                tenant_id: tenant_id.clone(),
                source,
            })?;

        let pool = self
            .factory
            .open(tenant_id, &connection_string)
            .await
            .map_err(|source| ConnectionError::Connect {
                tenant_id: tenant_id.clone(),
                source,
            })?;

        let entry = Arc::new(CachedPool::new(tenant_id.clone(), pool));
        info!("Cached pool #{} for tenant {}", entry.id, tenant_id);
        Ok(entry)
    }

    /// Remove `entry` if it is still the cached one, then close it
    async fn discard(&self, tenant_id: &TenantId, entry: &Arc<CachedPool<F::Pool>>, reason: &str) {
        {
            let mut slots = self.slots.write().await;
            let is_current = slots
                .get(tenant_id)
                .and_then(|slot| slot.get())
                .is_some_and(|cached| Arc::ptr_eq(cached, entry));
            if is_current {
                slots.remove(tenant_id);
            }
        }
        self.close_entry(entry, reason).await;
    }

    /// A failed initialization must not leave an empty slot behind
    async fn forget_empty_slot(&self, tenant_id: &TenantId, slot: &Slot<F::Pool>) {
        let mut slots = self.slots.write().await;
        let is_ours = slots
            .get(tenant_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized());
        if is_ours {
            slots.remove(tenant_id);
        }
    }

    async fn close_entry(&self, entry: &CachedPool<F::Pool>, reason: &str) {
        if !entry.retire() {
            return;
        }
        self.factory.close(entry.pool.clone()).await;
        info!("Closed pool #{} for tenant {} ({})", entry.id, entry.tenant_id, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryTenantDirectory;
    use crate::testing::{active_record, test_cipher, FakePoolFactory};
    use crate::types::{TenantRecord, TenantStatus};

    fn id(raw: &str) -> TenantId {
        TenantId::parse(raw).unwrap()
    }

    async fn manager_with(
        records: Vec<TenantRecord>,
        idle_timeout: Duration,
    ) -> (Arc<TenantConnectionManager<FakePoolFactory>>, FakePoolFactory) {
        let directory = MemoryTenantDirectory::new();
        for record in records {
            directory.insert_record(record).await;
        }
        let factory = FakePoolFactory::new();
        let manager = TenantConnectionManager::new(
            Arc::new(directory),
            Arc::new(test_cipher()),
            factory.clone(),
            idle_timeout,
        );
        (Arc::new(manager), factory)
    }

    #[tokio::test]
    async fn caches_one_pool_per_tenant() {
        let cipher = test_cipher();
        let (manager, factory) =
            manager_with(vec![active_record(&cipher, "acme")], Duration::from_secs(60)).await;

        let first = manager.get_connection(&id("acme")).await.unwrap();
        let second = manager.get_connection(&id("acme")).await.unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(first.tenant_id().as_str(), "acme");
        assert_eq!(first.pool().connection_string, "postgres://acme:pw@db.example.net/acme");
        assert_eq!(first.ref_count(), 3);
        assert_eq!(factory.opened(), 1);
        assert_eq!(manager.cached_tenants().await, vec![id("acme")]);
    }

    #[tokio::test]
    async fn concurrent_misses_open_exactly_one_pool() {
        let cipher = test_cipher();
        let (manager, factory) =
            manager_with(vec![active_record(&cipher, "acme")], Duration::from_secs(60)).await;
        factory.set_open_delay(Duration::from_millis(50));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_connection(&id("acme")).await.map(|h| h.id()) })
            })
            .collect();

        let ids: Vec<u64> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(factory.opened(), 1);
        assert!(ids.iter().all(|pool_id| *pool_id == ids[0]));
    }

    #[tokio::test]
    async fn unknown_and_unready_tenants_look_the_same() {
        let cipher = test_cipher();
        let provisioning = TenantRecord::provisioning(id("pending"), "Pending Inc");
        let mut suspended = active_record(&cipher, "paused");
        suspended.status = TenantStatus::Suspended;
        let (manager, factory) = manager_with(vec![provisioning, suspended], Duration::from_secs(60)).await;

        for tenant in ["missing", "pending", "paused"] {
            let err = manager.get_connection(&id(tenant)).await.unwrap_err();
            assert!(err.is_not_ready(), "{tenant}: {err}");
        }
        assert_eq!(factory.opened(), 0);
        assert!(manager.cached_tenants().await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_secret_hard_fails() {
        let cipher = test_cipher();
        let mut record = active_record(&cipher, "acme");
        if let Some(secret) = record.encrypted_connection_secret.as_mut() {
            secret[20] ^= 0xff;
        }
        let (manager, factory) = manager_with(vec![record], Duration::from_secs(60)).await;

        let err = manager.get_connection(&id("acme")).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Credential {
                source: CipherError::Integrity,
                ..
            }
        ));
        assert_eq!(factory.opened(), 0);
    }

    #[tokio::test]
    async fn failed_open_is_retried_on_next_request() {
        let cipher = test_cipher();
        let (manager, factory) =
            manager_with(vec![active_record(&cipher, "acme")], Duration::from_secs(60)).await;
        factory.fail_next_open();

        assert!(matches!(
            manager.get_connection(&id("acme")).await,
            Err(ConnectionError::Connect { .. })
        ));
        assert!(manager.cached_tenants().await.is_empty());

        assert!(manager.get_connection(&id("acme")).await.is_ok());
        assert_eq!(factory.opened(), 2);
    }

    #[tokio::test]
    async fn dead_pools_are_replaced() {
        let cipher = test_cipher();
        let (manager, factory) =
            manager_with(vec![active_record(&cipher, "acme")], Duration::from_secs(60)).await;

        let first = manager.get_connection(&id("acme")).await.unwrap();
        first.pool().kill();
        let first_id = first.id();
        drop(first);

        let second = manager.get_connection(&id("acme")).await.unwrap();
        assert_ne!(second.id(), first_id);
        assert_eq!(factory.opened(), 2);
        assert_eq!(factory.closed(), 1);
    }

    #[tokio::test]
    async fn idle_eviction_skips_pools_in_use() {
        let cipher = test_cipher();
        let (manager, factory) = manager_with(vec![active_record(&cipher, "acme")], Duration::ZERO).await;

        let held = manager.get_connection(&id("acme")).await.unwrap();
        assert_eq!(manager.evict_idle().await, 0);

        drop(held);
        assert_eq!(manager.evict_idle().await, 1);
        assert_eq!(factory.closed(), 1);
        assert!(manager.cached_tenants().await.is_empty());
    }

    #[tokio::test]
    async fn recently_used_pools_survive_eviction() {
        let cipher = test_cipher();
        let (manager, _factory) =
            manager_with(vec![active_record(&cipher, "acme")], Duration::from_secs(60)).await;

        drop(manager.get_connection(&id("acme")).await.unwrap());
        assert_eq!(manager.evict_idle().await, 0);
        assert_eq!(manager.cached_tenants().await, vec![id("acme")]);
    }

    #[tokio::test]
    async fn invalidate_and_close_all_close_pools() {
        let cipher = test_cipher();
        let (manager, factory) = manager_with(
            vec![active_record(&cipher, "acme"), active_record(&cipher, "globex")],
            Duration::from_secs(60),
        )
        .await;

        drop(manager.get_connection(&id("acme")).await.unwrap());
        drop(manager.get_connection(&id("globex")).await.unwrap());

        assert!(manager.invalidate(&id("acme")).await);
        assert!(!manager.invalidate(&id("acme")).await);
        assert_eq!(manager.cached_tenants().await, vec![id("globex")]);

        manager.close_all().await;
        assert!(manager.cached_tenants().await.is_empty());
        assert_eq!(factory.closed(), 2);
    }

    #[tokio::test]
    async fn suspension_in_the_directory_stops_routing() {
        let cipher = test_cipher();
        let directory = Arc::new(MemoryTenantDirectory::new());
        directory.insert_record(active_record(&cipher, "acme")).await;
        let factory = FakePoolFactory::new();
        let manager = TenantConnectionManager::new(
            directory.clone(),
            Arc::new(cipher),
            factory.clone(),
            Duration::from_secs(60),
        )
        .with_revalidate_after(Duration::ZERO);

        drop(manager.get_connection(&id("acme")).await.unwrap());
        // Another process suspends the tenant; this manager is never told
        directory.suspend(&id("acme")).await.unwrap();

        let err = manager.get_connection(&id("acme")).await.unwrap_err();
        assert!(err.is_not_ready(), "{err}");
        assert_eq!(factory.closed(), 1);
        assert!(manager.cached_tenants().await.is_empty());

        directory.reactivate(&id("acme")).await.unwrap();
        assert!(manager.get_connection(&id("acme")).await.is_ok());
        assert_eq!(factory.opened(), 2);
    }

    #[tokio::test]
    async fn revalidation_keeps_active_pools() {
        let cipher = test_cipher();
        let directory = Arc::new(MemoryTenantDirectory::new());
        directory.insert_record(active_record(&cipher, "acme")).await;
        let factory = FakePoolFactory::new();
        let manager = TenantConnectionManager::new(
            directory.clone(),
            Arc::new(cipher),
            factory.clone(),
            Duration::from_secs(60),
        )
        .with_revalidate_after(Duration::ZERO);

        let first = manager.get_connection(&id("acme")).await.unwrap().id();
        let second = manager.get_connection(&id("acme")).await.unwrap().id();
        assert_eq!(first, second);
        assert_eq!(factory.opened(), 1);
        assert_eq!(factory.closed(), 0);
    }

    #[tokio::test]
    async fn pools_are_trusted_inside_the_revalidation_window() {
        let cipher = test_cipher();
        let directory = Arc::new(MemoryTenantDirectory::new());
        directory.insert_record(active_record(&cipher, "acme")).await;
        let manager = TenantConnectionManager::new(
            directory.clone(),
            Arc::new(cipher),
            FakePoolFactory::new(),
            Duration::from_secs(60),
        )
        .with_revalidate_after(Duration::from_secs(60));

        drop(manager.get_connection(&id("acme")).await.unwrap());
        directory.suspend(&id("acme")).await.unwrap();
        assert!(manager.get_connection(&id("acme")).await.is_ok());
    }

    #[tokio::test]
    async fn invalidate_during_open_closes_the_new_pool() {
        let cipher = test_cipher();
        let (manager, factory) =
            manager_with(vec![active_record(&cipher, "acme")], Duration::from_secs(60)).await;
        factory.set_open_delay(Duration::from_millis(100));

        let opening = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_connection(&id("acme")).await.map(|h| h.id()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!manager.invalidate(&id("acme")).await);

        let err = opening.await.unwrap().unwrap_err();
        assert!(err.is_not_ready(), "{err}");
        assert_eq!(factory.opened(), 1);
        assert_eq!(factory.closed(), 1);
        assert!(manager.cached_tenants().await.is_empty());
    }

    #[tokio::test]
    async fn reaper_evicts_in_the_background() {
        let cipher = test_cipher();
        let (manager, factory) = manager_with(vec![active_record(&cipher, "acme")], Duration::ZERO).await;

        drop(manager.get_connection(&id("acme")).await.unwrap());
        let reaper = manager.spawn_reaper(Duration::from_millis(10));

        for _ in 0..50 {
            if factory.closed() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        reaper.abort();
        assert_eq!(factory.closed(), 1);
    }
}
