//! Proxy node for Open J Proxy: components F through P (§2 system overview).
//!
//! `ojp-client` speaks the wire protocol defined in `ojp-proto`; this crate
//! is the other end of that wire — the proxy that authenticates a logical
//! connection, lazily allocates pooled upstream sessions, coordinates
//! two-phase commit, and rebalances pool budgets as the cluster's healthy
//! node count changes.
//!
//! Per §9's design note ("global singletons... -> explicit objects owned
//! by a `ProxyNode` context passed into handlers"), every component here
//! is a field of [`ProxyNode`] rather than a process-wide static; tests
//! construct a fresh `ProxyNode` instead of relying on shared global state.

pub mod circuit_breaker;
pub mod coordinator;
pub mod handlers;
pub mod lob;
pub mod mux;
pub mod pool;
pub mod reflection;
pub mod session;
pub mod slow_query;
pub mod topology;
pub mod xa_pool;
pub mod xa_registry;

use circuit_breaker::CircuitBreaker;
use coordinator::{PoolAllocation, PoolCoordinator};
use lob::LobStore;
use ojp_proto::config::OjpConfig;
use pool::{Pool, PooledSession};
use reflection::ResourceTable;
use session::SessionManager;
use slow_query::SlotSegregator;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use ojp_proto::xid::Xid;
use topology::TopologyHandler;
use xa_pool::{new_xa_backend_pool, XaBackendPool, XaSessionHandle};
use xa_registry::XaTransactionRegistry;

pub use ojp_proto::OjpError;
pub type Result<T> = std::result::Result<T, OjpError>;

/// Polling cadence for each pool's leak detector, independent of the
/// configured `leak_detection_threshold_ms` itself (§4.G).
const LEAK_DETECTOR_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Per-connHash state that doesn't fit the generic pool (the ordinary pool
/// itself is generic over the driver handle type `H` and stays in its own
/// map on [`ProxyNode`]).
struct PerDatasource {
    xa_pool: Arc<XaBackendPool>,
    xa_registry: Arc<XaTransactionRegistry>,
    slots: Arc<SlotSegregator>,
}

/// The proxy node context: owns every component F-P for one proxy
/// process. Generic over `H`, the upstream driver's connection-handle
/// type, since loading the actual vendor driver is an external
/// collaborator per §1's scope — `ojp-server` never names a concrete
/// database client.
pub struct ProxyNode<H: Send + 'static> {
    pub config: OjpConfig,
    pub sessions: Arc<SessionManager>,
    pub coordinator: Arc<PoolCoordinator>,
    pub topology: Arc<TopologyHandler>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub lobs: Arc<LobStore>,
    pub resources: ResourceTable,
    pools: RwLock<HashMap<String, Arc<Pool<H>>>>,
    datasources: RwLock<HashMap<String, PerDatasource>>,
    /// §3's `ClientSession` owning its connection exclusively: the pooled
    /// ordinary-session handle borrowed for a session, keyed by SessionId,
    /// from the moment `connect` allocates it until `terminateSession`
    /// returns it to G.
    active_connections: RwLock<HashMap<String, PooledSession<H>>>,
    /// XA counterpart: the pooled XA handle held by a live binding, keyed
    /// by the `underlying_xa_session` id the registry (I) binds a Xid to.
    /// Held here rather than in `XaTransactionRegistry` itself, since I
    /// only needs the id to decide *when* to release, not the pool's
    /// bookkeeping struct (§4.H: "return is dictated by I, not the caller").
    active_xa_sessions: RwLock<HashMap<u64, PooledSession<XaSessionHandle>>>,
    /// The Xid a session is currently bound to, for sessions that have
    /// issued `xaStart(NOFLAGS)` (§4.I). `terminateSession` consults this
    /// to drive `close_client_connection` without the caller needing to
    /// track it independently.
    active_xids: RwLock<HashMap<String, Xid>>,
}

impl<H: Send + 'static> ProxyNode<H> {
    pub fn new(config: OjpConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let coordinator = Arc::new(PoolCoordinator::new());
        let node = Arc::new(Self {
            sessions: Arc::new(SessionManager::new(config.session)),
            topology: Arc::new(TopologyHandler::new(Arc::clone(&coordinator))),
            circuit_breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker)),
            lobs: Arc::new(LobStore::new()),
            resources: ResourceTable,
            coordinator,
            pools: RwLock::new(HashMap::new()),
            datasources: RwLock::new(HashMap::new()),
            active_connections: RwLock::new(HashMap::new()),
            active_xa_sessions: RwLock::new(HashMap::new()),
            active_xids: RwLock::new(HashMap::new()),
            config,
        });
        node.sessions.spawn_cleanup_task();
        Ok(node)
    }

    /// Lazily allocates every per-connHash component (G, H, I, K) the
    /// first time a session is created against that datasource, per
    /// §4.F's "Create" behavior.
    async fn ensure_datasource(&self, conn_hash: &str) {
        let mut datasources = self.datasources.write().await;
        if !datasources.contains_key(conn_hash) {
            let slots = Arc::new(SlotSegregator::new(self.config.pool.maximum_pool_size, self.config.slow_query));
            let xa_pool = new_xa_backend_pool(conn_hash.to_string(), self.config.xa_pool.clone());
            if self.config.xa_pool.leak_detection_enabled {
                xa_pool.spawn_leak_detector(LEAK_DETECTOR_POLL_INTERVAL);
            }
            datasources.insert(
                conn_hash.to_string(),
                PerDatasource {
                    xa_pool,
                    xa_registry: Arc::new(XaTransactionRegistry::new()),
                    slots,
                },
            );
        }
    }

    pub async fn pool_for(&self, conn_hash: &str, factory: impl FnOnce() -> Arc<Pool<H>>) -> Arc<Pool<H>> {
        if let Some(pool) = self.pools.read().await.get(conn_hash) {
            return Arc::clone(pool);
        }
        let mut pools = self.pools.write().await;
        let is_new = !pools.contains_key(conn_hash);
        let pool = Arc::clone(pools.entry(conn_hash.to_string()).or_insert_with(factory));
        if is_new && self.config.pool.leak_detection_threshold_ms.is_some() {
            pool.spawn_leak_detector(LEAK_DETECTOR_POLL_INTERVAL);
        }
        pool
    }

    pub async fn xa_pool_for(&self, conn_hash: &str) -> Arc<XaBackendPool> {
        self.ensure_datasource(conn_hash).await;
        Arc::clone(&self.datasources.read().await.get(conn_hash).unwrap().xa_pool)
    }

    pub async fn xa_registry_for(&self, conn_hash: &str) -> Arc<XaTransactionRegistry> {
        self.ensure_datasource(conn_hash).await;
        Arc::clone(&self.datasources.read().await.get(conn_hash).unwrap().xa_registry)
    }

    pub async fn slots_for(&self, conn_hash: &str) -> Arc<SlotSegregator> {
        self.ensure_datasource(conn_hash).await;
        Arc::clone(&self.datasources.read().await.get(conn_hash).unwrap().slots)
    }

    /// Binds a freshly borrowed ordinary-pool session to `session_id`,
    /// exclusively owning it for the lifetime of the session (§3).
    pub async fn bind_connection(&self, session_id: &str, pooled: PooledSession<H>) {
        self.active_connections.write().await.insert(session_id.to_string(), pooled);
    }

    /// Removes and returns the connection owned by `session_id`, e.g. for
    /// `terminateSession` to hand back to G.
    pub async fn take_connection(&self, session_id: &str) -> Option<PooledSession<H>> {
        self.active_connections.write().await.remove(session_id)
    }

    /// A read guard over every live connection, held across the driver call
    /// a handler makes so the session's handle can't be taken out from
    /// under it mid-call. Async closures borrowing `&H` aren't expressible
    /// on stable Rust, so handlers index through this guard directly
    /// instead of going through a callback.
    pub async fn connections_read(&self) -> tokio::sync::RwLockReadGuard<'_, HashMap<String, PooledSession<H>>> {
        self.active_connections.read().await
    }

    /// Looks up an already-created pool for `conn_hash` without creating
    /// one, for callers (like `terminateSession`) that must not allocate a
    /// pool for a datasource no session is actually using.
    pub async fn pool_lookup(&self, conn_hash: &str) -> Option<Arc<Pool<H>>> {
        self.pools.read().await.get(conn_hash).cloned()
    }

    /// Stashes a borrowed XA-pool session under its own handle id until the
    /// transaction registry (I) decides it is releasable.
    pub async fn bind_xa_session(&self, underlying_xa_session: u64, pooled: PooledSession<XaSessionHandle>) {
        self.active_xa_sessions.write().await.insert(underlying_xa_session, pooled);
    }

    pub async fn take_xa_session(&self, underlying_xa_session: u64) -> Option<PooledSession<XaSessionHandle>> {
        self.active_xa_sessions.write().await.remove(&underlying_xa_session)
    }

    /// Remembers which Xid a session most recently started with
    /// `NOFLAGS`, overwriting any prior binding (a connection only runs one
    /// branch transaction at a time).
    pub async fn bind_session_xid(&self, session_id: &str, xid: Xid) {
        self.active_xids.write().await.insert(session_id.to_string(), xid);
    }

    pub async fn session_xid(&self, session_id: &str) -> Option<Xid> {
        self.active_xids.read().await.get(session_id).cloned()
    }

    pub async fn clear_session_xid(&self, session_id: &str) -> Option<Xid> {
        self.active_xids.write().await.remove(session_id)
    }

    /// Applies a resize decision from the pool coordinator (J) to every
    /// component that partitions its capacity by connHash: the ordinary
    /// pool's caps, the XA pool's caps, and the slot segregator's total
    /// slot count. Rebalance is non-destructive per §4.P: in-flight
    /// borrows and permits keep their allocation.
    pub async fn apply_resize(&self, conn_hash: &str, allocation: PoolAllocation) {
        if let Some(pool) = self.pools.read().await.get(conn_hash) {
            pool.resize(allocation.current_max, allocation.current_min_idle).await;
        }
        if let Some(ds) = self.datasources.read().await.get(conn_hash) {
            ds.xa_pool.resize(allocation.current_max, allocation.current_min_idle).await;
            ds.slots.resize(allocation.current_max);
        }
    }

    /// Subscribes to J's resize broadcast and applies every event as it
    /// arrives, for the lifetime of the returned task.
    pub fn spawn_resize_listener(self: &Arc<Self>) {
        let node = Arc::clone(self);
        let mut rx = node.coordinator.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                node.apply_resize(&event.conn_hash, event.allocation).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lazily_allocates_per_datasource_components_once() {
        let node = ProxyNode::<u32>::new(OjpConfig::default()).unwrap();
        let a = node.xa_registry_for("hash1").await;
        let b = node.xa_registry_for("hash1").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn resize_listener_applies_coordinator_events_to_the_pool() {
        let node = ProxyNode::<u32>::new(OjpConfig::default()).unwrap();
        let pool = node
            .pool_for("hash1", || Pool::new("hash1".to_string(), node.config.pool.clone()))
            .await;
        node.spawn_resize_listener();

        node.coordinator.update_healthy_servers("hash1", 10, 2, 2).await;
        // Give the spawned listener a chance to run.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(pool.configured_max().await, 5);
    }
}
