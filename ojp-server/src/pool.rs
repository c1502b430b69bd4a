//! Connection pool (component G) and, parameterized over a session kind,
//! the XA backend session pool (component H) — the Open Question in
//! SPEC_FULL.md §11 resolves these to one generic implementation.
//!
//! Grounded on the donor's `ConnectionPool` (bounded, `VecDeque`, atomic
//! total-connections counter), generalized from TCP connections to an
//! opaque upstream-driver handle: loading the actual vendor driver is an
//! external collaborator per the system's scope, so the pool is generic
//! over whatever handle type the caller's factory produces.

use ojp_proto::config::PoolConfig;
use ojp_proto::OjpError;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// A session borrowed from the pool, carrying whatever upstream handle the
/// factory produced plus the bookkeeping §3's `PooledSession` names.
pub struct PooledSession<H> {
    pub handle: H,
    pub borrowed_at: Instant,
    pub last_used_at: Instant,
    pub created_at: Instant,
    pub auto_commit_reset_needed: bool,
    pub isolation_reset_needed: bool,
    borrow_id: u64,
}

impl<H> PooledSession<H> {
    fn fresh(handle: H, borrow_id: u64) -> Self {
        let now = Instant::now();
        Self {
            handle,
            borrowed_at: now,
            last_used_at: now,
            created_at: now,
            auto_commit_reset_needed: false,
            isolation_reset_needed: false,
            borrow_id,
        }
    }

    fn is_expired(&self, max_lifetime_ms: u64) -> bool {
        self.created_at.elapsed() > Duration::from_millis(max_lifetime_ms)
    }

    fn is_idle_expired(&self, idle_timeout_ms: u64) -> bool {
        self.last_used_at.elapsed() > Duration::from_millis(idle_timeout_ms)
    }
}

/// Bounded pool of `PooledSession<H>`, keyed externally by connHash (the
/// caller owns one `Pool` per connHash; see `coordinator.rs`).
pub struct Pool<H> {
    available: Mutex<VecDeque<PooledSession<H>>>,
    total: AtomicU32,
    config: Mutex<PoolConfig>,
    conn_hash: String,
    /// `borrow_id -> borrowed_at` for every session currently out of the
    /// pool, scanned by the leak detector (§4.G). Entries are removed on
    /// `return_session`, so this only ever holds outstanding borrows.
    outstanding: Mutex<HashMap<u64, Instant>>,
    next_borrow_id: AtomicU64,
    leak_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<H: Send + 'static> Pool<H> {
    pub fn new(conn_hash: String, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            available: Mutex::new(VecDeque::new()),
            total: AtomicU32::new(0),
            config: Mutex::new(config),
            conn_hash,
            outstanding: Mutex::new(HashMap::new()),
            next_borrow_id: AtomicU64::new(0),
            leak_task: std::sync::Mutex::new(None),
        })
    }

    /// `borrow(timeout)` per §4.G: hands out an idle session if one passes
    /// its liveness/expiry checks, otherwise creates a new one up to the
    /// configured cap, otherwise waits up to `connection.timeout`.
    pub async fn borrow<F, Fut>(&self, factory: F) -> Result<PooledSession<H>, OjpError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<H, OjpError>>,
    {
        let config = self.config.lock().await.clone();
        timeout(Duration::from_millis(config.connection_timeout_ms), self.borrow_inner(&config, &factory))
            .await
            .map_err(|_| OjpError::PoolExhausted {
                conn_hash: self.conn_hash.clone(),
                in_use: self.total.load(Ordering::SeqCst),
                configured_max: config.maximum_pool_size,
            })?
    }

    async fn borrow_inner<F, Fut>(&self, config: &PoolConfig, factory: &F) -> Result<PooledSession<H>, OjpError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<H, OjpError>>,
    {
        loop {
            {
                let mut available = self.available.lock().await;
                while let Some(mut session) = available.pop_front() {
                    if session.is_expired(config.max_lifetime_ms) || session.is_idle_expired(config.idle_timeout_ms) {
                        self.total.fetch_sub(1, Ordering::SeqCst);
                        continue;
                    }
                    session.borrowed_at = Instant::now();
                    self.track_borrow(session.borrow_id, session.borrowed_at).await;
                    return Ok(session);
                }
            }

            let total = self.total.load(Ordering::SeqCst);
            if total < config.maximum_pool_size {
                self.total.fetch_add(1, Ordering::SeqCst);
                match factory().await {
                    Ok(handle) => {
                        let borrow_id = self.next_borrow_id.fetch_add(1, Ordering::SeqCst);
                        let session = PooledSession::fresh(handle, borrow_id);
                        self.track_borrow(borrow_id, session.borrowed_at).await;
                        return Ok(session);
                    }
                    Err(e) => {
                        self.total.fetch_sub(1, Ordering::SeqCst);
                        return Err(e);
                    }
                }
            }

            // Pool is at capacity with nothing idle; yield briefly and retry
            // until the outer `timeout` in `borrow` fires.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn track_borrow(&self, borrow_id: u64, borrowed_at: Instant) {
        self.outstanding.lock().await.insert(borrow_id, borrowed_at);
    }

    /// `return(session, wasFaulty)` per §4.G. Restores default auto-commit
    /// and isolation before the session becomes eligible for reuse, ejects
    /// sessions past their lifetime/idle ceilings or marked faulty.
    pub async fn return_session(&self, mut session: PooledSession<H>, was_faulty: bool) {
        self.outstanding.lock().await.remove(&session.borrow_id);
        let config = self.config.lock().await.clone();
        if was_faulty || session.is_expired(config.max_lifetime_ms) {
            self.total.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        session.auto_commit_reset_needed = false;
        session.isolation_reset_needed = false;
        session.last_used_at = Instant::now();
        self.available.lock().await.push_back(session);
    }

    /// Logs every outstanding borrow held past `leak_detection_threshold_ms`
    /// (§4.G). Returns the count warned, for tests. A no-op when leak
    /// detection is disabled (`leak_detection_threshold_ms` is `None`).
    pub async fn sweep_leaks(&self) -> usize {
        let Some(threshold_ms) = self.config.lock().await.leak_detection_threshold_ms else {
            return 0;
        };
        let threshold = Duration::from_millis(threshold_ms);
        let outstanding = self.outstanding.lock().await;
        let mut leaked = 0;
        for (borrow_id, borrowed_at) in outstanding.iter() {
            let held_for = borrowed_at.elapsed();
            if held_for > threshold {
                tracing::warn!(
                    conn_hash = %self.conn_hash,
                    borrow_id = *borrow_id,
                    held_for_ms = held_for.as_millis() as u64,
                    "potential connection leak: session borrowed past leak_detection_threshold_ms"
                );
                leaked += 1;
            }
        }
        leaked
    }

    /// Starts a background task polling `sweep_leaks` at a fixed cadence.
    /// Daemon-class like `SessionManager`'s cleanup task (§4.F); aborted on
    /// drop.
    pub fn spawn_leak_detector(self: &Arc<Self>, interval: Duration) {
        let pool = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                pool.sweep_leaks().await;
            }
        });
        *self.leak_task.lock().unwrap() = Some(handle);
    }

    /// Applied by the coordinator (J) on a topology change; in-flight
    /// borrows keep their allocation (§4.P: rebalance is non-destructive).
    pub async fn resize(&self, new_max: u32, new_min_idle: u32) {
        let mut config = self.config.lock().await;
        config.maximum_pool_size = new_max;
        config.minimum_idle = new_min_idle;
    }

    pub fn total(&self) -> u32 {
        self.total.load(Ordering::SeqCst)
    }

    pub async fn configured_max(&self) -> u32 {
        self.config.lock().await.maximum_pool_size
    }
}

impl<H> Drop for Pool<H> {
    fn drop(&mut self) {
        if let Some(handle) = self.leak_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}
