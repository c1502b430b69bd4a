//! Slow-query segregation (component K): partitions each pool's slots into
//! "fast" and "slow" subsets by learned per-query latency, so a long-running
//! statement cannot starve short ones (§4.K).
//!
//! Slot acquisition is two `tokio::sync::Semaphore`s whose permit counts
//! are recomputed from `totalSlots`/`slowFraction` whenever the pool
//! coordinator (J) resizes the pool. Statement fingerprinting reuses
//! `crc32fast`, already in the dependency stack via `ojp-proto`'s wire
//! framing.

use ojp_proto::config::SlowQueryConfig;
use ojp_proto::OjpError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;

/// §3's `SlotBook`. `fast_slots + slow_slots == total_slots` always, with
/// at least one of each when segregation is enabled (§3 invariant).
#[derive(Debug, Clone, Copy)]
pub struct SlotBook {
    pub total_slots: u32,
    pub fast_slots: u32,
    pub slow_slots: u32,
    pub slow_fraction: f64,
}

impl SlotBook {
    fn calculate(total_slots: u32, slow_fraction: f64) -> Self {
        if total_slots == 0 {
            return Self {
                total_slots: 0,
                fast_slots: 0,
                slow_slots: 0,
                slow_fraction,
            };
        }
        let mut slow_slots = (total_slots as f64 * slow_fraction).round() as u32;
        slow_slots = slow_slots.clamp(1, total_slots - 1);
        Self {
            total_slots,
            fast_slots: total_slots - slow_slots,
            slow_slots,
            slow_fraction,
        }
    }
}

/// A guard held for the duration of one statement's execution; releasing
/// the semaphore permit and feeding the observed latency back into the
/// rolling average both happen through this guard.
pub struct SlotGuard<'a> {
    book: &'a SlotSegregator,
    fingerprint: u32,
    #[allow(dead_code)]
    permit: tokio::sync::OwnedSemaphorePermit,
}

impl<'a> SlotGuard<'a> {
    /// Releases the slot and records `latency_ms` against the statement's
    /// rolling average, per §4.K's "on completion... the rolling averages
    /// are updated".
    pub async fn complete(self, latency_ms: f64) {
        self.book.record_latency(self.fingerprint, latency_ms).await;
    }
}

/// Rolling per-statement average plus the global average both classifiers
/// and segregation depend on.
struct RollingAverages {
    per_statement: HashMap<u32, (f64, u64)>,
    global_sum: f64,
    global_count: u64,
}

impl RollingAverages {
    fn new() -> Self {
        Self {
            per_statement: HashMap::new(),
            global_sum: 0.0,
            global_count: 0,
        }
    }

    fn avg(&self, fingerprint: u32) -> Option<f64> {
        self.per_statement.get(&fingerprint).map(|(sum, count)| sum / *count as f64)
    }

    fn global_avg(&self) -> f64 {
        if self.global_count == 0 {
            0.0
        } else {
            self.global_sum / self.global_count as f64
        }
    }

    fn record(&mut self, fingerprint: u32, latency_ms: f64) {
        let entry = self.per_statement.entry(fingerprint).or_insert((0.0, 0));
        entry.0 += latency_ms;
        entry.1 += 1;
        self.global_sum += latency_ms;
        self.global_count += 1;
    }
}

/// Component K. One instance per connHash's pool.
pub struct SlotSegregator {
    config: SlowQueryConfig,
    book: std::sync::RwLock<SlotBook>,
    fast: Arc<Semaphore>,
    slow: Arc<Semaphore>,
    averages: Mutex<RollingAverages>,
    refusals: AtomicU32,
    fingerprint_seq: AtomicU64,
}

/// Grows or shrinks `sem`'s permit count by the delta between `old` and
/// `new`. Shrinking forgets permits rather than acquiring them, so it never
/// blocks on slots currently checked out.
fn adjust_semaphore(sem: &Semaphore, old: u32, new: u32) {
    match new.cmp(&old) {
        std::cmp::Ordering::Greater => sem.add_permits((new - old) as usize),
        std::cmp::Ordering::Less => {
            sem.forget_permits((old - new) as usize);
        }
        std::cmp::Ordering::Equal => {}
    }
}

/// Fingerprints the canonicalized SQL text with `crc32fast`, matching the
/// framing layer's existing checksum dependency rather than adding a new
/// hashing crate for this one use.
pub fn fingerprint(sql: &str) -> u32 {
    let canonical: String = sql.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    crc32fast::hash(canonical.as_bytes())
}

impl SlotSegregator {
    pub fn new(total_slots: u32, config: SlowQueryConfig) -> Self {
        let book = if config.enabled {
            SlotBook::calculate(total_slots, config.slot_percentage)
        } else {
            // Disabled: the entire pool is fast slots with a single timeout
            // (§4.K).
            SlotBook {
                total_slots,
                fast_slots: total_slots,
                slow_slots: 0,
                slow_fraction: 0.0,
            }
        };
        Self {
            config,
            fast: Arc::new(Semaphore::new(book.fast_slots as usize)),
            slow: Arc::new(Semaphore::new(book.slow_slots as usize)),
            book: std::sync::RwLock::new(book),
            averages: Mutex::new(RollingAverages::new()),
            refusals: AtomicU32::new(0),
            fingerprint_seq: AtomicU64::new(0),
        }
    }

    pub fn slot_book(&self) -> SlotBook {
        *self.book.read().unwrap()
    }

    /// Applied when J resizes the owning pool: recomputes `fastSlots`/
    /// `slowSlots` from the new `totalSlots` and adjusts each semaphore's
    /// permit count by the delta (in-flight permits already issued keep
    /// their allocation either way, per §4.P's non-destructive rebalance).
    pub fn resize(&self, new_total_slots: u32) {
        let new_book = if self.config.enabled {
            SlotBook::calculate(new_total_slots, self.config.slot_percentage)
        } else {
            SlotBook {
                total_slots: new_total_slots,
                fast_slots: new_total_slots,
                slow_slots: 0,
                slow_fraction: 0.0,
            }
        };
        let old_book = {
            let mut book = self.book.write().unwrap();
            let old = *book;
            *book = new_book;
            old
        };
        adjust_semaphore(&self.fast, old_book.fast_slots, new_book.fast_slots);
        adjust_semaphore(&self.slow, old_book.slow_slots, new_book.slow_slots);
    }

    /// Classifies `sql` as fast or slow per §4.K: `avg(stmt) > globalAvg *
    /// slowFactor` routes to a slow slot.
    async fn is_slow(&self, fingerprint: u32) -> bool {
        if !self.config.enabled {
            return false;
        }
        let averages = self.averages.lock().await;
        match averages.avg(fingerprint) {
            Some(avg) => avg > averages.global_avg() * self.config.slow_factor,
            None => false,
        }
    }

    /// Acquires a slot for `sql`, blocking up to the kind's configured
    /// timeout. A slow slot may be granted to a fast request when no fast
    /// slot is free and `fallbackAllowed`, never the reverse (§4.K).
    pub async fn acquire(&self, sql: &str) -> Result<SlotGuard<'_>, OjpError> {
        let fp = fingerprint(sql);
        if self.is_slow(fp).await {
            let permit = timeout(
                Duration::from_millis(self.config.slow_slot_timeout_ms),
                Arc::clone(&self.slow).acquire_owned(),
            )
            .await
            .map_err(|_| self.refusal(fp))?
            .expect("semaphore not closed");
            return Ok(SlotGuard {
                book: self,
                fingerprint: fp,
                permit,
            });
        }

        // Fast path: prefer the fast semaphore, fall back to the slow one
        // only if configured and the fast one is exhausted.
        let fast_timeout = Duration::from_millis(self.config.fast_slot_timeout_ms);
        if let Ok(Ok(permit)) = timeout(fast_timeout, Arc::clone(&self.fast).acquire_owned()).await {
            return Ok(SlotGuard {
                book: self,
                fingerprint: fp,
                permit,
            });
        }

        if self.config.fallback_allowed {
            let permit = timeout(
                Duration::from_millis(self.config.slow_slot_timeout_ms),
                Arc::clone(&self.slow).acquire_owned(),
            )
            .await
            .map_err(|_| self.refusal(fp))?
            .expect("semaphore not closed");
            return Ok(SlotGuard {
                book: self,
                fingerprint: fp,
                permit,
            });
        }

        Err(self.refusal(fp))
    }

    fn refusal(&self, fingerprint: u32) -> OjpError {
        self.refusals.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(fingerprint = format!("{fingerprint:#x}"), "slot acquisition timed out");
        OjpError::PoolExhausted {
            conn_hash: String::new(),
            in_use: 0,
            configured_max: self.slot_book().total_slots,
        }
    }

    async fn record_latency(&self, fingerprint: u32, latency_ms: f64) {
        self.averages.lock().await.record(fingerprint, latency_ms);
    }

    pub fn refusal_count(&self) -> u32 {
        self.refusals.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool) -> SlowQueryConfig {
        SlowQueryConfig {
            enabled,
            slot_percentage: 0.5,
            idle_timeout_ms: 1_000,
            slow_slot_timeout_ms: 50,
            fast_slot_timeout_ms: 50,
            update_global_avg_interval_ms: 1_000,
            slow_factor: 2.0,
            fallback_allowed: true,
        }
    }

    #[test]
    fn slot_book_splits_and_sums_to_total() {
        let book = SlotBook::calculate(10, 0.3);
        assert_eq!(book.fast_slots + book.slow_slots, 10);
        assert_eq!(book.slow_slots, 3);
    }

    #[test]
    fn disabled_segregation_is_all_fast_slots() {
        let segregator = SlotSegregator::new(8, config(false));
        let book = segregator.slot_book();
        assert_eq!(book.fast_slots, 8);
        assert_eq!(book.slow_slots, 0);
    }

    #[tokio::test]
    async fn acquire_and_complete_round_trips() {
        let segregator = SlotSegregator::new(4, config(true));
        let guard = segregator.acquire("SELECT 1").await.unwrap();
        guard.complete(5.0).await;
    }

    #[tokio::test]
    async fn classifies_hot_statement_as_slow_after_learning() {
        let segregator = SlotSegregator::new(4, config(true));
        // Teach the classifier: this fingerprint runs much slower than the
        // global average built from other statements.
        for _ in 0..5 {
            let guard = segregator.acquire("SELECT fast()").await.unwrap();
            guard.complete(1.0).await;
        }
        for _ in 0..5 {
            let guard = segregator.acquire("SELECT slow()").await.unwrap();
            guard.complete(500.0).await;
        }
        assert!(segregator.is_slow(fingerprint("SELECT slow()")).await);
        assert!(!segregator.is_slow(fingerprint("SELECT fast()")).await);
    }

    #[tokio::test]
    async fn resize_changes_slot_book() {
        let segregator = SlotSegregator::new(4, config(true));
        segregator.resize(10);
        let book = segregator.slot_book();
        assert_eq!(book.total_slots, 10);
    }

    #[tokio::test]
    async fn resize_actually_changes_acquirable_permits() {
        let segregator = SlotSegregator::new(4, config(true));
        let before = segregator.fast.available_permits() + segregator.slow.available_permits();
        segregator.resize(10);
        let after = segregator.fast.available_permits() + segregator.slow.available_permits();
        assert_eq!(before, 4);
        assert_eq!(after, 10);
    }

    #[tokio::test]
    async fn shrinking_never_blocks_on_outstanding_permits() {
        let segregator = SlotSegregator::new(4, config(false));
        let _held = segregator.acquire("SELECT 1").await.unwrap();
        segregator.resize(1);
        assert_eq!(segregator.fast.available_permits(), 0);
    }
}
