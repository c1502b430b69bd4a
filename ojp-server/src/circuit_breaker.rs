//! Circuit breaker (component O): per-statement failure threshold (§4.O).
//!
//! Grounded on the resilience-pattern config-profile style from the
//! broader example pack's generic connection-pool crate, adapted from
//! connection-limit counting to failure-window counting; shaped like
//! tower's circuit-breaker middleware (closed/open/half-open) but
//! expressed directly rather than through a `tower::Service` layer since
//! this facade sits inside the wire mux (M), not in front of a transport.

use ojp_proto::config::CircuitBreakerConfig;
use ojp_proto::OjpError;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
}

struct StatementBreaker {
    state: BreakerState,
    /// Bounded ring of recent outcomes, `true` = failure.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
}

impl StatementBreaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            window: VecDeque::new(),
            opened_at: None,
        }
    }

    fn failure_count(&self) -> u32 {
        self.window.iter().filter(|f| **f).count() as u32
    }
}

/// Component O. One instance per `ProxyNode`, keyed internally by
/// statement fingerprint.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<u32, StatementBreaker>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// `preCheck` per §4.O: fails fast with `CircuitOpen` while the
    /// breaker for `fingerprint` is open and the cooldown has not elapsed;
    /// flips back to half-open (closed, empty window) once it has.
    pub async fn pre_check(&self, fingerprint: u32) -> Result<(), OjpError> {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.entry(fingerprint).or_insert_with(StatementBreaker::new);

        if breaker.state == BreakerState::Open {
            let cooled_down = breaker
                .opened_at
                .map(|at| at.elapsed().as_millis() as u64 >= self.config.timeout_ms)
                .unwrap_or(true);
            if cooled_down {
                breaker.state = BreakerState::Closed;
                breaker.window.clear();
                breaker.opened_at = None;
                tracing::info!(fingerprint = format!("{fingerprint:#x}"), "circuit half-opened after cooldown");
            } else {
                return Err(OjpError::CircuitOpen { fingerprint });
            }
        }
        Ok(())
    }

    /// Records the outcome of an attempt that passed `pre_check`. A
    /// success resets the window (§4.O: "success calls reset counters").
    pub async fn record_outcome(&self, fingerprint: u32, succeeded: bool) {
        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.entry(fingerprint).or_insert_with(StatementBreaker::new);

        if succeeded {
            breaker.window.clear();
            return;
        }

        breaker.window.push_back(true);
        while breaker.window.len() > self.config.window_size {
            breaker.window.pop_front();
        }

        if breaker.failure_count() >= self.config.threshold && breaker.state == BreakerState::Closed {
            breaker.state = BreakerState::Open;
            breaker.opened_at = Some(Instant::now());
            tracing::warn!(fingerprint = format!("{fingerprint:#x}"), "circuit opened");
        }
    }
}
