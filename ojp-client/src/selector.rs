//! Server selector (component B): load-aware pick with round-robin tie-break.

use crate::endpoint::EndpointId;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, thiserror::Error)]
#[error("no healthy endpoint available")]
pub struct NoHealthyEndpoint;

/// Component B. Stateless apart from the fairness cursor (§4.B step 3).
pub struct ServerSelector {
    load_aware: bool,
    cursor: AtomicU64,
}

impl ServerSelector {
    pub fn new(load_aware: bool) -> Self {
        Self {
            load_aware,
            cursor: AtomicU64::new(0),
        }
    }

    /// `pick(healthySet, sessionCountByEndpoint) -> Endpoint` per §4.B.
    pub fn pick(
        &self,
        healthy_set: &[EndpointId],
        session_count_by_endpoint: &std::collections::HashMap<EndpointId, u32>,
    ) -> Result<EndpointId, NoHealthyEndpoint> {
        if healthy_set.is_empty() {
            return Err(NoHealthyEndpoint);
        }

        let candidates: Vec<&EndpointId> = if self.load_aware {
            let min_count = healthy_set
                .iter()
                .map(|e| session_count_by_endpoint.get(e).copied().unwrap_or(0))
                .min()
                .unwrap_or(0);
            healthy_set
                .iter()
                .filter(|e| session_count_by_endpoint.get(*e).copied().unwrap_or(0) == min_count)
                .collect()
        } else {
            healthy_set.iter().collect()
        };

        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) as usize % candidates.len();
        Ok(candidates[idx].clone())
    }
}
