//! Session tracker (component C): session id -> endpoint, and the reverse
//! per-endpoint session count the selector (B) needs.

use crate::endpoint::EndpointId;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Binding {
    endpoint: EndpointId,
    in_transaction: bool,
}

/// Component C.
pub struct SessionTracker {
    inner: RwLock<HashMap<String, Binding>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Idempotent and atomic per §4.C: registering the same (sid, ep) twice
    /// does not double-count.
    pub async fn register(&self, session_id: &str, endpoint: &EndpointId) {
        let mut inner = self.inner.write().await;
        inner.entry(session_id.to_string()).or_insert_with(|| Binding {
            endpoint: endpoint.clone(),
            in_transaction: false,
        });
    }

    pub async fn unregister(&self, session_id: &str) {
        self.inner.write().await.remove(session_id);
    }

    pub async fn endpoint_for(&self, session_id: &str) -> Option<EndpointId> {
        self.inner.read().await.get(session_id).map(|b| b.endpoint.clone())
    }

    pub async fn is_in_transaction(&self, session_id: &str) -> bool {
        self.inner
            .read()
            .await
            .get(session_id)
            .map(|b| b.in_transaction)
            .unwrap_or(false)
    }

    pub async fn set_in_transaction(&self, session_id: &str, in_transaction: bool) {
        let mut inner = self.inner.write().await;
        if let Some(binding) = inner.get_mut(session_id) {
            binding.in_transaction = in_transaction;
        }
    }

    /// Derived `endpointToCount`, floored at zero per §4.C.
    pub async fn session_count_by_endpoint(&self) -> HashMap<EndpointId, u32> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        for binding in inner.values() {
            *counts.entry(binding.endpoint.clone()).or_insert(0u32) += 1;
        }
        counts
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_is_idempotent() {
        let tracker = SessionTracker::new();
        tracker.register("s1", &"e1".to_string()).await;
        tracker.register("s1", &"e1".to_string()).await;
        let counts = tracker.session_count_by_endpoint().await;
        assert_eq!(counts.get("e1"), Some(&1));
    }

    #[tokio::test]
    async fn unregister_decrements_count() {
        let tracker = SessionTracker::new();
        tracker.register("s1", &"e1".to_string()).await;
        tracker.register("s2", &"e1".to_string()).await;
        tracker.unregister("s1").await;
        let counts = tracker.session_count_by_endpoint().await;
        assert_eq!(counts.get("e1"), Some(&1));
    }

    #[tokio::test]
    async fn count_never_goes_negative() {
        let tracker = SessionTracker::new();
        tracker.unregister("never-registered").await;
        let counts = tracker.session_count_by_endpoint().await;
        assert!(counts.is_empty());
    }

    #[tokio::test]
    async fn endpoint_lookup_reflects_binding() {
        let tracker = SessionTracker::new();
        tracker.register("s1", &"e1".to_string()).await;
        assert_eq!(tracker.endpoint_for("s1").await, Some("e1".to_string()));
        assert_eq!(tracker.endpoint_for("unknown").await, None);
    }
}
