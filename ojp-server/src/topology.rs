//! Cluster topology change handler (component P): the proxy-side mirror of
//! the client's health view, piggybacked on every request. On any change
//! it calls the pool coordinator (J) with the new healthy count (§4.P).

use crate::coordinator::{PoolAllocation, PoolCoordinator};
use ojp_proto::health::ClusterHealthView;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Component P. One instance per `ProxyNode`, holding the coordinator it
/// drives — per §9's design note, an explicit object owned by the
/// `ProxyNode` context rather than a global singleton.
pub struct TopologyHandler {
    coordinator: std::sync::Arc<PoolCoordinator>,
    /// Last health view observed per connHash, used to detect change.
    last_seen: RwLock<HashMap<String, ClusterHealthView>>,
}

impl TopologyHandler {
    pub fn new(coordinator: std::sync::Arc<PoolCoordinator>) -> Self {
        Self {
            coordinator,
            last_seen: RwLock::new(HashMap::new()),
        }
    }

    /// Ingests the cluster-health view piggybacked on an incoming request
    /// for `conn_hash`. The *first* report for a connHash is always
    /// treated as "changed" to force initial configuration — preserved
    /// literally per §9's Open Question, since it is also the only signal
    /// available after a proxy restart.
    pub async fn observe(
        &self,
        conn_hash: &str,
        view: &ClusterHealthView,
        configured_max: u32,
        configured_min_idle: u32,
    ) -> Option<PoolAllocation> {
        let changed = {
            let mut last_seen = self.last_seen.write().await;
            match last_seen.get(conn_hash) {
                None => {
                    last_seen.insert(conn_hash.to_string(), view.clone());
                    true
                }
                Some(previous) if previous != view => {
                    last_seen.insert(conn_hash.to_string(), view.clone());
                    true
                }
                Some(_) => false,
            }
        };

        if !changed {
            return None;
        }

        let healthy_count = view
            .endpoints
            .iter()
            .filter(|e| e.status == ojp_proto::health::EndpointStatus::Up)
            .count() as u32;

        tracing::info!(conn_hash, healthy_count, "topology change observed, rebalancing");
        Some(
            self.coordinator
                .update_healthy_servers(conn_hash, configured_max, configured_min_idle, healthy_count)
                .await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ojp_proto::health::{EndpointHealth, EndpointStatus};

    fn view(statuses: &[EndpointStatus]) -> ClusterHealthView {
        ClusterHealthView {
            endpoints: statuses
                .iter()
                .enumerate()
                .map(|(i, s)| EndpointHealth {
                    host: format!("h{i}"),
                    port: 5000 + i as u16,
                    status: *s,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn first_report_always_triggers_rebalance() {
        let handler = TopologyHandler::new(std::sync::Arc::new(PoolCoordinator::new()));
        let result = handler
            .observe("hash1", &view(&[EndpointStatus::Up, EndpointStatus::Up]), 30, 6)
            .await;
        assert!(result.is_some());
        assert_eq!(result.unwrap().healthy_node_count, 2);
    }

    #[tokio::test]
    async fn identical_second_report_does_not_rebalance() {
        let handler = TopologyHandler::new(std::sync::Arc::new(PoolCoordinator::new()));
        let v = view(&[EndpointStatus::Up, EndpointStatus::Up]);
        handler.observe("hash1", &v, 30, 6).await;
        let result = handler.observe("hash1", &v, 30, 6).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn a_node_flipping_down_triggers_rebalance() {
        let handler = TopologyHandler::new(std::sync::Arc::new(PoolCoordinator::new()));
        handler
            .observe("hash1", &view(&[EndpointStatus::Up, EndpointStatus::Up]), 30, 6)
            .await;
        let result = handler
            .observe("hash1", &view(&[EndpointStatus::Up, EndpointStatus::Down]), 30, 6)
            .await;
        assert_eq!(result.unwrap().current_max, 30);
    }
}
