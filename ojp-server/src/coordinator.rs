//! Multinode pool coordinator (component J): divides a global pool budget
//! across the currently healthy proxy nodes and emits resize events when
//! that count changes.

use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

/// Per (connHash, pool-kind) allocation state, §3's `PoolAllocation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolAllocation {
    pub configured_max: u32,
    pub configured_min_idle: u32,
    pub current_max: u32,
    pub current_min_idle: u32,
    pub healthy_node_count: u32,
}

impl PoolAllocation {
    /// `currentMax = ceil(configMax / max(1, healthyNodeCount))`, same
    /// shape for min (§4.J, invariant 3).
    pub fn calculate(configured_max: u32, configured_min_idle: u32, healthy_node_count: u32) -> Self {
        let divisor = healthy_node_count.max(1);
        Self {
            configured_max,
            configured_min_idle,
            current_max: ceil_div(configured_max, divisor),
            current_min_idle: ceil_div(configured_min_idle, divisor),
            healthy_node_count,
        }
    }
}

fn ceil_div(numerator: u32, divisor: u32) -> u32 {
    (numerator + divisor - 1) / divisor
}

/// A resize decision for one (connHash, pool-kind), broadcast to listeners
/// (G applies it to its own pool at runtime; I forwards it to H).
#[derive(Debug, Clone)]
pub struct ResizeEvent {
    pub conn_hash: String,
    pub allocation: PoolAllocation,
}

/// Component J. One instance shared by every connHash's pools.
pub struct PoolCoordinator {
    allocations: RwLock<HashMap<String, PoolAllocation>>,
    resize_tx: broadcast::Sender<ResizeEvent>,
}

impl PoolCoordinator {
    pub fn new() -> Self {
        let (resize_tx, _) = broadcast::channel(256);
        Self {
            allocations: RwLock::new(HashMap::new()),
            resize_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResizeEvent> {
        self.resize_tx.subscribe()
    }

    pub async fn current(&self, conn_hash: &str) -> Option<PoolAllocation> {
        self.allocations.read().await.get(conn_hash).copied()
    }

    /// `updateHealthyServers(connHash, n)` per §4.J: recomputes and emits a
    /// resize event. The recompute is idempotent — applying the same
    /// `healthy_node_count` twice produces the same allocation and still
    /// emits (listeners must tolerate a no-op resize).
    pub async fn update_healthy_servers(
        &self,
        conn_hash: &str,
        configured_max: u32,
        configured_min_idle: u32,
        healthy_node_count: u32,
    ) -> PoolAllocation {
        let allocation = PoolAllocation::calculate(configured_max, configured_min_idle, healthy_node_count);
        self.allocations
            .write()
            .await
            .insert(conn_hash.to_string(), allocation);
        // A send error just means nobody is currently subscribed.
        let _ = self.resize_tx.send(ResizeEvent {
            conn_hash: conn_hash.to_string(),
            allocation,
        });
        allocation
    }
}

impl Default for PoolCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_division_matches_invariant_3() {
        let alloc = PoolAllocation::calculate(10, 2, 3);
        assert_eq!(alloc.current_max, 4); // ceil(10/3)
        assert_eq!(alloc.current_min_idle, 1); // ceil(2/3)
    }

    #[test]
    fn even_division_equals_configured_max() {
        let alloc = PoolAllocation::calculate(9, 3, 3);
        assert_eq!(alloc.current_max, 3);
    }

    #[test]
    fn zero_healthy_nodes_floors_divisor_at_one() {
        let alloc = PoolAllocation::calculate(10, 2, 0);
        assert_eq!(alloc.current_max, 10);
    }

    #[tokio::test]
    async fn update_emits_resize_event() {
        let coordinator = PoolCoordinator::new();
        let mut rx = coordinator.subscribe();
        coordinator.update_healthy_servers("hash1", 10, 2, 2).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.conn_hash, "hash1");
        assert_eq!(event.allocation.current_max, 5);
    }

    #[tokio::test]
    async fn resize_is_idempotent() {
        let coordinator = PoolCoordinator::new();
        let first = coordinator.update_healthy_servers("hash1", 10, 2, 2).await;
        let second = coordinator.update_healthy_servers("hash1", 10, 2, 2).await;
        assert_eq!(first, second);
    }
}
