//! XA backend session pool (component H).
//!
//! Per the resolved Open Question in DESIGN.md/SPEC_FULL.md §11, G and H
//! share one generic [`crate::pool::Pool`] implementation rather than two
//! copies of the same bounded-pool logic. This module only adds the
//! XA-specific handle shape and the "return is dictated by I, not the
//! caller" discipline from §4.H: the pool exposes a handle id, and only
//! [`crate::xa_registry::XaTransactionRegistry`] decides when a session
//! becomes eligible for `return_session` again.

use crate::pool::Pool;
use std::sync::Arc;

/// §3's `XABackendSession`'s non-state-machine half: an XA-capable handle
/// alongside the ordinary connection view the upstream driver exposes.
/// `underlying_xa_session` is the id the XA transaction registry (I) binds
/// a Xid to; it is assigned by the factory that creates the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XaSessionHandle {
    pub underlying_xa_session: u64,
    pub underlying_connection: u64,
}

/// Component H: `Pool<XaSessionHandle>`. Exists as a named alias so call
/// sites read as "the XA pool" rather than a bare generic instantiation.
pub type XaBackendPool = Pool<XaSessionHandle>;

pub fn new_xa_backend_pool(conn_hash: String, config: ojp_proto::config::XaPoolConfig) -> Arc<XaBackendPool> {
    // XaPoolConfig and PoolConfig name the same shape of cap under
    // different field names (§6 environment keys); adapt once here so the
    // shared `Pool<H>` never needs to know about the XA naming.
    let pool_config = ojp_proto::config::PoolConfig {
        maximum_pool_size: config.max_total,
        minimum_idle: config.min_idle,
        idle_timeout_ms: config.idle_before_recycle_ms,
        max_lifetime_ms: config.max_lifetime_ms,
        connection_timeout_ms: 30_000,
        leak_detection_threshold_ms: if config.leak_detection_enabled {
            Some(config.leak_detection_threshold_ms)
        } else {
            None
        },
    };
    Pool::new(conn_hash, pool_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn borrow_produces_a_distinct_xa_handle_per_slot() {
        let pool = new_xa_backend_pool("hash1".to_string(), ojp_proto::config::XaPoolConfig::default());
        let session = pool
            .borrow(|| async {
                Ok(XaSessionHandle {
                    underlying_xa_session: 1,
                    underlying_connection: 1,
                })
            })
            .await
            .unwrap();
        assert_eq!(session.handle.underlying_xa_session, 1);
        pool.return_session(session, false).await;
    }
}
