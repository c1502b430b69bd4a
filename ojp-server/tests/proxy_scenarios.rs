//! Multi-component integration tests for the proxy-side scenarios named
//! in §8: pool rebalance on a node failure (S5) and the XA happy path
//! with dual-condition release (S6).

use ojp_proto::config::PoolConfig;
use ojp_proto::xid::{Xid, XaEndFlag, XaStartFlag};
use ojp_server::coordinator::PoolCoordinator;
use ojp_server::pool::Pool;
use ojp_server::xa_registry::XaTransactionRegistry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// S5: three endpoints share a 30-slot budget (10 each); one goes
/// unhealthy and the remaining two rebalance to 15; recovery restores 10.
#[tokio::test]
async fn pool_rebalances_on_endpoint_failure_and_restores_on_recovery() {
    let coordinator = Arc::new(PoolCoordinator::new());
    let pool: Arc<Pool<u32>> = Pool::new(
        "conn-hash-1".to_string(),
        PoolConfig {
            maximum_pool_size: 30,
            ..PoolConfig::default()
        },
    );

    let mut rx = coordinator.subscribe();
    let coordinator_listener = Arc::clone(&coordinator);
    let pool_listener = Arc::clone(&pool);
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if event.conn_hash == "conn-hash-1" {
                pool_listener
                    .resize(event.allocation.current_max, event.allocation.current_min_idle)
                    .await;
            }
        }
        let _ = &coordinator_listener;
    });

    coordinator.update_healthy_servers("conn-hash-1", 30, 0, 3).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.configured_max().await, 10);

    // One of the three endpoints goes unhealthy.
    coordinator.update_healthy_servers("conn-hash-1", 30, 0, 2).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.configured_max().await, 15);

    // It recovers.
    coordinator.update_healthy_servers("conn-hash-1", 30, 0, 3).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.configured_max().await, 10);
}

/// S6: start -> end -> prepare -> commit, with the backend session only
/// returned to the pool once both halves of the dual condition hold.
#[tokio::test]
async fn xa_happy_path_releases_session_only_after_client_disconnects() {
    let registry = XaTransactionRegistry::new();
    let pool: Arc<Pool<u32>> = Pool::new("xa-hash-1".to_string(), PoolConfig::default());

    let counter = Arc::new(AtomicU32::new(0));
    let c = Arc::clone(&counter);
    let session = pool
        .borrow(|| {
            let c = Arc::clone(&c);
            async move { Ok(c.fetch_add(1, Ordering::SeqCst)) }
        })
        .await
        .unwrap();
    let underlying_handle = session.handle as u64;

    let xid = Xid {
        format_id: 1,
        global_tx_id: vec![9],
        branch_qualifier: vec![0],
    };

    registry.start(xid.clone(), XaStartFlag::NoFlags, underlying_handle).await.unwrap();
    registry.end(&xid, XaEndFlag::Success).await.unwrap();
    registry.prepare(&xid).await.unwrap();
    registry.commit(&xid, false).await.unwrap();

    // Transaction is complete but the client hasn't disconnected yet:
    // the pool still believes the session is on loan.
    assert_eq!(pool.total(), 1);

    let released = registry.close_client_connection(&xid).await.unwrap();
    assert_eq!(released, Some(underlying_handle));

    // Only now does the caller return the handle to the pool.
    pool.return_session(session, false).await;
    assert_eq!(pool.total(), 1);

    let prepared = registry.recover().await;
    assert!(prepared.is_empty());
}
