//! Request handlers (the orchestration half of component M): the glue that
//! walks one `ProxyNode` through a single wire operation end to end,
//! borrowing from and returning to the pools (G/H), driving the session
//! arena (F) and XA registry (I), and delegating the actual SQL execution
//! to `mux`'s `UpstreamDriver` seam.
//!
//! `mux.rs` defines the streaming *shape* of `executeUpdate`/`executeQuery`;
//! this module is what actually resolves a session id to a borrowed
//! connection and calls into it, and covers every other operation named in
//! §6 that `mux.rs` doesn't: connect, transaction bracketing, the full XA
//! lifecycle, `callResource`, `terminateSession`, LOB upload/download, and
//! `fetchNextRows`.

use crate::mux::{self, UpstreamDriver};
use crate::pool::Pool;
use crate::xa_pool::XaSessionHandle;
use crate::ProxyNode;
use ojp_proto::envelope::{FetchRequest, LobDataBlock, LobReference, OpResult, OpResultKind, SessionInfo, SessionTerminationStatus};
use ojp_proto::resource::{CallResourceRequest, CallResourceResponse, ResourceKind};
use ojp_proto::value::Value;
use ojp_proto::xid::{Xid, XaEndFlag, XaStartFlag};
use ojp_proto::OjpError;
use std::future::Future;
use tokio::sync::mpsc;

/// `connect(ConnectionDetails) -> SessionInfo` (§6): borrows a session from
/// the ordinary pool (G), lazily creating the pool for `conn_hash` on first
/// use, and binds it exclusively to the freshly created session (§3).
/// `server_endpoints`/`properties` are left for the caller to fill in from
/// the cluster health view carried on the envelope; connect itself only
/// knows about this one proxy node.
pub async fn connect<H, F, Fut>(node: &ProxyNode<H>, conn_hash: &str, is_xa: bool, session_factory: F) -> Result<SessionInfo, OjpError>
where
    H: Send + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<H, OjpError>>,
{
    let pool_config = node.config.pool.clone();
    let pool = node
        .pool_for(conn_hash, || Pool::new(conn_hash.to_string(), pool_config.clone()))
        .await;
    let pooled = pool.borrow(session_factory).await?;
    let session_id = node.sessions.create(conn_hash, is_xa).await;
    node.bind_connection(&session_id, pooled).await;
    Ok(SessionInfo {
        session_id,
        is_xa,
        server_endpoints: Vec::new(),
        properties: Vec::new(),
    })
}

/// `terminateSession(sessionId) -> SessionTerminationStatus` (§6):
/// idempotent (invariant 7). Returns the borrowed ordinary connection to G
/// and, if the session ever started an XA branch that is still open,
/// signals the registry's dual-condition release (invariant 4) for that
/// Xid too.
pub async fn terminate_session<H: Send + 'static>(node: &ProxyNode<H>, session_id: &str) -> Result<SessionTerminationStatus, OjpError> {
    let outcome = node.sessions.terminate(session_id).await;

    if !outcome.already_terminated {
        if let Some(pooled) = node.take_connection(session_id).await {
            if let Some(conn_hash) = &outcome.conn_hash {
                if let Some(pool) = node.pool_lookup(conn_hash).await {
                    pool.return_session(pooled, false).await;
                }
            }
        }

        if outcome.is_xa {
            if let (Some(xid), Some(conn_hash)) = (node.clear_session_xid(session_id).await, &outcome.conn_hash) {
                let registry = node.xa_registry_for(conn_hash).await;
                if let Ok(Some(handle_id)) = registry.close_client_connection(&xid).await {
                    release_xa_handle(node, conn_hash, handle_id).await;
                }
            }
        }
    }

    Ok(SessionTerminationStatus {
        session_id: session_id.to_string(),
        already_terminated: outcome.already_terminated,
    })
}

/// `executeUpdate(Request) -> OpResult` against the connection the session
/// owns, routed through the slow-query slot segregator (K).
pub async fn execute_update<H>(node: &ProxyNode<H>, session_id: &str, sql: &str, params: &[Value]) -> Result<OpResult, OjpError>
where
    H: UpstreamDriver + Send + Sync + 'static,
{
    node.sessions.touch(session_id).await?;
    let conn_hash = node.sessions.conn_hash_of(session_id).await?;
    let slots = node.slots_for(&conn_hash).await;
    let guard = slots.acquire(sql).await?;
    let started = std::time::Instant::now();

    let result = {
        let connections = node.connections_read().await;
        let session = connections.get(session_id).ok_or_else(|| OjpError::SessionInvalidated {
            session_id: session_id.to_string(),
        })?;
        mux::dispatch_execute_update(&session.handle, session_id, sql, params).await
    };

    guard.complete(started.elapsed().as_secs_f64() * 1000.0).await;
    result
}

/// `executeQuery(Request) -> stream OpResult`, same slot accounting as
/// `execute_update`, streaming into `sink` per `mux`'s chunking.
pub async fn execute_query<H>(
    node: &ProxyNode<H>,
    session_id: &str,
    sql: &str,
    params: &[Value],
    sink: &mpsc::Sender<Result<OpResult, OjpError>>,
) -> Result<(), OjpError>
where
    H: UpstreamDriver + Send + Sync + 'static,
{
    node.sessions.touch(session_id).await?;
    let conn_hash = node.sessions.conn_hash_of(session_id).await?;
    let slots = node.slots_for(&conn_hash).await;
    let guard = slots.acquire(sql).await?;
    let started = std::time::Instant::now();

    let result = {
        let connections = node.connections_read().await;
        let session = connections.get(session_id).ok_or_else(|| OjpError::SessionInvalidated {
            session_id: session_id.to_string(),
        })?;
        mux::dispatch_execute_query(&session.handle, session_id, sql, params, sink).await
    };

    guard.complete(started.elapsed().as_secs_f64() * 1000.0).await;
    result
}

/// `fetchNextRows(FetchRequest) -> stream OpResult` (§6): validates that
/// `result_set_id` is a live `ResultSet` resource owned by the session,
/// then streams further rows. Producing additional rows from an
/// already-open cursor is specific to the upstream driver's cursor API, an
/// external collaborator per §1's scope; this handler guarantees the
/// protocol always terminates with an `EndOfCursor` frame even when no
/// further rows are available.
pub async fn fetch_next_rows<H: Send + 'static>(
    node: &ProxyNode<H>,
    session_id: &str,
    request: &FetchRequest,
    sink: &mpsc::Sender<Result<OpResult, OjpError>>,
) -> Result<(), OjpError> {
    node.sessions.touch(session_id).await?;
    let kind = node.sessions.resource_kind(session_id, request.result_set_id).await?;
    if kind != ResourceKind::ResultSet {
        return Err(OjpError::Internal {
            component: "handlers".to_string(),
            details: format!("resource {} is not a result set", request.result_set_id),
        });
    }
    sink.send(Ok(OpResult {
        session_id: session_id.to_string(),
        kind: OpResultKind::EndOfCursor,
    }))
    .await
    .map_err(|_| OjpError::Internal {
        component: "handlers".to_string(),
        details: "result sink closed before fetchNextRows completed".to_string(),
    })
}

/// `startTransaction`/`commitTransaction`/`rollbackTransaction` (§6): local
/// bookkeeping on the session only — the actual SQL-level `BEGIN`/`COMMIT`/
/// `ROLLBACK` is issued by the caller through `execute_update` against the
/// same connection, since a session owns its connection exclusively (§3).
pub async fn start_transaction<H: Send + 'static>(node: &ProxyNode<H>, session_id: &str) -> Result<(), OjpError> {
    node.sessions.touch(session_id).await?;
    node.sessions.set_transaction_open(session_id, true).await
}

pub async fn commit_transaction<H: Send + 'static>(node: &ProxyNode<H>, session_id: &str) -> Result<(), OjpError> {
    node.sessions.touch(session_id).await?;
    node.sessions.set_transaction_open(session_id, false).await
}

pub async fn rollback_transaction<H: Send + 'static>(node: &ProxyNode<H>, session_id: &str) -> Result<(), OjpError> {
    node.sessions.touch(session_id).await?;
    node.sessions.set_transaction_open(session_id, false).await
}

/// `callResource` (§6, component N): confirms the caller's claimed
/// resource kind still matches what the session actually registered, then
/// dispatches through the reflection facade. A response minting a new
/// resource is registered against the session before it's returned to the
/// caller, per `CallResourceResponse::NewResource`'s contract.
pub async fn call_resource<H: Send + 'static>(
    node: &ProxyNode<H>,
    session_id: &str,
    request: &CallResourceRequest,
    invoke: &dyn Fn(ResourceKind, &str, &[Value]) -> Result<CallResourceResponse, OjpError>,
) -> Result<CallResourceResponse, OjpError> {
    node.sessions.touch(session_id).await?;
    let actual_kind = node.sessions.resource_kind(session_id, request.resource_id).await?;
    if actual_kind != request.resource_kind {
        return Err(OjpError::Internal {
            component: "handlers".to_string(),
            details: format!(
                "resource {} is a {:?}, not a {:?}",
                request.resource_id, actual_kind, request.resource_kind
            ),
        });
    }

    let response = node.resources.dispatch(request, invoke)?;
    if let CallResourceResponse::NewResource { kind, .. } = &response {
        node.sessions.register_resource(session_id, *kind).await?;
    }
    Ok(response)
}

/// Uploads one `LobDataBlock` (§6, component L). The first block (no
/// `lob_id` yet) registers a new `Lob` resource against the session.
pub async fn upload_lob_block<H: Send + 'static>(node: &ProxyNode<H>, session_id: &str, block: LobDataBlock) -> Result<LobReference, OjpError> {
    node.sessions.touch(session_id).await?;
    let is_first_block = block.lob_id.is_none();
    let reference = node.lobs.write_block(block).await?;
    if is_first_block {
        node.sessions.register_resource(session_id, ResourceKind::Lob).await?;
    }
    Ok(reference)
}

/// `readLob(lobId, pos, length)` (§6, component L).
pub async fn read_lob<H: Send + 'static>(node: &ProxyNode<H>, session_id: &str, lob_id: u64, position: u64, length: u64) -> Result<Vec<LobDataBlock>, OjpError> {
    node.sessions.touch(session_id).await?;
    node.lobs.read_range(lob_id, position, length).await
}

/// `xaStart(xid, flags)` (§6, component I): `NOFLAGS` borrows a fresh
/// session from the XA pool (H) and binds it to `xid`; `JOIN`/`RESUME`
/// attach to an already-bound session instead. The session is remembered
/// as carrying `xid` so `terminateSession` can drive
/// `close_client_connection` on disconnect.
pub async fn xa_start<H, F, Fut>(
    node: &ProxyNode<H>,
    conn_hash: &str,
    session_id: &str,
    xid: Xid,
    flag: XaStartFlag,
    xa_session_factory: F,
) -> Result<(), OjpError>
where
    H: Send + 'static,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<XaSessionHandle, OjpError>>,
{
    let registry = node.xa_registry_for(conn_hash).await;
    match flag {
        XaStartFlag::NoFlags => {
            let pool = node.xa_pool_for(conn_hash).await;
            let pooled = pool.borrow(xa_session_factory).await?;
            let handle_id = pooled.handle.underlying_xa_session;
            node.bind_xa_session(handle_id, pooled).await;
            registry.start(xid.clone(), flag, handle_id).await?;
            node.bind_session_xid(session_id, xid).await;
            Ok(())
        }
        XaStartFlag::Join | XaStartFlag::Resume => {
            registry.start(xid.clone(), flag, 0).await?;
            node.bind_session_xid(session_id, xid).await;
            Ok(())
        }
    }
}

pub async fn xa_end<H: Send + 'static>(node: &ProxyNode<H>, conn_hash: &str, xid: &Xid, flag: XaEndFlag) -> Result<(), OjpError> {
    node.xa_registry_for(conn_hash).await.end(xid, flag).await
}

pub async fn xa_prepare<H: Send + 'static>(node: &ProxyNode<H>, conn_hash: &str, xid: &Xid) -> Result<(), OjpError> {
    node.xa_registry_for(conn_hash).await.prepare(xid).await
}

/// `xaCommit`/`xaRollback` (§6, component I): releases the bound XA session
/// back to H the instant the dual condition (invariant 4) is satisfied,
/// which may happen here (if the client connection already closed) or
/// later in `terminate_session` (if it hasn't).
pub async fn xa_commit<H: Send + 'static>(node: &ProxyNode<H>, conn_hash: &str, xid: &Xid, one_phase: bool) -> Result<(), OjpError> {
    let released = node.xa_registry_for(conn_hash).await.commit(xid, one_phase).await?;
    if let Some(handle_id) = released {
        release_xa_handle(node, conn_hash, handle_id).await;
    }
    Ok(())
}

pub async fn xa_rollback<H: Send + 'static>(node: &ProxyNode<H>, conn_hash: &str, xid: &Xid) -> Result<(), OjpError> {
    let released = node.xa_registry_for(conn_hash).await.rollback(xid).await?;
    if let Some(handle_id) = released {
        release_xa_handle(node, conn_hash, handle_id).await;
    }
    Ok(())
}

pub async fn xa_recover<H: Send + 'static>(node: &ProxyNode<H>, conn_hash: &str) -> Vec<Xid> {
    node.xa_registry_for(conn_hash).await.recover().await
}

pub async fn xa_forget<H: Send + 'static>(node: &ProxyNode<H>, conn_hash: &str, xid: &Xid) -> Result<(), OjpError> {
    node.xa_registry_for(conn_hash).await.forget(xid).await
}

pub async fn xa_set_transaction_timeout<H: Send + 'static>(node: &ProxyNode<H>, conn_hash: &str, xid: &Xid, seconds: u32) {
    node.xa_registry_for(conn_hash).await.set_transaction_timeout(xid, seconds).await;
}

pub async fn xa_get_transaction_timeout<H: Send + 'static>(node: &ProxyNode<H>, conn_hash: &str, xid: &Xid) -> u32 {
    let default_seconds = ((node.config.xa_start_timeout_ms / 1000) as u32).max(1);
    node.xa_registry_for(conn_hash).await.get_transaction_timeout(xid, default_seconds).await
}

/// `xaIsSameRM` (§6): two branches share a resource manager iff they were
/// opened against the same connHash — the registry (I) is keyed one per
/// connHash, so this needs no state lookup at all.
pub fn xa_is_same_rm(conn_hash_a: &str, conn_hash_b: &str) -> bool {
    conn_hash_a == conn_hash_b
}

async fn release_xa_handle<H: Send + 'static>(node: &ProxyNode<H>, conn_hash: &str, handle_id: u64) {
    if let Some(pooled) = node.take_xa_session(handle_id).await {
        let pool = node.xa_pool_for(conn_hash).await;
        pool.return_session(pooled, false).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ojp_proto::config::OjpConfig;
    use ojp_proto::value::{ColumnMetadata, Row};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct CountingHandle(Arc<AtomicU64>);

    #[async_trait::async_trait]
    impl UpstreamDriver for CountingHandle {
        async fn execute_update(&self, _sql: &str, _params: &[Value]) -> Result<i64, OjpError> {
            Ok(self.0.fetch_add(1, Ordering::SeqCst) as i64)
        }

        async fn execute_query(&self, _sql: &str, _params: &[Value]) -> Result<(Vec<ColumnMetadata>, Vec<Row>), OjpError> {
            Ok((Vec::new(), Vec::new()))
        }
    }

    async fn make_handle() -> Result<CountingHandle, OjpError> {
        Ok(CountingHandle(Arc::new(AtomicU64::new(1))))
    }

    #[tokio::test]
    async fn connect_execute_terminate_round_trip() {
        let node = ProxyNode::<CountingHandle>::new(OjpConfig::default()).unwrap();
        let session = connect(&node, "hash1", false, || make_handle()).await.unwrap();
        assert!(!session.is_xa);

        let result = execute_update(&node, &session.session_id, "UPDATE t SET x = 1", &[]).await.unwrap();
        assert!(matches!(result.kind, OpResultKind::UpdateCount(_)));

        let status = terminate_session(&node, &session.session_id).await.unwrap();
        assert!(!status.already_terminated);

        // Terminating twice is a no-op, per invariant 7.
        let second = terminate_session(&node, &session.session_id).await.unwrap();
        assert!(second.already_terminated);
    }

    #[tokio::test]
    async fn execute_update_against_an_unknown_session_fails() {
        let node = ProxyNode::<CountingHandle>::new(OjpConfig::default()).unwrap();
        let result = execute_update(&node, "unknown", "SELECT 1", &[]).await;
        assert!(matches!(result, Err(OjpError::SessionInvalidated { .. })));
    }

    #[tokio::test]
    async fn terminate_returns_the_connection_to_the_pool() {
        let node = ProxyNode::<CountingHandle>::new(OjpConfig::default()).unwrap();
        let session = connect(&node, "hash1", false, || make_handle()).await.unwrap();
        let pool = node.pool_lookup("hash1").await.unwrap();
        assert_eq!(pool.total(), 1);

        terminate_session(&node, &session.session_id).await.unwrap();

        // The connection is back in the pool, not just dropped: a second
        // connect reuses it instead of growing `total`.
        let second = connect(&node, "hash1", false, || make_handle()).await.unwrap();
        assert_eq!(pool.total(), 1);
        terminate_session(&node, &second.session_id).await.unwrap();
    }

    fn xid(n: u8) -> Xid {
        Xid {
            format_id: 1,
            global_tx_id: vec![n],
            branch_qualifier: vec![0],
        }
    }

    async fn make_xa_handle(id: u64) -> Result<XaSessionHandle, OjpError> {
        Ok(XaSessionHandle {
            underlying_xa_session: id,
            underlying_connection: id,
        })
    }

    #[tokio::test]
    async fn xa_full_lifecycle_releases_the_backend_session_on_commit() {
        let node = ProxyNode::<CountingHandle>::new(OjpConfig::default()).unwrap();
        let x = xid(1);
        let xa_session = connect(&node, "hash1", true, || make_handle()).await.unwrap();

        xa_start(&node, "hash1", &xa_session.session_id, x.clone(), XaStartFlag::NoFlags, || make_xa_handle(42))
            .await
            .unwrap();

        let xa_pool = node.xa_pool_for("hash1").await;
        assert_eq!(xa_pool.total(), 1);

        xa_end(&node, "hash1", &x, XaEndFlag::Success).await.unwrap();
        xa_prepare(&node, "hash1", &x).await.unwrap();
        xa_commit(&node, "hash1", &x, false).await.unwrap();

        // Released back to H: a fresh borrow reuses rather than growing.
        let reused = xa_pool.borrow(|| make_xa_handle(99)).await.unwrap();
        assert_eq!(reused.handle.underlying_xa_session, 42);
        xa_pool.return_session(reused, false).await;

        terminate_session(&node, &xa_session.session_id).await.unwrap();
    }

    #[tokio::test]
    async fn xa_release_deferred_until_client_disconnects() {
        let node = ProxyNode::<CountingHandle>::new(OjpConfig::default()).unwrap();
        let x = xid(2);
        let xa_session = connect(&node, "hash1", true, || make_handle()).await.unwrap();

        xa_start(&node, "hash1", &xa_session.session_id, x.clone(), XaStartFlag::NoFlags, || make_xa_handle(7))
            .await
            .unwrap();
        xa_end(&node, "hash1", &x, XaEndFlag::Success).await.unwrap();
        xa_prepare(&node, "hash1", &x).await.unwrap();
        xa_commit(&node, "hash1", &x, false).await.unwrap();

        // Transaction is complete but the client hasn't disconnected: the
        // handle is still checked out, not back in the pool's free list.
        let xa_pool = node.xa_pool_for("hash1").await;
        assert_eq!(xa_pool.total(), 1);

        // Disconnecting completes the dual condition and releases it.
        terminate_session(&node, &xa_session.session_id).await.unwrap();
        let reused = xa_pool.borrow(|| make_xa_handle(100)).await.unwrap();
        assert_eq!(reused.handle.underlying_xa_session, 7);
        xa_pool.return_session(reused, false).await;
    }

    #[tokio::test]
    async fn xa_recover_lists_prepared_transactions() {
        let node = ProxyNode::<CountingHandle>::new(OjpConfig::default()).unwrap();
        let x = xid(3);
        let session = connect(&node, "hash1", true, || make_handle()).await.unwrap();
        xa_start(&node, "hash1", &session.session_id, x.clone(), XaStartFlag::NoFlags, || make_xa_handle(5))
            .await
            .unwrap();
        xa_end(&node, "hash1", &x, XaEndFlag::Success).await.unwrap();
        xa_prepare(&node, "hash1", &x).await.unwrap();

        let prepared = xa_recover(&node, "hash1").await;
        assert_eq!(prepared, vec![x]);
    }

    #[test]
    fn is_same_rm_compares_conn_hash_identity() {
        assert!(xa_is_same_rm("abc", "abc"));
        assert!(!xa_is_same_rm("abc", "def"));
    }

    #[tokio::test]
    async fn call_resource_rejects_a_mismatched_resource_kind() {
        let node = ProxyNode::<CountingHandle>::new(OjpConfig::default()).unwrap();
        let session = connect(&node, "hash1", false, || make_handle()).await.unwrap();
        let id = node.sessions.register_resource(&session.session_id, ResourceKind::Statement).await.unwrap();

        let request = CallResourceRequest {
            resource_kind: ResourceKind::ResultSet,
            resource_id: id,
            call_name: "next".to_string(),
            params: Vec::new(),
            next_call: None,
        };
        let result = call_resource(&node, &session.session_id, &request, &|_, _, _| Ok(CallResourceResponse::Void)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn call_resource_registers_a_minted_new_resource() {
        let node = ProxyNode::<CountingHandle>::new(OjpConfig::default()).unwrap();
        let session = connect(&node, "hash1", false, || make_handle()).await.unwrap();
        let id = node.sessions.register_resource(&session.session_id, ResourceKind::Statement).await.unwrap();

        let request = CallResourceRequest {
            resource_kind: ResourceKind::Statement,
            resource_id: id,
            call_name: "executeQuery".to_string(),
            params: Vec::new(),
            next_call: None,
        };
        let response = call_resource(&node, &session.session_id, &request, &|_, _, _| {
            Ok(CallResourceResponse::NewResource {
                kind: ResourceKind::ResultSet,
                id: 99,
            })
        })
        .await
        .unwrap();
        assert!(matches!(response, CallResourceResponse::NewResource { .. }));

        // Registered under the session: the server can now resolve it
        // without another round trip.
        let kind = node.sessions.resource_kind(&session.session_id, 2).await.unwrap();
        assert_eq!(kind, ResourceKind::ResultSet);
    }

    #[tokio::test]
    async fn lob_upload_then_read_round_trips() {
        let node = ProxyNode::<CountingHandle>::new(OjpConfig::default()).unwrap();
        let session = connect(&node, "hash1", false, || make_handle()).await.unwrap();

        let reference = upload_lob_block(
            &node,
            &session.session_id,
            LobDataBlock {
                lob_id: None,
                position: 0,
                bytes: b"hello".to_vec(),
                lob_type: ojp_proto::envelope::LobType::Binary,
                metadata: None,
            },
        )
        .await
        .unwrap();

        let blocks = read_lob(&node, &session.session_id, reference.lob_id, 0, 5).await.unwrap();
        let joined: Vec<u8> = blocks.into_iter().flat_map(|b| b.bytes).collect();
        assert_eq!(joined, b"hello");

        let kind = node.sessions.resource_kind(&session.session_id, 1).await.unwrap();
        assert_eq!(kind, ResourceKind::Lob);
    }

    #[tokio::test]
    async fn fetch_next_rows_rejects_a_non_result_set_resource() {
        let node = ProxyNode::<CountingHandle>::new(OjpConfig::default()).unwrap();
        let session = connect(&node, "hash1", false, || make_handle()).await.unwrap();
        let id = node.sessions.register_resource(&session.session_id, ResourceKind::Statement).await.unwrap();

        let (tx, _rx) = mpsc::channel(4);
        let request = FetchRequest {
            envelope: test_envelope(),
            result_set_id: id,
            rows_per_block: 100,
        };
        let result = fetch_next_rows(&node, &session.session_id, &request, &tx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fetch_next_rows_ends_the_cursor_for_a_valid_result_set() {
        let node = ProxyNode::<CountingHandle>::new(OjpConfig::default()).unwrap();
        let session = connect(&node, "hash1", false, || make_handle()).await.unwrap();
        let id = node.sessions.register_resource(&session.session_id, ResourceKind::ResultSet).await.unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let request = FetchRequest {
            envelope: test_envelope(),
            result_set_id: id,
            rows_per_block: 100,
        };
        fetch_next_rows(&node, &session.session_id, &request, &tx).await.unwrap();
        drop(tx);
        let received = rx.recv().await.unwrap().unwrap();
        assert!(matches!(received.kind, OpResultKind::EndOfCursor));
    }

    fn test_envelope() -> ojp_proto::envelope::RequestEnvelope {
        ojp_proto::envelope::RequestEnvelope {
            session_uuid: None,
            conn_hash: ojp_proto::conn_hash::ConnHash::compute("u", "a", "b", &[]),
            client_uuid: "client".to_string(),
            transaction_info: None,
            is_xa: false,
            target_server: String::new(),
            cluster_health: ojp_proto::health::ClusterHealthView::default(),
        }
    }
}
