//! XA transaction registry (component I): binds a Xid to an XA backend
//! session and drives the two-phase-commit state machine (§4.I).
//!
//! Grounded on the XA vocabulary (started/ended/prepared, one-phase vs.
//! two-phase commit) from the pack's MySQL XA type-state reference
//! implementation, converted here from compile-time type states to a
//! runtime `XaState` enum since the backend pool is shared/generic rather
//! than duplicated per state.

use ojp_proto::xid::{Xid, XaEndFlag, XaStartFlag, XaState};
use ojp_proto::OjpError;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// §3's `XABackendSession`: an XA-capable handle bound to at most one live
/// Xid at a time.
pub struct XaBinding {
    pub underlying_xa_session: u64,
    pub bound_xid: Xid,
    pub state: XaState,
    pub transaction_complete: bool,
    pub client_connection_closed: bool,
}

impl XaBinding {
    /// Only releasable when both halves of the dual condition hold
    /// (invariant 4).
    pub fn is_releasable(&self) -> bool {
        self.transaction_complete && self.client_connection_closed
    }
}

/// Removes and returns the bound handle iff both halves of the dual
/// condition now hold (invariant 4). Shared by `commit`/`rollback` (the
/// transaction-completes-last case) and `close_client_connection` (the
/// client-disconnects-last case), so release fires regardless of which
/// half lands second.
fn release_if_ready(bindings: &mut HashMap<Xid, XaBinding>, xid: &Xid) -> Option<u64> {
    let releasable = bindings.get(xid).map(XaBinding::is_releasable).unwrap_or(false);
    if releasable {
        bindings.remove(xid).map(|b| b.underlying_xa_session)
    } else {
        None
    }
}

fn violation(xid: &Xid, attempted: &str, from_state: XaState) -> OjpError {
    OjpError::XaProtocolViolation {
        xid: xid.to_string(),
        attempted: attempted.to_string(),
        from_state: format!("{from_state:?}"),
    }
}

/// Component I. One instance per connHash (a `ClusterRegistry` in §3's
/// terms); the map itself is the `XidBinding` table.
pub struct XaTransactionRegistry {
    bindings: Mutex<HashMap<Xid, XaBinding>>,
    /// `xaSetTransactionTimeout`/`xaGetTransactionTimeout` per Xid; kept
    /// here rather than on `XaBinding` since a timeout may be set before
    /// `start` creates the binding.
    timeouts: Mutex<HashMap<Xid, u32>>,
}

impl XaTransactionRegistry {
    pub fn new() -> Self {
        Self {
            bindings: Mutex::new(HashMap::new()),
            timeouts: Mutex::new(HashMap::new()),
        }
    }

    pub async fn set_transaction_timeout(&self, xid: &Xid, seconds: u32) {
        self.timeouts.lock().await.insert(xid.clone(), seconds);
    }

    /// Returns the timeout set for `xid`, or `default_seconds` if none was
    /// ever set (§6's `xaGetTransactionTimeout`).
    pub async fn get_transaction_timeout(&self, xid: &Xid, default_seconds: u32) -> u32 {
        self.timeouts.lock().await.get(xid).copied().unwrap_or(default_seconds)
    }

    /// `start(NOFLAGS)` creates a new binding; `start(JOIN)`/`start(RESUME)`
    /// attach to an existing one in the state the flag requires.
    pub async fn start(&self, xid: Xid, flag: XaStartFlag, underlying_xa_session: u64) -> Result<(), OjpError> {
        let mut bindings = self.bindings.lock().await;
        match flag {
            XaStartFlag::NoFlags => {
                if bindings.contains_key(&xid) {
                    return Err(violation(&xid, "start(NOFLAGS)", XaState::Started));
                }
                bindings.insert(
                    xid.clone(),
                    XaBinding {
                        underlying_xa_session,
                        bound_xid: xid,
                        state: XaState::Started,
                        transaction_complete: false,
                        client_connection_closed: false,
                    },
                );
                Ok(())
            }
            XaStartFlag::Join => {
                let binding = bindings.get(&xid).ok_or_else(|| violation(&xid, "start(JOIN)", XaState::Idle))?;
                if binding.state != XaState::Started {
                    return Err(violation(&xid, "start(JOIN)", binding.state));
                }
                Ok(())
            }
            XaStartFlag::Resume => {
                let binding = bindings.get(&xid).ok_or_else(|| violation(&xid, "start(RESUME)", XaState::Idle))?;
                if binding.state != XaState::Ended {
                    return Err(violation(&xid, "start(RESUME)", binding.state));
                }
                Ok(())
            }
        }
    }

    pub async fn end(&self, xid: &Xid, flag: XaEndFlag) -> Result<(), OjpError> {
        let mut bindings = self.bindings.lock().await;
        let binding = bindings
            .get_mut(xid)
            .ok_or_else(|| violation(xid, "end", XaState::Idle))?;
        if binding.state != XaState::Started {
            return Err(violation(xid, "end", binding.state));
        }
        binding.state = XaState::Ended;
        if flag == XaEndFlag::Fail {
            // Caller is expected to immediately rollback; mark complete so
            // the dual condition can be satisfied once the client
            // disconnects, without requiring a prepare that will never
            // happen.
            binding.transaction_complete = false;
        }
        Ok(())
    }

    pub async fn prepare(&self, xid: &Xid) -> Result<(), OjpError> {
        let mut bindings = self.bindings.lock().await;
        let binding = bindings
            .get_mut(xid)
            .ok_or_else(|| violation(xid, "prepare", XaState::Idle))?;
        if binding.state != XaState::Ended {
            return Err(violation(xid, "prepare", binding.state));
        }
        binding.state = XaState::Prepared;
        Ok(())
    }

    /// Commits the transaction. Returns the underlying XA session handle if
    /// the client connection was already closed when the transaction
    /// completed — the dual condition (invariant 4) can be satisfied in
    /// either order, and this is the commit-completes-last half of it.
    pub async fn commit(&self, xid: &Xid, one_phase: bool) -> Result<Option<u64>, OjpError> {
        let mut bindings = self.bindings.lock().await;
        let binding = bindings
            .get_mut(xid)
            .ok_or_else(|| violation(xid, "commit", XaState::Idle))?;
        let valid = if one_phase {
            binding.state == XaState::Ended
        } else {
            binding.state == XaState::Prepared
        };
        if !valid {
            return Err(violation(xid, "commit", binding.state));
        }
        binding.state = XaState::Completed;
        binding.transaction_complete = true;
        Ok(release_if_ready(&mut bindings, xid))
    }

    /// Rolls back the transaction; same dual-condition release as `commit`.
    pub async fn rollback(&self, xid: &Xid) -> Result<Option<u64>, OjpError> {
        let mut bindings = self.bindings.lock().await;
        let binding = bindings
            .get_mut(xid)
            .ok_or_else(|| violation(xid, "rollback", XaState::Idle))?;
        if !matches!(binding.state, XaState::Started | XaState::Ended | XaState::Prepared) {
            return Err(violation(xid, "rollback", binding.state));
        }
        binding.state = XaState::Completed;
        binding.transaction_complete = true;
        Ok(release_if_ready(&mut bindings, xid))
    }

    /// Aggregates Xids currently in PREPARED, per §4.I's `recover`.
    pub async fn recover(&self) -> Vec<Xid> {
        self.bindings
            .lock()
            .await
            .values()
            .filter(|b| b.state == XaState::Prepared)
            .map(|b| b.bound_xid.clone())
            .collect()
    }

    /// Removes a binding in a terminal heuristic state.
    pub async fn forget(&self, xid: &Xid) -> Result<(), OjpError> {
        let mut bindings = self.bindings.lock().await;
        match bindings.get(xid) {
            Some(binding) if binding.state == XaState::Completed => {
                bindings.remove(xid);
                Ok(())
            }
            Some(binding) => Err(violation(xid, "forget", binding.state)),
            None => Ok(()),
        }
    }

    /// Marks the client connection closed and returns the handle to the
    /// backend pool iff the dual condition (invariant 4) is now satisfied.
    pub async fn close_client_connection(&self, xid: &Xid) -> Result<Option<u64>, OjpError> {
        let mut bindings = self.bindings.lock().await;
        let binding = bindings
            .get_mut(xid)
            .ok_or_else(|| violation(xid, "closeClientConnection", XaState::Idle))?;
        binding.client_connection_closed = true;
        Ok(release_if_ready(&mut bindings, xid))
    }
}

impl Default for XaTransactionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
