//! Error taxonomy for Open J Proxy
//!
//! Every failure the dispatcher or the proxy can surface is one of the nine
//! kinds below. Classification is explicit: `is_connection_level()` and
//! `is_session_invalidation()` drive retry and endpoint-health decisions in
//! the dispatcher; nothing elsewhere in the client pattern-matches on error
//! text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The complete error taxonomy for OJP, §7 of the design.
///
/// Carries `Serialize`/`Deserialize` because §6's wire surface transports
/// failures as structured metadata on the response stream, not just as a
/// local Rust error.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum OjpError {
    /// Peer unreachable, transport-level timeout, or the transport itself
    /// reports "unavailable". Marks the endpoint unhealthy; retried on an
    /// alternate endpoint unless the call is session-bound.
    #[error("transport unavailable: {endpoint}: {details}")]
    TransportUnavailable {
        /// `host:port` of the endpoint that failed
        endpoint: String,
        /// Underlying cause
        details: String,
    },

    /// The endpoint a session is pinned to has been marked unhealthy. Fails
    /// fast; the caller must reconnect. Never triggers a silent failover.
    #[error("session {session_id} is bound to unhealthy endpoint {endpoint}")]
    SessionServerUnavailable {
        /// The session affected
        session_id: String,
        /// The endpoint the session was bound to
        endpoint: String,
    },

    /// The server-side session is missing or expired.
    #[error("session {session_id} is invalid or has expired")]
    SessionInvalidated {
        /// The session id the caller presented
        session_id: String,
    },

    /// An error the upstream database itself raised: syntax, constraint,
    /// data-type. Never affects endpoint health.
    #[error("database error [{sql_state}]: {message}")]
    Database {
        /// Vendor/ANSI SQLSTATE, empty string if unavailable
        sql_state: String,
        /// Vendor-specific error code, 0 if unavailable
        vendor_code: i64,
        /// Human-readable message
        message: String,
    },

    /// The circuit breaker for this statement fingerprint is open.
    #[error("circuit open for statement {fingerprint:#x}, cooling down")]
    CircuitOpen {
        /// Statement fingerprint (crc32 of canonicalized SQL)
        fingerprint: u32,
    },

    /// The RPC's deadline elapsed before completion.
    #[error("deadline exceeded after {elapsed_ms}ms (budget {budget_ms}ms) for {operation}")]
    Deadline {
        /// Operation name for diagnostics
        operation: String,
        /// Configured deadline budget
        budget_ms: u64,
        /// Actual elapsed time when the deadline fired
        elapsed_ms: u64,
    },

    /// No pool slot became available within the configured timeout.
    #[error("pool exhausted for {conn_hash}: {in_use}/{configured_max} in use")]
    PoolExhausted {
        /// Stable fingerprint of the logical datasource
        conn_hash: String,
        /// Sessions currently borrowed
        in_use: u32,
        /// Configured pool ceiling at the time of the failure
        configured_max: u32,
    },

    /// An XA state transition was attempted out of order.
    #[error("illegal XA transition for xid {xid}: {attempted} from state {from_state}")]
    XaProtocolViolation {
        /// String form of the Xid
        xid: String,
        /// The transition that was attempted
        attempted: String,
        /// The state the binding was in
        from_state: String,
    },

    /// Bad URL, unknown property, or an unresolved `${name}` placeholder.
    /// Fatal at startup; rejects the offending call otherwise.
    #[error("configuration error: {details}")]
    Configuration {
        /// Description of what failed validation
        details: String,
    },

    /// Failed to encode or decode a wire message.
    #[error("serialization error: {message}")]
    Serialization {
        /// Details of the (de)serialization failure
        message: String,
    },

    /// The wire frame's CRC32 checksum did not match its payload.
    #[error("checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Checksum computed from the received payload
        expected: u32,
        /// Checksum carried in the frame
        actual: u32,
    },

    /// The decoded frame exceeds the configured maximum message size.
    #[error("message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        /// Actual encoded size
        size: usize,
        /// Configured ceiling
        max_size: usize,
    },

    /// Catch-all for invariant violations that should never be reachable
    /// in correct operation; kept distinct from `Configuration` since it is
    /// a programming-error signal, not a user input one.
    #[error("internal error in {component}: {details}")]
    Internal {
        /// The component that detected the inconsistency
        component: String,
        /// Details about the inconsistency
        details: String,
    },
}

impl OjpError {
    /// True for errors that warrant marking the endpoint unhealthy and,
    /// for non-sticky calls, retrying on an alternate endpoint.
    ///
    /// Mirrors §7: `TransportUnavailable` and `SessionInvalidated` are both
    /// connection-class for accounting purposes, even though the latter is
    /// surfaced to the caller as a distinct kind.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            OjpError::TransportUnavailable { .. } | OjpError::SessionInvalidated { .. }
        )
    }

    /// True specifically for session-invalidation, which is connection-class
    /// for health accounting but must never be retried silently.
    pub fn is_session_invalidation(&self) -> bool {
        matches!(self, OjpError::SessionInvalidated { .. })
    }

    /// True for errors that are safe to retry on another endpoint, i.e.
    /// connection-class errors that are not session-invalidation and did
    /// not originate from a sticky/transactional call (callers must still
    /// apply the sticky-call exclusion themselves; this only reflects the
    /// error's own nature).
    pub fn is_retryable(&self) -> bool {
        matches!(self, OjpError::TransportUnavailable { .. })
    }
}
