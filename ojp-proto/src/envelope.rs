//! Request/response envelope and wire-surface payload shapes (§6).

use crate::conn_hash::ConnHash;
use crate::health::ClusterHealthView;
use crate::value::{ColumnMetadata, Row};
use crate::xid::{Xid, XaEndFlag, XaStartFlag};
use serde::{Deserialize, Serialize};

/// Every request carries this envelope regardless of operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub session_uuid: Option<String>,
    pub conn_hash: ConnHash,
    pub client_uuid: String,
    pub transaction_info: Option<TransactionInfo>,
    pub is_xa: bool,
    /// Echoed unchanged by the server in the response.
    pub target_server: String,
    pub cluster_health: ClusterHealthView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub transaction_id: String,
    pub xid: Option<Xid>,
}

/// `connect(ConnectionDetails) -> SessionInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDetails {
    pub raw_url: String,
    pub username: String,
    pub password: String,
    pub properties: Vec<(String, String)>,
    pub is_xa: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub is_xa: bool,
    pub server_endpoints: Vec<String>,
    pub properties: Vec<(String, String)>,
}

/// Generic request body for `executeUpdate`/`executeQuery`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub envelope: RequestEnvelope,
    pub statement_id: Option<u64>,
    pub sql: String,
    pub params: Vec<crate::value::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OpResultKind {
    UpdateCount(i64),
    GeneratedKey(String),
    ColumnHeader(Vec<ColumnMetadata>),
    RowChunk(Vec<Row>),
    EndOfCursor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpResult {
    pub session_id: String,
    pub kind: OpResultKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub envelope: RequestEnvelope,
    pub result_set_id: u64,
    pub rows_per_block: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LobType {
    Binary,
    Character,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobDataBlock {
    pub lob_id: Option<u64>,
    pub position: u64,
    pub bytes: Vec<u8>,
    pub lob_type: LobType,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobReference {
    pub lob_id: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadLobRequest {
    pub envelope: RequestEnvelope,
    pub lob_id: u64,
    pub position: u64,
    pub length: u64,
}

/// Wraps a bare `LobDataBlock` with the envelope the wire surface needs but
/// `LobDataBlock` itself doesn't carry (it's also the block shape returned
/// by `readLob`, which has no session to attribute).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobUploadRequest {
    pub envelope: RequestEnvelope,
    pub block: LobDataBlock,
}

/// Wraps a `CallResourceRequest` with the envelope it needs to resolve a
/// session, for the same reason as `LobUploadRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResourceEnvelope {
    pub envelope: RequestEnvelope,
    pub request: crate::resource::CallResourceRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XaRequest {
    pub envelope: RequestEnvelope,
    pub xid: Xid,
    pub start_flag: Option<XaStartFlag>,
    pub end_flag: Option<XaEndFlag>,
    pub one_phase: bool,
    pub timeout_seconds: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum XaResponse {
    Ok,
    Prepared,
    ReadOnly,
    Recovered(Vec<Xid>),
    Timeout(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTerminationStatus {
    pub session_id: String,
    /// False if the session was already terminated (idempotent no-op, see
    /// invariant 7).
    pub already_terminated: bool,
}
