//! Shared wire protocol, error taxonomy, and configuration for Open J Proxy.
//!
//! Both `ojp-client` (the multinode dispatcher) and `ojp-server` (the proxy
//! node) depend on this crate so that the two sides of the wire agree on
//! framing, error shapes, and config without either one owning the other.

pub mod config;
pub mod conn_hash;
pub mod envelope;
pub mod error;
pub mod health;
pub mod resource;
pub mod timeout;
pub mod value;
pub mod wire;
pub mod xid;

pub use config::OjpConfig;
pub use conn_hash::ConnHash;
pub use envelope::{
    ConnectionDetails, FetchRequest, LobDataBlock, LobReference, LobType, OpResult, OpResultKind,
    ReadLobRequest, Request, RequestEnvelope, SessionInfo, SessionTerminationStatus,
    TransactionInfo, XaRequest, XaResponse,
};
pub use error::OjpError;
pub use health::{ClusterHealthView, EndpointHealth, EndpointStatus};
pub use resource::{CallResourceRequest, CallResourceResponse, ResourceId, ResourceKind};
pub use value::{ColumnMetadata, Row, Timestamp, Value};
pub use wire::{Message, MessageCodec, MessageType};
pub use xid::{Xid, XaEndFlag, XaStartFlag, XaState};

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, OjpError>;
