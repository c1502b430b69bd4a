//! Resource model: the polymorphic handles a session owns (§3, §4.N).

use serde::{Deserialize, Serialize};

/// Opaque id, unique within the owning session, assigned by a monotonic
/// per-session counter.
pub type ResourceId = u64;

/// Tagged variant for every kind of server-side resource a session may own.
/// Replaces the deep inheritance hierarchy of a JDBC-style driver surface
/// with a flat enum plus a capability set, per the design notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Statement,
    PreparedStatement,
    CallableStatement,
    ResultSet,
    Lob,
    Savepoint,
    TransactionContext,
    XaBackendSessionRef,
}

/// What operations a resource kind supports; used by the reflection facade
/// (component N) to validate a `callResource` invocation before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub exec: bool,
    pub query: bool,
    pub stream: bool,
    pub lob: bool,
}

impl ResourceKind {
    pub fn capabilities(self) -> Capabilities {
        match self {
            ResourceKind::Statement | ResourceKind::CallableStatement => Capabilities {
                exec: true,
                query: true,
                ..Default::default()
            },
            ResourceKind::PreparedStatement => Capabilities {
                exec: true,
                query: true,
                ..Default::default()
            },
            ResourceKind::ResultSet => Capabilities {
                stream: true,
                ..Default::default()
            },
            ResourceKind::Lob => Capabilities {
                lob: true,
                stream: true,
                ..Default::default()
            },
            ResourceKind::Savepoint | ResourceKind::TransactionContext => Capabilities::default(),
            ResourceKind::XaBackendSessionRef => Capabilities::default(),
        }
    }
}

/// `{resourceKind, resourceId, callName, params, nextCall?}` — the generic
/// reflection facade request shape (§4.N). Up to one chained follow-up call
/// is supported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallResourceRequest {
    pub resource_kind: ResourceKind,
    pub resource_id: ResourceId,
    pub call_name: String,
    pub params: Vec<crate::value::Value>,
    pub next_call: Option<Box<CallResourceRequest>>,
}

/// Result of a `callResource` invocation. If the call produced a new
/// resource (a result set, array, savepoint, ...), it has already been
/// registered in the session and its id/kind are returned here in place of
/// a plain value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CallResourceResponse {
    Value(crate::value::Value),
    NewResource {
        kind: ResourceKind,
        id: ResourceId,
    },
    Void,
}
