//! Resource-call reflection facade (component N): the generic "invoke
//! operation X on resource Y by id" surface that absorbs the long tail of
//! upstream-driver API surface area (§4.N).
//!
//! Replaces the deep per-resource-type method sprawl a JDBC-style driver
//! would need with a flat `ResourceKind` enum plus a table-driven dispatch
//! keyed by `(ResourceKind, callName)`, per §9's design note. Up to one
//! chained follow-up call (`nextCall`) is supported, e.g.
//! `getMetadata().isAutoIncrement(i)`.

use ojp_proto::resource::{CallResourceRequest, CallResourceResponse, ResourceKind};
use ojp_proto::value::Value;
use ojp_proto::OjpError;

/// One registered handler: given a resource's kind, its call name, and
/// bound parameters, produces a result. Handlers that mint a new resource
/// return `CallResourceResponse::NewResource` with a kind the caller must
/// register in the owning session (F) before replying.
pub type ResourceCallHandler = fn(ResourceKind, &str, &[Value]) -> Result<CallResourceResponse, OjpError>;

/// Component N. Table-driven dispatch; the table itself is just "does this
/// `(kind, call_name)` pair pass the resource kind's capability set",
/// since the actual upstream invocation is delegated to the driver
/// adapter behind `invoke` (an external collaborator per §1's scope).
pub struct ResourceTable;

impl ResourceTable {
    /// Validates and dispatches a `callResource` request, following at
    /// most one `nextCall` chain per §4.N.
    pub fn dispatch(
        &self,
        request: &CallResourceRequest,
        invoke: &dyn Fn(ResourceKind, &str, &[Value]) -> Result<CallResourceResponse, OjpError>,
    ) -> Result<CallResourceResponse, OjpError> {
        self.validate(request.resource_kind, &request.call_name)?;
        let first = invoke(request.resource_kind, &request.call_name, &request.params)?;

        match (&first, &request.next_call) {
            (CallResourceResponse::NewResource { kind, .. }, Some(next)) => {
                self.validate(*kind, &next.call_name)?;
                invoke(*kind, &next.call_name, &next.params)
            }
            (_, Some(_)) => Err(OjpError::Internal {
                component: "ResourceTable".to_string(),
                details: "nextCall chained onto a response that produced no new resource".to_string(),
            }),
            (_, None) => Ok(first),
        }
    }

    /// A call is valid for a resource kind if the kind's capability set
    /// covers what the call name implies. This is a coarse, name-based
    /// check; fine-grained validity (does `callName` actually exist on the
    /// upstream driver) is the external driver adapter's job.
    fn validate(&self, kind: ResourceKind, call_name: &str) -> Result<(), OjpError> {
        let caps = kind.capabilities();
        let requires_stream = call_name.starts_with("next") || call_name.starts_with("fetch");
        let requires_lob = call_name.starts_with("getBinary") || call_name.starts_with("getCharacter");

        if requires_stream && !caps.stream {
            return Err(OjpError::Internal {
                component: "ResourceTable".to_string(),
                details: format!("{kind:?} does not support streaming call '{call_name}'"),
            });
        }
        if requires_lob && !caps.lob {
            return Err(OjpError::Internal {
                component: "ResourceTable".to_string(),
                details: format!("{kind:?} does not support LOB call '{call_name}'"),
            });
        }
        Ok(())
    }
}

impl Default for ResourceTable {
    fn default() -> Self {
        Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: ResourceKind, call_name: &str) -> CallResourceRequest {
        CallResourceRequest {
            resource_kind: kind,
            resource_id: 1,
            call_name: call_name.to_string(),
            params: Vec::new(),
            next_call: None,
        }
    }

    #[test]
    fn dispatches_a_plain_call() {
        let table = ResourceTable;
        let req = request(ResourceKind::Statement, "getMaxRows");
        let result = table.dispatch(&req, &|_, _, _| Ok(CallResourceResponse::Value(Value::Int(100))));
        assert!(matches!(result, Ok(CallResourceResponse::Value(Value::Int(100)))));
    }

    #[test]
    fn chains_a_follow_up_call_onto_a_new_resource() {
        let table = ResourceTable;
        let mut req = request(ResourceKind::Statement, "getMetadata");
        req.next_call = Some(Box::new(request(ResourceKind::ResultSet, "isAutoIncrement")));

        let result = table.dispatch(&req, &|kind, call_name, _| {
            if call_name == "getMetadata" {
                Ok(CallResourceResponse::NewResource {
                    kind: ResourceKind::ResultSet,
                    id: 7,
                })
            } else {
                assert_eq!(kind, ResourceKind::ResultSet);
                Ok(CallResourceResponse::Value(Value::Bool(true)))
            }
        });
        assert!(matches!(result, Ok(CallResourceResponse::Value(Value::Bool(true)))));
    }

    #[test]
    fn rejects_stream_call_on_a_non_streaming_resource() {
        let table = ResourceTable;
        let req = request(ResourceKind::Savepoint, "fetchRows");
        let result = table.dispatch(&req, &|_, _, _| Ok(CallResourceResponse::Void));
        assert!(result.is_err());
    }

    #[test]
    fn chaining_onto_a_plain_value_is_an_error() {
        let table = ResourceTable;
        let mut req = request(ResourceKind::Statement, "getMaxRows");
        req.next_call = Some(Box::new(request(ResourceKind::ResultSet, "next")));
        let result = table.dispatch(&req, &|_, _, _| Ok(CallResourceResponse::Value(Value::Int(1))));
        assert!(result.is_err());
    }
}
