//! Cluster-health view: serialize/parse the client's per-endpoint health
//! belief, piggybacked on every request (component E).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Health status of a single endpoint as believed by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointStatus {
    Up,
    Down,
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointStatus::Up => write!(f, "UP"),
            EndpointStatus::Down => write!(f, "DOWN"),
        }
    }
}

/// One `{endpoint, status}` pair as carried in a [`ClusterHealthView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointHealth {
    pub host: String,
    pub port: u16,
    pub status: EndpointStatus,
}

/// Ordered list of endpoint health beliefs, piggybacked on every wire
/// request so the chosen proxy can drive the topology change handler (P).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHealthView {
    pub endpoints: Vec<EndpointHealth>,
}

impl ClusterHealthView {
    /// Serializes as `"h:p(UP);h:p(DOWN);..."`. An empty view encodes to
    /// the empty string, meaning "unknown/absent" on the wire.
    pub fn encode(&self) -> String {
        self.endpoints
            .iter()
            .map(|e| format!("{}:{}({})", e.host, e.port, e.status))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Parses the wire form. Malformed segments are skipped with a warning;
    /// unknown status tokens are treated as malformed, not as a third
    /// status, since the wire form only names UP/DOWN.
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            return Self::default();
        }

        let mut endpoints = Vec::new();
        for segment in raw.split(';') {
            if segment.is_empty() {
                continue;
            }
            match parse_segment(segment) {
                Some(eh) => endpoints.push(eh),
                None => tracing::warn!(segment, "skipping malformed cluster-health segment"),
            }
        }
        Self { endpoints }
    }
}

fn parse_segment(segment: &str) -> Option<EndpointHealth> {
    let open = segment.find('(')?;
    let close = segment.rfind(')')?;
    if close < open {
        return None;
    }
    let host_port = &segment[..open];
    let status_str = &segment[open + 1..close];

    let (host, port_str) = host_port.rsplit_once(':')?;
    let port: u16 = port_str.parse().ok()?;
    let status = match status_str {
        "UP" => EndpointStatus::Up,
        "DOWN" => EndpointStatus::Down,
        _ => return None,
    };

    Some(EndpointHealth {
        host: host.to_string(),
        port,
        status,
    })
}
