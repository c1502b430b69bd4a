//! Multinode client dispatcher for Open J Proxy.
//!
//! Parses a multi-endpoint proxy URL, tracks per-endpoint health, routes
//! each outbound call under a load-aware or round-robin policy, enforces
//! session stickiness, retries non-sticky requests with classified
//! backoff, and piggybacks a cluster-health view on every request.
//!
//! # Example
//!
//! ```ignore
//! use ojp_client::OjpClient;
//! use ojp_proto::config::OjpConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (client, session) = OjpClient::connect(
//!         "proxy:[localhost:1059]_jdbc:postgresql://db:5432/app",
//!         "admin",
//!         "password",
//!         vec![],
//!         false,
//!         OjpConfig::default(),
//!     )
//!     .await?;
//!     client.execute_update(&session.session_id, "SELECT 1", vec![]).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod dispatcher;
pub mod endpoint;
pub mod metrics;
pub mod query;
pub mod selector;
pub mod session_tracker;
pub mod transport;
pub mod url;

pub use client::OjpClient;
pub use dispatcher::{MultinodeDispatcher, Route};
pub use endpoint::{Endpoint, EndpointId, EndpointRegistry, UnhealthyCause};
pub use metrics::{ClientMetrics, MetricsCollector};
pub use query::ResultStream;
pub use selector::{NoHealthyEndpoint, ServerSelector};
pub use session_tracker::SessionTracker;
pub use transport::Transport;
pub use url::{parse_proxy_url, ParsedProxyUrl};

pub use ojp_proto::OjpError;

/// Result alias matching the crate's single error taxonomy.
pub type Result<T> = std::result::Result<T, OjpError>;
