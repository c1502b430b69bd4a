//! Endpoint registry & health tracker (component A).
//!
//! Parses the `host:port` list out of a client URL and tracks per-endpoint
//! health. Health only ever flips on connection-class failures (§7); a
//! background probe retries unhealthy endpoints and flips them back.

use ojp_proto::health::{ClusterHealthView, EndpointHealth, EndpointStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Stable identity for an endpoint: `host:port`. Duplicate entries in the
/// URL are preserved as distinct `ServerList` slots, but share one health
/// record per identity.
pub type EndpointId = String;

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub healthy: bool,
    pub last_probe_at: Option<Instant>,
    pub failure_count: u32,
}

impl Endpoint {
    pub fn id(&self) -> EndpointId {
        format!("{}:{}", self.host, self.port)
    }
}

/// Why an endpoint was marked unhealthy, surfaced for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnhealthyCause {
    TransportUnavailable,
    ProbeFailed,
}

struct Inner {
    /// Preserves URL order, duplicates included — this is the `ServerList`.
    order: Vec<EndpointId>,
    by_id: std::collections::HashMap<EndpointId, Endpoint>,
}

/// Component A. One instance per client process.
pub struct EndpointRegistry {
    inner: RwLock<Inner>,
    probe_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl EndpointRegistry {
    /// Parses `host1:p1,host2:p2,...` per §4.A, preserving duplicates.
    pub fn parse(server_list: &str) -> ojp_proto::Result<Arc<Self>> {
        let mut order = Vec::new();
        let mut by_id = std::collections::HashMap::new();
        for entry in server_list.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (host, port_str) = entry.rsplit_once(':').ok_or_else(|| {
                ojp_proto::OjpError::Configuration {
                    details: format!("malformed endpoint '{entry}', expected host:port"),
                }
            })?;
            let port: u16 = port_str.parse().map_err(|_| ojp_proto::OjpError::Configuration {
                details: format!("malformed port in endpoint '{entry}'"),
            })?;
            let ep = Endpoint {
                host: host.to_string(),
                port,
                healthy: true,
                last_probe_at: None,
                failure_count: 0,
            };
            let id = ep.id();
            order.push(id.clone());
            by_id.entry(id).or_insert(ep);
        }
        if order.is_empty() {
            return Err(ojp_proto::OjpError::Configuration {
                details: "client URL contains no endpoints".to_string(),
            });
        }
        Ok(Arc::new(Self {
            inner: RwLock::new(Inner { order, by_id }),
            probe_task: std::sync::Mutex::new(None),
        }))
    }

    /// Ordered endpoint identities, duplicates included — `ServerList`.
    pub async fn server_list(&self) -> Vec<EndpointId> {
        self.inner.read().await.order.clone()
    }

    pub async fn healthy_set(&self) -> Vec<EndpointId> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter(|id| inner.by_id.get(*id).map(|e| e.healthy).unwrap_or(false))
            .cloned()
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect()
    }

    pub async fn is_healthy(&self, id: &EndpointId) -> bool {
        self.inner
            .read()
            .await
            .by_id
            .get(id)
            .map(|e| e.healthy)
            .unwrap_or(false)
    }

    pub async fn mark_unhealthy(&self, id: &EndpointId, _cause: UnhealthyCause) {
        let mut inner = self.inner.write().await;
        if let Some(ep) = inner.by_id.get_mut(id) {
            if ep.healthy {
                tracing::warn!(endpoint = %id, "marking endpoint unhealthy");
            }
            ep.healthy = false;
            ep.failure_count += 1;
            ep.last_probe_at = Some(Instant::now());
        }
    }

    pub async fn mark_healthy(&self, id: &EndpointId) {
        let mut inner = self.inner.write().await;
        if let Some(ep) = inner.by_id.get_mut(id) {
            if !ep.healthy {
                tracing::info!(endpoint = %id, "endpoint recovered");
            }
            ep.healthy = true;
            ep.failure_count = 0;
            ep.last_probe_at = Some(Instant::now());
        }
    }

    pub async fn for_each<F: FnMut(&Endpoint)>(&self, mut f: F) {
        let inner = self.inner.read().await;
        for id in &inner.order {
            if let Some(ep) = inner.by_id.get(id) {
                f(ep);
            }
        }
    }

    /// Renders the view piggybacked on every outbound request (component E).
    pub async fn health_view(&self) -> ClusterHealthView {
        let inner = self.inner.read().await;
        let mut seen = std::collections::HashSet::new();
        let mut endpoints = Vec::new();
        for id in &inner.order {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(ep) = inner.by_id.get(id) {
                endpoints.push(EndpointHealth {
                    host: ep.host.clone(),
                    port: ep.port,
                    status: if ep.healthy {
                        EndpointStatus::Up
                    } else {
                        EndpointStatus::Down
                    },
                });
            }
        }
        ClusterHealthView { endpoints }
    }

    /// Starts the background recovery probe. `probe` attempts one liveness
    /// check against an endpoint; `Ok(())` flips it healthy again.
    pub fn spawn_probe_loop<P, Fut>(self: &Arc<Self>, interval: Duration, probe: P)
    where
        P: Fn(EndpointId) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = bool> + Send,
    {
        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let unhealthy: Vec<EndpointId> = {
                    let inner = registry.inner.read().await;
                    inner
                        .by_id
                        .iter()
                        .filter(|(_, e)| !e.healthy)
                        .map(|(id, _)| id.clone())
                        .collect()
                };
                for id in unhealthy {
                    if probe(id.clone()).await {
                        registry.mark_healthy(&id).await;
                    }
                }
            }
        });
        *self.probe_task.lock().unwrap() = Some(handle);
    }
}

impl Drop for EndpointRegistry {
    fn drop(&mut self) {
        if let Some(handle) = self.probe_task.lock().unwrap().take() {
            handle.abort();
        }
    }
}
