//! Multinode dispatcher (component D): routing, stickiness, classified
//! retry. Grounded on the donor's `ConnectionManager::execute_with_retry`
//! (same exponential-backoff shape), generalized to endpoint-level retry
//! with the sticky-session exclusion §4.D requires.

use crate::endpoint::{EndpointId, EndpointRegistry, UnhealthyCause};
use crate::selector::ServerSelector;
use crate::session_tracker::SessionTracker;
use ojp_proto::config::RetryConfig;
use ojp_proto::OjpError;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of routing a call, telling the caller which endpoint to send to
/// and whether a retry on failure is permitted at all.
pub struct Route {
    pub endpoint: EndpointId,
    /// Session-bound and in-transaction calls must not silently fail over.
    pub retryable: bool,
}

/// Component D.
pub struct MultinodeDispatcher {
    pub endpoints: Arc<EndpointRegistry>,
    pub selector: ServerSelector,
    pub sessions: Arc<SessionTracker>,
    pub retry: RetryConfig,
}

impl MultinodeDispatcher {
    pub fn new(
        endpoints: Arc<EndpointRegistry>,
        sessions: Arc<SessionTracker>,
        load_aware: bool,
        retry: RetryConfig,
    ) -> Self {
        Self {
            endpoints,
            selector: ServerSelector::new(load_aware),
            sessions,
            retry,
        }
    }

    /// §4.D step 1: route a call, optionally bound to an existing session.
    pub async fn route(&self, session_id: Option<&str>) -> Result<Route, OjpError> {
        if let Some(sid) = session_id {
            let endpoint = self
                .sessions
                .endpoint_for(sid)
                .await
                .ok_or_else(|| OjpError::SessionInvalidated {
                    session_id: sid.to_string(),
                })?;
            if !self.endpoints.is_healthy(&endpoint).await {
                return Err(OjpError::SessionServerUnavailable {
                    session_id: sid.to_string(),
                    endpoint,
                });
            }
            // Retry is disabled for any session-bound request (§4.D) --
            // failing fast is a correctness requirement, not a fallback.
            return Ok(Route {
                endpoint,
                retryable: false,
            });
        }

        let healthy = self.endpoints.healthy_set().await;
        let counts = self.sessions.session_count_by_endpoint().await;
        let endpoint = self
            .selector
            .pick(&healthy, &counts)
            .map_err(|_| OjpError::TransportUnavailable {
                endpoint: "<cluster>".to_string(),
                details: "no healthy endpoint available".to_string(),
            })?;
        Ok(Route {
            endpoint,
            retryable: true,
        })
    }

    /// §4.D step 4: classify a failure and decide whether/how to retry.
    /// `send` performs one attempt against the endpoint chosen by `route`;
    /// on a connection-class error for a non-sticky call it is retried
    /// against a freshly-picked endpoint with exponential backoff. Returns
    /// the endpoint the call actually succeeded on alongside the value, so
    /// callers that must bind a new session (§4.D step 3) don't have to
    /// re-pick — a second `route(None)` would advance the selector's
    /// fairness cursor and could land on a different node than the one
    /// that handled the call.
    pub async fn dispatch_with_retry<F, Fut, T>(
        &self,
        session_id: Option<&str>,
        mut send: F,
    ) -> Result<(T, EndpointId), OjpError>
    where
        F: FnMut(EndpointId) -> Fut,
        Fut: std::future::Future<Output = Result<T, OjpError>>,
    {
        let route = self.route(session_id).await?;
        let mut endpoint = route.endpoint;
        let mut attempt: i64 = 0;
        let mut delay = Duration::from_millis(self.retry.retry_delay_ms);

        loop {
            match send(endpoint.clone()).await {
                Ok(value) => return Ok((value, endpoint)),
                Err(err) if !route.retryable => return Err(err),
                Err(err) if err.is_connection_level() => {
                    self.endpoints
                        .mark_unhealthy(&endpoint, UnhealthyCause::TransportUnavailable)
                        .await;

                    let budget_exhausted =
                        !self.retry.is_unbounded() && attempt >= self.retry.retry_attempts as i64;
                    if budget_exhausted {
                        return Err(err);
                    }

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    delay = Duration::from_millis(
                        (delay.as_millis() as u64 * 2).min(self.retry.max_delay_ms),
                    );

                    let healthy = self.endpoints.healthy_set().await;
                    let counts = self.sessions.session_count_by_endpoint().await;
                    endpoint = self
                        .selector
                        .pick(&healthy, &counts)
                        .map_err(|_| OjpError::TransportUnavailable {
                            endpoint: "<cluster>".to_string(),
                            details: "no healthy endpoint available".to_string(),
                        })?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
