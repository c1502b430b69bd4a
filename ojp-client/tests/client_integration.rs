//! Multi-component integration tests wiring the endpoint registry (A),
//! server selector (B), session tracker (C) and multinode dispatcher (D)
//! together, covering the end-to-end scenarios named in §8.
//!
//! Per §9's design note ("global singletons... -> explicit objects owned
//! by a context"), these construct a fresh registry/tracker/dispatcher per
//! test rather than reaching for any shared global state.

use ojp_client::{Endpoint, EndpointId, EndpointRegistry, MultinodeDispatcher, SessionTracker, UnhealthyCause};
use ojp_proto::config::RetryConfig;
use ojp_proto::OjpError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn fast_retry() -> RetryConfig {
    RetryConfig {
        retry_attempts: 3,
        retry_delay_ms: 1,
        max_delay_ms: 10,
    }
}

/// Load-aware routing picks the least loaded of several healthy endpoints.
#[tokio::test]
async fn load_aware_routing_picks_the_least_loaded_endpoint() {
    let endpoints = EndpointRegistry::parse("s1:5000,s2:5001,s3:5002").unwrap();
    let sessions = Arc::new(SessionTracker::new());
    for _ in 0..5 {
        sessions.register(&uuid::Uuid::new_v4().to_string(), &"s1:5000".to_string()).await;
    }
    for _ in 0..2 {
        sessions.register(&uuid::Uuid::new_v4().to_string(), &"s2:5001".to_string()).await;
    }
    for _ in 0..8 {
        sessions.register(&uuid::Uuid::new_v4().to_string(), &"s3:5002".to_string()).await;
    }

    let dispatcher = MultinodeDispatcher::new(endpoints, sessions, true, fast_retry());
    let route = dispatcher.route(None).await.unwrap();
    assert_eq!(route.endpoint, "s2:5001");
    assert!(route.retryable);
}

/// Equal load across every healthy endpoint is broken fairly, not skewed
/// toward whichever endpoint sorts first.
#[tokio::test]
async fn equal_load_is_broken_fairly_across_the_whole_pool() {
    let endpoints = EndpointRegistry::parse("s1:5000,s2:5001,s3:5002").unwrap();
    let sessions = Arc::new(SessionTracker::new());
    for ep in ["s1:5000", "s2:5001", "s3:5002"] {
        for _ in 0..3 {
            sessions.register(&uuid::Uuid::new_v4().to_string(), &ep.to_string()).await;
        }
    }

    let dispatcher = MultinodeDispatcher::new(endpoints, sessions, true, fast_retry());
    let mut counts = std::collections::HashMap::new();
    for _ in 0..30 {
        let route = dispatcher.route(None).await.unwrap();
        *counts.entry(route.endpoint).or_insert(0u32) += 1;
    }
    for ep in ["s1:5000", "s2:5001", "s3:5002"] {
        assert_eq!(counts.get(ep), Some(&10));
    }
}

/// An unhealthy endpoint is never chosen even if it carries the lowest
/// session count.
#[tokio::test]
async fn unhealthy_endpoint_is_excluded_despite_lowest_load() {
    let endpoints = EndpointRegistry::parse("s1:5000,s2:5001,s3:5002").unwrap();
    let sessions = Arc::new(SessionTracker::new());
    for _ in 0..10 {
        sessions.register(&uuid::Uuid::new_v4().to_string(), &"s1:5000".to_string()).await;
    }
    for _ in 0..1 {
        sessions.register(&uuid::Uuid::new_v4().to_string(), &"s2:5001".to_string()).await;
    }
    for _ in 0..8 {
        sessions.register(&uuid::Uuid::new_v4().to_string(), &"s3:5002".to_string()).await;
    }
    endpoints
        .mark_unhealthy(&"s2:5001".to_string(), UnhealthyCause::TransportUnavailable)
        .await;

    let dispatcher = MultinodeDispatcher::new(endpoints, sessions, true, fast_retry());
    let route = dispatcher.route(None).await.unwrap();
    assert_eq!(route.endpoint, "s3:5002");
}

/// A sticky session whose bound endpoint goes unhealthy fails fast; the
/// send closure must never even be invoked.
#[tokio::test]
async fn sticky_session_failure_is_fatal_with_no_retry() {
    let endpoints = EndpointRegistry::parse("s1:5000,s2:5001,s3:5002").unwrap();
    let sessions = Arc::new(SessionTracker::new());
    sessions.register("session-s", &"s1:5000".to_string()).await;
    endpoints
        .mark_unhealthy(&"s1:5000".to_string(), UnhealthyCause::TransportUnavailable)
        .await;

    let dispatcher = MultinodeDispatcher::new(Arc::clone(&endpoints), sessions, true, fast_retry());

    let attempts = Arc::new(AtomicU32::new(0));
    let attempts_clone = Arc::clone(&attempts);
    let result: Result<((), EndpointId), OjpError> = dispatcher
        .dispatch_with_retry(Some("session-s"), move |_endpoint| {
            attempts_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

    assert!(matches!(result, Err(OjpError::SessionServerUnavailable { .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

/// A non-sticky call survives one connection-class failure and lands on a
/// healthy endpoint, while the retry budget is honored with exponential
/// backoff when every attempt fails.
#[tokio::test]
async fn retry_budget_is_honored_with_exponential_backoff() {
    let endpoints = EndpointRegistry::parse("s1:5000").unwrap();
    let sessions = Arc::new(SessionTracker::new());
    let retry = RetryConfig {
        retry_attempts: 3,
        retry_delay_ms: 20,
        max_delay_ms: 1000,
    };
    let dispatcher = MultinodeDispatcher::new(endpoints, sessions, true, retry);

    let attempt_times: Arc<tokio::sync::Mutex<Vec<Instant>>> = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let started = Instant::now();
    let times_clone = Arc::clone(&attempt_times);

    let result: Result<((), EndpointId), OjpError> = dispatcher
        .dispatch_with_retry(None, move |endpoint| {
            let times = Arc::clone(&times_clone);
            async move {
                times.lock().await.push(Instant::now());
                Err(OjpError::TransportUnavailable {
                    endpoint,
                    details: "simulated outage".to_string(),
                })
            }
        })
        .await;

    assert!(result.is_err());
    let times = attempt_times.lock().await;
    // initial attempt + 3 retries = 4 total attempts.
    assert_eq!(times.len(), 4);
    for window in times.windows(2) {
        assert!(window[1] >= window[0]);
    }
    assert!(started.elapsed().as_millis() >= 20);
}

/// `connect`'s session must bind to the endpoint the connect RPC actually
/// succeeded on (the `EndpointId` `dispatch_with_retry` returns alongside
/// its value), never to a second, independent `route(None)` pick -- with
/// equal load across the cluster a second pick advances the selector's
/// fairness cursor and lands on a different node (§4.D stickiness, S4).
#[tokio::test]
async fn connect_binds_the_session_to_the_endpoint_it_actually_used() {
    let endpoints = EndpointRegistry::parse("s1:5000,s2:5001").unwrap();
    let sessions = Arc::new(SessionTracker::new());
    let dispatcher = MultinodeDispatcher::new(Arc::clone(&endpoints), Arc::clone(&sessions), true, fast_retry());

    // Simulates the wire `connect` call: no session yet, so this is an
    // unbound dispatch that both picks an endpoint and "creates" the
    // session on it.
    let (connected_endpoint, winning_endpoint): (EndpointId, EndpointId) = dispatcher
        .dispatch_with_retry(None, |endpoint| {
            let endpoint = endpoint.clone();
            async move { Ok(endpoint) }
        })
        .await
        .unwrap();
    assert_eq!(connected_endpoint, winning_endpoint);

    // The fix: bind using the endpoint the call actually succeeded on.
    sessions.register("session-s", &winning_endpoint).await;
    assert_eq!(sessions.endpoint_for("session-s").await, Some(winning_endpoint.clone()));

    // Demonstrate why a second, independent pick would have been wrong:
    // with equal load across two healthy endpoints the cursor has already
    // advanced past the one `dispatch_with_retry` chose, so re-routing
    // lands on the other node.
    let re_picked = dispatcher.route(None).await.unwrap().endpoint;
    assert_ne!(re_picked, winning_endpoint);

    // Subsequent sticky calls must still land on the endpoint the session
    // was actually created on, not the re-picked one.
    let sticky_route = dispatcher.route(Some("session-s")).await.unwrap();
    assert_eq!(sticky_route.endpoint, winning_endpoint);
    assert!(!sticky_route.retryable);
}

/// The endpoint registry preserves URL order and duplicate entries (the
/// `ServerList` shape) and `for_each` walks them in that same order.
#[tokio::test]
async fn endpoint_registry_preserves_server_list_order() {
    let endpoints = EndpointRegistry::parse("h1:5000,h2:5001,h1:5000").unwrap();
    let list = endpoints.server_list().await;
    assert_eq!(list, vec!["h1:5000", "h2:5001", "h1:5000"]);

    let mut seen = Vec::new();
    endpoints.for_each(|ep: &Endpoint| seen.push(ep.id())).await;
    assert_eq!(seen, vec!["h1:5000", "h2:5001"]);
}
