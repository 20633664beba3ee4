// End-to-end orchestration scenarios against scripted providers

use conduit_core::testing::{MockOutcome, MockTransport};
use conduit_core::{
    CircuitState, ErrorKind, OrchestrationClient, OrchestrationConfig, Provider, ProviderId,
    ProviderRegistry, Request, TransportError,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct Fixture {
    client: OrchestrationClient,
    fast: Arc<MockTransport>,
    slow: Arc<MockTransport>,
}

/// `fast` (1s timeout) ahead of `slow` (5s timeout), both serving "analyze"
fn fast_and_slow() -> Fixture {
    let fast = Arc::new(MockTransport::new("fast"));
    let slow = Arc::new(MockTransport::new("slow"));

    let registry = ProviderRegistry::new(vec![
        Provider::new("fast", fast.clone())
            .with_capability("analyze")
            .with_timeout(Duration::from_secs(1))
            .with_cache_ttl(Duration::from_secs(60)),
        Provider::new("slow", slow.clone())
            .with_capability("analyze")
            .with_timeout(Duration::from_secs(5))
            .with_cache_ttl(Duration::from_secs(60)),
    ])
    .unwrap();

    Fixture {
        client: OrchestrationClient::new(OrchestrationConfig::default(), registry),
        fast,
        slow,
    }
}

#[tokio::test]
async fn first_call_is_served_by_preferred_provider() {
    let f = fast_and_slow();

    let response = f.client.invoke(&Request::new("analyze", json!({"q": "x"}))).await;

    assert!(response.success);
    assert_eq!(response.provider, Some(ProviderId::new("fast")));
    assert!(!response.degraded);
    assert_eq!(f.fast.calls(), 1);
    assert_eq!(f.slow.calls(), 0);
}

#[tokio::test]
async fn open_breaker_routes_to_next_candidate() {
    let f = fast_and_slow();
    f.fast
        .set(MockOutcome::Fail(TransportError::Connection("refused".into())));

    // Distinct payloads so no call is answered from cache
    for i in 0..5 {
        let response = f.client.invoke(&Request::new("analyze", json!({ "i": i }))).await;
        assert_eq!(response.provider, Some(ProviderId::new("slow")));
    }
    assert_eq!(
        f.client.breaker_state(&ProviderId::new("fast")),
        Some(CircuitState::Open)
    );

    let fast_calls = f.fast.calls();
    let response = f.client.invoke(&Request::new("analyze", json!({"i": "next"}))).await;

    assert!(response.success);
    assert_eq!(response.provider, Some(ProviderId::new("slow")));
    // The open breaker kept the next call away from `fast`
    assert_eq!(f.fast.calls(), fast_calls);
}

#[tokio::test]
async fn repeated_call_within_ttl_dispatches_once() {
    let f = fast_and_slow();
    let request = Request::new("analyze", json!({"payload": "X"}));

    let first = f.client.invoke(&request).await;
    let second = f.client.invoke(&request).await;

    assert!(first.success && second.success);
    assert_eq!(first.payload, second.payload);
    assert!(second.cached);
    assert!(!second.degraded);
    assert_eq!(f.fast.calls() + f.slow.calls(), 1);
}

#[tokio::test]
async fn capability_without_providers_is_not_an_error() {
    let f = fast_and_slow();

    let response = f.client.invoke(&Request::new("visualize", json!({}))).await;

    assert!(!response.success);
    assert_eq!(response.error_kind, Some(ErrorKind::NoProviderAvailable));
    assert_eq!(f.fast.calls() + f.slow.calls(), 0);
    for id in ["fast", "slow"] {
        let snapshot = f.client.breaker_snapshot(&ProviderId::new(id)).unwrap();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
    }
}

#[tokio::test]
async fn expired_deadline_returns_immediately() {
    let f = fast_and_slow();
    let deadline = Instant::now()
        .checked_sub(Duration::from_millis(1))
        .unwrap_or_else(Instant::now);

    let response = f
        .client
        .invoke(&Request::new("analyze", json!({})).with_deadline(deadline))
        .await;

    assert_eq!(response.error_kind, Some(ErrorKind::DeadlineExceeded));
    assert_eq!(f.fast.calls() + f.slow.calls(), 0);
}

#[tokio::test]
async fn open_breaker_is_never_attempted() {
    let a = Arc::new(MockTransport::new("a"));
    let b = Arc::new(MockTransport::new("b"));
    let registry = ProviderRegistry::new(vec![
        Provider::new("a", a.clone()).with_capability("analyze"),
        Provider::new("b", b.clone()).with_capability("analyze"),
    ])
    .unwrap();
    let client = OrchestrationClient::new(OrchestrationConfig::default(), registry);

    a.set(MockOutcome::Fail(TransportError::Rejected("unsupported".into())));
    for i in 0..5 {
        client.invoke(&Request::new("analyze", json!(i))).await;
    }
    let attempts_before = a.calls();

    for i in 5..20 {
        let response = client.invoke(&Request::new("analyze", json!(i))).await;
        assert_eq!(response.provider, Some(ProviderId::new("b")));
    }
    assert_eq!(a.calls(), attempts_before);
}

#[tokio::test(start_paused = true)]
async fn failures_never_escape_as_errors() {
    let outcomes = [
        MockOutcome::Delay(Duration::from_secs(30), json!(1)),
        MockOutcome::Fail(TransportError::Malformed("not json".into())),
        MockOutcome::Fail(TransportError::Connection("connection refused".into())),
        MockOutcome::Fail(TransportError::Rejected("unknown tool".into())),
        MockOutcome::Panic,
    ];

    for outcome in outcomes {
        let transport = Arc::new(MockTransport::new("only").always(outcome));
        let registry = ProviderRegistry::new(vec![Provider::new("only", transport)
            .with_capability("analyze")
            .with_timeout(Duration::from_secs(1))])
        .unwrap();
        let client = OrchestrationClient::new(OrchestrationConfig::default(), registry);

        let response = client.invoke(&Request::new("analyze", json!({}))).await;

        assert!(!response.success);
        assert!(response.payload.is_none());
        assert_eq!(response.error_kind, Some(ErrorKind::AllProvidersUnavailable));
        assert!(response.degraded);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_invokes_share_one_client() {
    let f = fast_and_slow();
    let client = Arc::new(f.client);

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .invoke(&Request::new("analyze", json!({ "n": i % 4 })).with_caller(format!("user-{i}")))
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().success);
    }

    let report = client.get_health();
    assert_eq!(report.providers[&ProviderId::new("fast")].state, CircuitState::Closed);
    assert!(report.cache.entries <= 4);
}
