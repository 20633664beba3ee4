//! # Orchestration Client
//!
//! Single entry point for capability calls. One `invoke` runs, in order:
//!
//! 1. deadline check (an already-expired request never dispatches)
//! 2. candidate lookup in the registry (none: `NoProviderAvailable`)
//! 3. cache lookup keyed on the preferred candidate (hit: return it)
//! 4. sequential candidate iteration: breaker gate, dispatch, record outcome
//! 5. `AllProvidersUnavailable` when every candidate was skipped or failed
//!
//! Candidate order is fixed by registry priority and never adapts to runtime
//! latency. Candidates are tried one at a time, never fanned out.

use crate::breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
use crate::cache::{CacheKey, CacheStats, ResponseCache};
use crate::config::OrchestrationConfig;
use crate::dispatcher::RequestDispatcher;
use crate::health::{HealthReport, ProviderHealth};
use crate::metrics::MetricsRecorder;
use crate::registry::{Provider, ProviderRegistry};
use crate::transport::TransportError;
use crate::types::{ErrorKind, ProviderId, Request, Response};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Orchestrates cache, breakers, registry and dispatcher.
///
/// Construct one per process and share it behind an `Arc`. The breaker map is
/// built at construction and only read afterwards; each breaker carries its
/// own lock.
#[derive(Debug)]
pub struct OrchestrationClient {
    registry: ProviderRegistry,
    breakers: HashMap<ProviderId, CircuitBreaker>,
    cache: ResponseCache,
    dispatcher: RequestDispatcher,
    metrics: Arc<MetricsRecorder>,
}

impl OrchestrationClient {
    pub fn new(config: OrchestrationConfig, registry: ProviderRegistry) -> Self {
        let breakers = registry
            .iter()
            .map(|p| {
                let breaker_config = p.breaker.unwrap_or(config.breaker);
                (p.id.clone(), CircuitBreaker::new(p.id.as_str(), breaker_config))
            })
            .collect();

        let metrics = Arc::new(MetricsRecorder::new(
            config.metrics_window,
            config.metrics_channel_capacity,
        ));
        let dispatcher = RequestDispatcher::new(&registry, metrics.clone());

        info!(
            providers = registry.len(),
            capabilities = registry.capabilities().len(),
            cache_capacity = config.cache_capacity,
            "Orchestration client ready"
        );

        Self {
            registry,
            breakers,
            cache: ResponseCache::new(config.cache_capacity),
            dispatcher,
            metrics,
        }
    }

    /// Invoke a capability. Never fails: every outcome is a `Response`, and
    /// any `success: false` means "proceed without this enhancement".
    pub async fn invoke(&self, request: &Request) -> Response {
        let span = info_span!(
            "invoke",
            request_id = %Uuid::new_v4(),
            capability = %request.capability,
            caller = request.caller.as_deref().unwrap_or("anonymous"),
        );

        async {
            let started = Instant::now();
            let response = self.invoke_inner(request, started).await;
            debug!(
                success = response.success,
                error_kind = response.error_kind.map(ErrorKind::as_str).unwrap_or("none"),
                cached = response.cached,
                total_ms = started.elapsed().as_millis() as u64,
                "Invoke finished"
            );
            response
        }
        .instrument(span)
        .await
    }

    async fn invoke_inner(&self, request: &Request, started: Instant) -> Response {
        if request.is_expired(started) {
            return Response::failure(
                ErrorKind::DeadlineExceeded,
                "deadline passed before any provider was tried",
            );
        }

        let candidates = self
            .registry
            .candidates(&request.capability, request.provider.as_ref());
        let Some(first) = candidates.first() else {
            return Response::failure(
                ErrorKind::NoProviderAvailable,
                format!("no provider declares capability '{}'", request.capability),
            );
        };

        let key = ResponseCache::key_for_json(&first.id, &request.capability, &request.payload);
        if let Some(entry) = self.cache.get(&key) {
            debug!(provider = %entry.provider, hits = entry.hit_count, "Cache hit");
            let mut response = Response::success(entry.provider, entry.response, started.elapsed());
            response.cached = true;
            return response;
        }

        for provider in &candidates {
            let now = Instant::now();
            let (budget, clamped) = match request.remaining(now) {
                Some(remaining) if remaining.is_zero() => return deadline_exceeded(),
                Some(remaining) if remaining < provider.timeout => (remaining, true),
                _ => (provider.timeout, false),
            };

            let Some(breaker) = self.breakers.get(&provider.id) else {
                continue;
            };
            // An unsettled permit releases a HalfOpen trial when dropped, including on cancellation
            let Some(permit) = breaker.try_acquire() else {
                debug!(provider = %provider.id, "Circuit open, skipping provider");
                continue;
            };

            let response = self.dispatcher.dispatch_within(provider, request, budget).await;

            match response.error_kind {
                None => {
                    permit.record_success();
                    self.store(key, provider, &response);
                    return response;
                }
                Some(ErrorKind::Timeout) if clamped => {
                    // The caller's deadline cut the call short; not the provider's fault
                    drop(permit);
                    return deadline_exceeded().with_provider(provider.id.clone());
                }
                Some(kind) if kind.is_breaker_failure() => {
                    permit.record_failure();
                    debug!(provider = %provider.id, error_kind = %kind, "Falling back to next candidate");
                }
                Some(kind) => {
                    drop(permit);
                    debug!(provider = %provider.id, error_kind = %kind, "No health signal, trying next candidate");
                }
            }

            if request.is_expired(Instant::now()) {
                return deadline_exceeded();
            }
        }

        warn!(candidates = candidates.len(), "All providers unavailable");
        Response::failure(
            ErrorKind::AllProvidersUnavailable,
            format!(
                "every provider for '{}' is unavailable or failed",
                request.capability
            ),
        )
        .with_latency(started.elapsed())
        .degraded()
    }

    fn store(&self, key: CacheKey, provider: &Provider, response: &Response) {
        if let (Some(ttl), Some(payload)) = (provider.cache_ttl, response.payload.as_ref()) {
            self.cache.put(key, provider.id.clone(), payload.clone(), ttl);
        }
    }

    /// Establish every provider's connection concurrently.
    ///
    /// A provider that cannot connect has the failure recorded on its breaker.
    pub async fn connect_all(&self) -> Vec<(ProviderId, Result<(), TransportError>)> {
        let attempts = self.registry.iter().map(|provider| async move {
            let outcome = match tokio::time::timeout(provider.timeout, provider.transport.connect()).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Connection(format!(
                    "connect timed out after {}ms",
                    provider.timeout.as_millis()
                ))),
            };

            match &outcome {
                Ok(()) => info!(provider = %provider.id, endpoint = %provider.transport.describe(), "Provider connected"),
                Err(error) => {
                    if let Some(breaker) = self.breakers.get(&provider.id) {
                        breaker.record_failure();
                    }
                    warn!(provider = %provider.id, error = %error, "Provider failed to connect");
                }
            }

            (provider.id.clone(), outcome)
        });

        join_all(attempts).await
    }

    /// Close every provider's connection
    pub async fn shutdown(&self) {
        join_all(self.registry.iter().map(|p| p.transport.shutdown())).await;
        info!("Orchestration client shut down");
    }

    /// Health of every provider, plus cache and metrics counters
    pub fn get_health(&self) -> HealthReport {
        let now = Instant::now();
        let mut latency = self.metrics.stats();

        let providers: BTreeMap<_, _> = self
            .registry
            .iter()
            .map(|provider| {
                let snapshot = self
                    .breaker_snapshot(&provider.id)
                    .unwrap_or(BreakerSnapshot {
                        state: CircuitState::Closed,
                        failure_count: 0,
                        last_failure: None,
                    });

                let health = ProviderHealth {
                    state: snapshot.state,
                    failure_count: snapshot.failure_count,
                    last_failure_age_ms: snapshot
                        .last_failure
                        .map(|at| now.saturating_duration_since(at).as_millis() as u64),
                    recent_latency: latency.remove(&provider.id).unwrap_or_default(),
                    endpoint: provider.transport.describe(),
                    capabilities: provider.capabilities.iter().cloned().collect(),
                };
                (provider.id.clone(), health)
            })
            .collect();

        HealthReport {
            generated_at: chrono::Utc::now(),
            providers,
            cache: self.cache.stats(),
            dropped_metrics: self.metrics.dropped(),
        }
    }

    pub fn breaker_state(&self, provider: &ProviderId) -> Option<CircuitState> {
        self.breakers.get(provider).map(CircuitBreaker::state)
    }

    pub fn breaker_snapshot(&self, provider: &ProviderId) -> Option<BreakerSnapshot> {
        self.breakers.get(provider).map(CircuitBreaker::snapshot)
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached response
    pub fn invalidate_cache(&self) {
        self.cache.clear();
        info!("Response cache cleared");
    }

    /// Drop stale cached responses, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }
}

fn deadline_exceeded() -> Response {
    Response::failure(
        ErrorKind::DeadlineExceeded,
        "deadline passed while trying providers",
    )
}
