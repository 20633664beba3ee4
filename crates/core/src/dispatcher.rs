//! # Request Dispatcher
//!
//! Executes exactly one attempt against one provider. Every outcome,
//! including timeouts, transport errors and a panicking transport, comes
//! back as a `Response`; nothing escapes as an error or unwind.

use crate::metrics::{MetricsRecorder, Sample};
use crate::registry::{Provider, ProviderRegistry};
use crate::transport::TransportError;
use crate::types::{ErrorKind, ProviderId, Request, Response};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

impl From<&TransportError> for ErrorKind {
    fn from(error: &TransportError) -> Self {
        match error {
            TransportError::Connection(_) => ErrorKind::TransportFailure,
            TransportError::Rejected(_) => ErrorKind::ProviderRejected,
            TransportError::Malformed(_) => ErrorKind::MalformedResponse,
        }
    }
}

/// Single-attempt, timeout-bounded provider calls
#[derive(Debug)]
pub struct RequestDispatcher {
    /// Concurrency limit per provider, sized from `max_concurrent_requests`
    limits: HashMap<ProviderId, Arc<Semaphore>>,
    metrics: Arc<MetricsRecorder>,
}

impl RequestDispatcher {
    pub fn new(registry: &ProviderRegistry, metrics: Arc<MetricsRecorder>) -> Self {
        let limits = registry
            .iter()
            .map(|p| (p.id.clone(), Arc::new(Semaphore::new(p.max_concurrent_requests))))
            .collect();

        Self { limits, metrics }
    }

    /// Dispatch bounded by the provider's own timeout
    pub async fn dispatch(&self, provider: &Provider, request: &Request) -> Response {
        self.dispatch_within(provider, request, provider.timeout).await
    }

    /// Dispatch bounded by `budget`, which callers clamp to the request deadline
    pub async fn dispatch_within(
        &self,
        provider: &Provider,
        request: &Request,
        budget: Duration,
    ) -> Response {
        // Held until the call finishes; a saturated provider fails fast
        let _permit = match self.limits.get(&provider.id) {
            Some(limit) => match limit.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    debug!(provider = %provider.id, "Provider at concurrency limit");
                    return Response::failure(
                        ErrorKind::ProviderBusy,
                        format!("{} is at its concurrency limit", provider.id),
                    )
                    .with_provider(provider.id.clone());
                }
            },
            None => None,
        };

        let started = Instant::now();
        let call = AssertUnwindSafe(
            provider
                .transport
                .call(&request.capability, &request.payload),
        )
        .catch_unwind();
        let outcome = tokio::time::timeout(budget, call).await;
        let latency = started.elapsed();

        let response = match outcome {
            Ok(Ok(Ok(payload))) => Response::success(provider.id.clone(), payload, latency),
            Ok(Ok(Err(error))) => Response::failure(ErrorKind::from(&error), error.to_string()),
            Ok(Err(_panic)) => Response::failure(
                ErrorKind::TransportFailure,
                format!("transport for {} panicked", provider.id),
            ),
            Err(_elapsed) => Response::failure(
                ErrorKind::Timeout,
                format!("no response within {}ms", budget.as_millis()),
            ),
        }
        .with_provider(provider.id.clone())
        .with_latency(latency);

        match response.error_kind {
            None => debug!(
                provider = %provider.id,
                capability = %request.capability,
                latency_ms = latency.as_millis() as u64,
                "Dispatch succeeded"
            ),
            Some(kind) => warn!(
                provider = %provider.id,
                capability = %request.capability,
                latency_ms = latency.as_millis() as u64,
                error_kind = %kind,
                message = response.message.as_deref().unwrap_or_default(),
                "Dispatch failed"
            ),
        }

        self.metrics.record(Sample {
            provider: provider.id.clone(),
            latency,
            error_kind: response.error_kind,
        });

        response
    }
}
