use super::{ApiError, ApiResult};
use crate::config::AppState;
use axum::{extract::State, Json};
use conduit_core::{HealthReport, ProviderId, Request, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Invoke a capability through the orchestration client
pub async fn invoke(
    State(state): State<AppState>,
    Json(req): Json<InvokeRequest>,
) -> ApiResult<Json<Response>> {
    if req.capability.trim().is_empty() {
        return Err(ApiError::bad_request("capability must not be empty"));
    }

    let mut request = Request::new(req.capability, req.payload);
    if let Some(provider) = req.provider {
        request = request.with_provider(provider);
    }
    if let Some(caller) = req.caller {
        request = request.with_caller(caller);
    }
    if let Some(deadline_ms) = req.deadline_ms {
        request = request.with_timeout(Duration::from_millis(deadline_ms));
    }

    let response = state.client.invoke(&request).await;
    Ok(Json(response))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub capability: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub provider: Option<ProviderId>,
    pub caller: Option<String>,
    /// Overall budget for the call, fallbacks included
    pub deadline_ms: Option<u64>,
}

/// Circuit, latency and cache health
pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.client.get_health())
}

/// Drop every cached response
pub async fn invalidate_cache(State(state): State<AppState>) -> Json<InvalidateCacheResponse> {
    let cleared = state.client.cache_stats().entries;
    state.client.invalidate_cache();
    Json(InvalidateCacheResponse { cleared })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateCacheResponse {
    pub cleared: usize,
}
