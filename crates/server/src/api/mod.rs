use crate::config::AppState;
use anyhow::Result;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

mod handlers;

/// Start the API server, stopping when `shutdown` resolves
pub async fn serve(
    addr: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // API routes
        .route("/api/health", get(handlers::health))
        .route("/api/invoke", post(handlers::invoke))
        .route("/api/cache", delete(handlers::invalidate_cache))
        // Middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new())
                .on_response(DefaultOnResponse::new()),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "conduit",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// API error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// Error type for API handlers. Provider failures are not errors; they come
/// back as a normal `Response` body.
pub struct ApiError {
    status: StatusCode,
    error: anyhow::Error,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: anyhow::anyhow!(message.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_msg = self.error.to_string();
        let details = self
            .error
            .chain()
            .skip(1)
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(": ");

        let response = if details.is_empty() {
            ErrorResponse::new(error_msg)
        } else {
            ErrorResponse::with_details(error_msg, details)
        };

        (self.status, Json(response)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: err.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request as HttpRequest;
    use conduit_core::testing::{MockOutcome, MockTransport};
    use conduit_core::{
        OrchestrationClient, OrchestrationConfig, Provider, ProviderRegistry, TransportError,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn router(transports: Vec<(&str, Arc<MockTransport>)>) -> Router {
        let providers = transports.into_iter().map(|(id, transport)| {
            Provider::new(id, transport)
                .with_capability("systematic_analysis")
                .with_timeout(Duration::from_secs(5))
                .with_cache_ttl(Duration::from_secs(60))
        });
        let registry = ProviderRegistry::new(providers).unwrap();
        let client = OrchestrationClient::new(OrchestrationConfig::default(), registry);
        create_router(AppState::new(Arc::new(client)))
    }

    async fn send(router: Router, request: HttpRequest<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn invoke(body: Value) -> HttpRequest<Body> {
        HttpRequest::post("/api/invoke")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_liveness() {
        let (status, body) = send(
            router(vec![]),
            HttpRequest::get("/health").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "conduit");
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let transport = Arc::new(MockTransport::new("primary"));
        let (status, body) = send(
            router(vec![("primary", transport.clone())]),
            invoke(json!({
                "capability": "systematic_analysis",
                "payload": {"topic": "pricing"},
                "caller": "test"
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["provider"], "primary");
        assert_eq!(body["payload"]["payload"], json!({"topic": "pricing"}));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_invoke_failure_is_still_ok() {
        let transport = Arc::new(
            MockTransport::new("primary")
                .always(MockOutcome::Fail(TransportError::Connection("down".into()))),
        );
        let (status, body) = send(
            router(vec![("primary", transport)]),
            invoke(json!({"capability": "systematic_analysis", "payload": {}})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["degraded"], true);
        assert_eq!(body["error_kind"], "all_providers_unavailable");
    }

    #[tokio::test]
    async fn test_invoke_unknown_capability() {
        let (status, body) = send(
            router(vec![]),
            invoke(json!({"capability": "unknown", "payload": null})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error_kind"], "no_provider_available");
    }

    #[tokio::test]
    async fn test_invoke_empty_capability_is_bad_request() {
        let (status, body) = send(
            router(vec![]),
            invoke(json!({"capability": "  ", "payload": {}})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("capability"));
    }

    #[tokio::test]
    async fn test_health_and_cache_invalidation() {
        let transport = Arc::new(MockTransport::new("primary"));
        let router = router(vec![("primary", transport.clone())]);

        for _ in 0..2 {
            let (_, body) = send(
                router.clone(),
                invoke(json!({"capability": "systematic_analysis", "payload": {"q": 1}})),
            )
            .await;
            assert_eq!(body["success"], true);
        }
        assert_eq!(transport.calls(), 1);

        let (status, health) = send(
            router.clone(),
            HttpRequest::get("/api/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["providers"]["primary"]["state"], "closed");
        assert_eq!(health["cache"]["entries"], 1);
        assert_eq!(health["cache"]["hits"], 1);

        let (status, cleared) = send(
            router.clone(),
            HttpRequest::delete("/api/cache").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cleared["cleared"], 1);

        send(
            router,
            invoke(json!({"capability": "systematic_analysis", "payload": {"q": 1}})),
        )
        .await;
        assert_eq!(transport.calls(), 2);
    }
}
