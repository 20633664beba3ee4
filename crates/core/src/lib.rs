//! # Conduit Core
//!
//! Orchestration layer for calls to external capability providers (MCP
//! servers and the like): per-provider circuit breakers, a TTL response
//! cache, timeout-bounded dispatch and deterministic fallback ordering.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conduit_core::testing::MockTransport;
//! use conduit_core::{OrchestrationClient, OrchestrationConfig, Provider, ProviderRegistry, Request};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), conduit_core::RegistryError> {
//! let registry = ProviderRegistry::new(vec![
//!     Provider::new("analysis", Arc::new(MockTransport::new("analysis")))
//!         .with_capability("systematic_analysis")
//!         .with_timeout(Duration::from_secs(5))
//!         .with_cache_ttl(Duration::from_secs(300)),
//! ])?;
//! let client = OrchestrationClient::new(OrchestrationConfig::default(), registry);
//!
//! let response = client
//!     .invoke(&Request::new("systematic_analysis", serde_json::json!({"topic": "pricing"})))
//!     .await;
//! if !response.success {
//!     // Proceed without the enhancement
//! }
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod cache;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod testing;
pub mod transport;
pub mod types;

pub use breaker::{BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use cache::{CacheEntry, CacheKey, CacheStats, ResponseCache};
pub use client::OrchestrationClient;
pub use config::{CircuitBreakerConfig, OrchestrationConfig};
pub use dispatcher::RequestDispatcher;
pub use health::{HealthReport, ProviderHealth};
pub use metrics::{LatencyStats, MetricsRecorder};
pub use registry::{Provider, ProviderRegistry, RegistryError};
pub use transport::{ProviderTransport, TransportError};
pub use types::*;
