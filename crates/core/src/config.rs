//! Configuration types for the orchestration layer.

use std::time::Duration;

/// Circuit breaker tuning, global or per provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit rejects requests before allowing a trial
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration for an `OrchestrationClient`.
#[derive(Debug, Clone)]
pub struct OrchestrationConfig {
    /// Breaker settings for providers without their own override
    pub breaker: CircuitBreakerConfig,
    /// Maximum number of cached responses before LRU eviction
    pub cache_capacity: usize,
    /// Samples kept per provider for latency statistics
    pub metrics_window: usize,
    /// Buffered metrics samples awaiting aggregation
    pub metrics_channel_capacity: usize,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            cache_capacity: 1024,
            metrics_window: 100,
            metrics_channel_capacity: 1024,
        }
    }
}
