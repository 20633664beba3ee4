//! Read-only health snapshot for monitoring and CLI display.

use crate::breaker::CircuitState;
use crate::cache::CacheStats;
use crate::metrics::LatencyStats;
use crate::types::ProviderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Health of one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub state: CircuitState,
    pub failure_count: u32,
    /// Milliseconds since the most recent failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_age_ms: Option<u64>,
    pub recent_latency: LatencyStats,
    pub endpoint: String,
    pub capabilities: Vec<String>,
}

/// Health of the whole orchestration layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub providers: BTreeMap<ProviderId, ProviderHealth>,
    pub cache: CacheStats,
    pub dropped_metrics: u64,
}

impl HealthReport {
    /// Providers whose circuit is currently not closed
    pub fn unhealthy(&self) -> Vec<&ProviderId> {
        self.providers
            .iter()
            .filter(|(_, health)| health.state != CircuitState::Closed)
            .map(|(id, _)| id)
            .collect()
    }
}
