use anyhow::{Context, Result};
use conduit_core::{
    CircuitBreakerConfig, OrchestrationClient, OrchestrationConfig, Provider, ProviderRegistry,
};
use conduit_mcp::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConduitConfig {
    #[serde(default)]
    pub orchestration: OrchestrationSection,

    #[serde(default)]
    pub server: ServerSection,

    /// Providers in priority order
    #[serde(default)]
    pub providers: Vec<ProviderSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_metrics_window")]
    pub metrics_window: usize,

    #[serde(default = "default_metrics_channel_capacity")]
    pub metrics_channel_capacity: usize,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> u64 {
    30
}

fn default_cache_capacity() -> usize {
    1024
}

fn default_metrics_window() -> usize {
    100
}

fn default_metrics_channel_capacity() -> usize {
    1024
}

impl Default for OrchestrationSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            cache_capacity: default_cache_capacity(),
            metrics_window: default_metrics_window(),
            metrics_channel_capacity: default_metrics_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8700
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSection {
    pub id: String,

    pub capabilities: Vec<String>,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Unset or zero disables caching for this provider
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,

    /// Breaker overrides; unset fields fall back to `[orchestration]`
    #[serde(default)]
    pub failure_threshold: Option<u32>,

    #[serde(default)]
    pub recovery_timeout_secs: Option<u64>,

    pub transport: TransportConfig,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_concurrent_requests() -> usize {
    8
}

impl ConduitConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::info!(
                path = %config_path.display(),
                "Configuration file not found, using defaults with no providers"
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path).with_context(|| {
            format!("Failed to read configuration file {}", config_path.display())
        })?;
        toml::from_str(&content).with_context(|| {
            format!("Failed to parse configuration file {}", config_path.display())
        })
    }

    fn breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.orchestration.failure_threshold,
            recovery_timeout: Duration::from_secs(self.orchestration.recovery_timeout_secs),
        }
    }

    pub fn orchestration_config(&self) -> OrchestrationConfig {
        OrchestrationConfig {
            breaker: self.breaker(),
            cache_capacity: self.orchestration.cache_capacity,
            metrics_window: self.orchestration.metrics_window,
            metrics_channel_capacity: self.orchestration.metrics_channel_capacity,
        }
    }

    /// Build transports and validate the provider list
    pub fn build_registry(&self) -> Result<ProviderRegistry> {
        let global = self.breaker();
        let mut providers = Vec::with_capacity(self.providers.len());

        for section in &self.providers {
            let transport = section
                .transport
                .build()
                .with_context(|| format!("Invalid transport for provider '{}'", section.id))?;

            let mut provider = Provider::new(section.id.as_str(), transport)
                .with_capabilities(section.capabilities.iter().cloned())
                .with_timeout(Duration::from_millis(section.timeout_ms))
                .with_max_concurrent_requests(section.max_concurrent_requests);

            if let Some(ttl) = section.cache_ttl_secs {
                provider = provider.with_cache_ttl(Duration::from_secs(ttl));
            }

            if section.failure_threshold.is_some() || section.recovery_timeout_secs.is_some() {
                provider = provider.with_breaker(CircuitBreakerConfig {
                    failure_threshold: section
                        .failure_threshold
                        .unwrap_or(global.failure_threshold),
                    recovery_timeout: section
                        .recovery_timeout_secs
                        .map(Duration::from_secs)
                        .unwrap_or(global.recovery_timeout),
                });
            }

            providers.push(provider);
        }

        ProviderRegistry::new(providers).context("Invalid provider configuration")
    }

    pub fn build_client(&self) -> Result<OrchestrationClient> {
        Ok(OrchestrationClient::new(
            self.orchestration_config(),
            self.build_registry()?,
        ))
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<OrchestrationClient>,
}

impl AppState {
    pub fn new(client: Arc<OrchestrationClient>) -> Self {
        Self { client }
    }
}
