// Provider catalog, populated once at startup and read-only afterwards

use crate::config::CircuitBreakerConfig;
use crate::transport::ProviderTransport;
use crate::types::ProviderId;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Errors raised while building a registry
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("provider id must not be empty")]
    EmptyId,

    #[error("duplicate provider id: {0}")]
    DuplicateProvider(ProviderId),

    #[error("provider {0} declares no capabilities")]
    NoCapabilities(ProviderId),

    #[error("provider {0} has a zero timeout")]
    InvalidTimeout(ProviderId),

    #[error("provider {0} allows zero concurrent requests")]
    InvalidConcurrency(ProviderId),
}

/// A registered external capability endpoint
#[derive(Clone)]
pub struct Provider {
    pub id: ProviderId,
    pub capabilities: BTreeSet<String>,
    pub transport: Arc<dyn ProviderTransport>,
    pub timeout: Duration,
    pub max_concurrent_requests: usize,
    /// Freshness window for this provider's responses; `None` disables caching
    pub cache_ttl: Option<Duration>,
    /// Override of the global breaker settings
    pub breaker: Option<CircuitBreakerConfig>,
}

impl Provider {
    pub fn new(id: impl Into<ProviderId>, transport: Arc<dyn ProviderTransport>) -> Self {
        Self {
            id: id.into(),
            capabilities: BTreeSet::new(),
            transport,
            timeout: Duration::from_secs(30),
            max_concurrent_requests: 8,
            cache_ttl: None,
            breaker: None,
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities
            .extend(capabilities.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn with_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = Some(config);
        self
    }

    pub fn declares(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.id.as_str().trim().is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if self.capabilities.is_empty() {
            return Err(RegistryError::NoCapabilities(self.id.clone()));
        }
        if self.timeout.is_zero() {
            return Err(RegistryError::InvalidTimeout(self.id.clone()));
        }
        if self.max_concurrent_requests == 0 {
            return Err(RegistryError::InvalidConcurrency(self.id.clone()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("capabilities", &self.capabilities)
            .field("transport", &self.transport.describe())
            .field("timeout", &self.timeout)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("cache_ttl", &self.cache_ttl)
            .field("breaker", &self.breaker)
            .finish()
    }
}

/// Lookup of providers by id and by capability.
///
/// Registration order is priority order: the first provider declaring a
/// capability is its preferred candidate.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<Provider>>,
    by_id: HashMap<ProviderId, usize>,
    by_capability: HashMap<String, Vec<usize>>,
}

impl ProviderRegistry {
    /// Build a registry from providers listed in priority order
    pub fn new(providers: impl IntoIterator<Item = Provider>) -> Result<Self, RegistryError> {
        let mut registry = Self::default();

        for provider in providers {
            provider.validate()?;
            if registry.by_id.contains_key(&provider.id) {
                return Err(RegistryError::DuplicateProvider(provider.id));
            }

            let index = registry.providers.len();
            registry.by_id.insert(provider.id.clone(), index);
            for capability in &provider.capabilities {
                registry
                    .by_capability
                    .entry(capability.clone())
                    .or_default()
                    .push(index);
            }
            registry.providers.push(Arc::new(provider));
        }

        Ok(registry)
    }

    /// Providers declaring `capability`, in priority order. Empty when none do.
    pub fn providers_for(&self, capability: &str) -> Vec<Arc<Provider>> {
        self.by_capability
            .get(capability)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| self.providers[i].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Candidates for a request, with the preferred provider moved to the
    /// front when it declares the capability
    pub fn candidates(&self, capability: &str, preferred: Option<&ProviderId>) -> Vec<Arc<Provider>> {
        let mut candidates = self.providers_for(capability);

        if let Some(preferred) = preferred {
            if let Some(pos) = candidates.iter().position(|p| &p.id == preferred) {
                let provider = candidates.remove(pos);
                candidates.insert(0, provider);
            }
        }

        candidates
    }

    pub fn get(&self, id: &ProviderId) -> Option<Arc<Provider>> {
        self.by_id.get(id).map(|&i| self.providers[i].clone())
    }

    /// All providers in priority order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Provider>> {
        self.providers.iter()
    }

    /// Every capability declared by at least one provider
    pub fn capabilities(&self) -> BTreeSet<&str> {
        self.by_capability.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    fn provider(id: &str, capabilities: &[&str]) -> Provider {
        Provider::new(id, Arc::new(MockTransport::new(id)))
            .with_capabilities(capabilities.iter().copied())
    }

    fn ids(providers: &[Arc<Provider>]) -> Vec<&str> {
        providers.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn test_providers_for_keeps_priority_order() {
        let registry = ProviderRegistry::new(vec![
            provider("a", &["analyze"]),
            provider("b", &["analyze", "lookup"]),
            provider("c", &["lookup"]),
        ])
        .unwrap();

        assert_eq!(ids(&registry.providers_for("analyze")), vec!["a", "b"]);
        assert_eq!(ids(&registry.providers_for("lookup")), vec!["b", "c"]);
        assert!(registry.providers_for("visualize").is_empty());
    }

    #[test]
    fn test_get_by_id() {
        let registry = ProviderRegistry::new(vec![provider("a", &["analyze"])]).unwrap();

        assert_eq!(registry.get(&ProviderId::new("a")).unwrap().id.as_str(), "a");
        assert!(registry.get(&ProviderId::new("missing")).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_candidates_honor_preference() {
        let registry = ProviderRegistry::new(vec![
            provider("a", &["analyze"]),
            provider("b", &["analyze"]),
            provider("c", &["lookup"]),
        ])
        .unwrap();

        let preferred = ProviderId::new("b");
        assert_eq!(ids(&registry.candidates("analyze", Some(&preferred))), vec!["b", "a"]);

        // A preference that does not declare the capability is ignored
        let unrelated = ProviderId::new("c");
        assert_eq!(ids(&registry.candidates("analyze", Some(&unrelated))), vec!["a", "b"]);
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let result = ProviderRegistry::new(vec![
            provider("a", &["analyze"]),
            provider("a", &["lookup"]),
        ]);
        assert!(matches!(result, Err(RegistryError::DuplicateProvider(id)) if id.as_str() == "a"));
    }

    #[test]
    fn test_rejects_invalid_providers() {
        assert!(matches!(
            ProviderRegistry::new(vec![provider(" ", &["analyze"])]),
            Err(RegistryError::EmptyId)
        ));
        assert!(matches!(
            ProviderRegistry::new(vec![provider("a", &[])]),
            Err(RegistryError::NoCapabilities(_))
        ));
        assert!(matches!(
            ProviderRegistry::new(vec![provider("a", &["x"]).with_timeout(Duration::ZERO)]),
            Err(RegistryError::InvalidTimeout(_))
        ));
        assert!(matches!(
            ProviderRegistry::new(vec![provider("a", &["x"]).with_max_concurrent_requests(0)]),
            Err(RegistryError::InvalidConcurrency(_))
        ));
    }

    #[test]
    fn test_capabilities_listing() {
        let registry = ProviderRegistry::new(vec![
            provider("a", &["analyze", "lookup"]),
            provider("b", &["lookup"]),
        ])
        .unwrap();

        let capabilities: Vec<_> = registry.capabilities().into_iter().collect();
        assert_eq!(capabilities, vec!["analyze", "lookup"]);
    }
}
