use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Unique identifier for a registered provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Why a request did not produce a live payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Provider did not answer within its configured bound
    Timeout,
    /// Connection-level failure talking to the provider
    TransportFailure,
    /// Provider answered with a well-formed rejection
    ProviderRejected,
    /// Provider answered with data that could not be decoded
    MalformedResponse,
    /// Provider is at its concurrency limit
    ProviderBusy,
    /// No registered provider declares the capability
    NoProviderAvailable,
    /// Every candidate was breaker-blocked or failed
    AllProvidersUnavailable,
    /// The caller's deadline passed before a provider answered
    DeadlineExceeded,
}

impl ErrorKind {
    /// Whether this outcome counts against the provider's circuit breaker
    pub fn is_breaker_failure(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::TransportFailure | Self::ProviderRejected | Self::MalformedResponse
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::TransportFailure => "transport_failure",
            Self::ProviderRejected => "provider_rejected",
            Self::MalformedResponse => "malformed_response",
            Self::ProviderBusy => "provider_busy",
            Self::NoProviderAvailable => "no_provider_available",
            Self::AllProvidersUnavailable => "all_providers_unavailable",
            Self::DeadlineExceeded => "deadline_exceeded",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A caller's capability invocation
#[derive(Debug, Clone)]
pub struct Request {
    /// Capability name, treated as an opaque registry key
    pub capability: String,
    /// Provider to try first, if it declares the capability
    pub provider: Option<ProviderId>,
    pub payload: serde_json::Value,
    /// Opaque caller identity, used for logging only
    pub caller: Option<String>,
    pub deadline: Option<Instant>,
}

impl Request {
    pub fn new(capability: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            capability: capability.into(),
            provider: None,
            payload,
            caller: None,
            deadline: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<ProviderId>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the deadline relative to now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Time left before the deadline. `None` means the request is unbounded.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}

impl From<String> for ProviderId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Outcome of a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    /// Present iff `success`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Present iff not `success`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Provider that produced the payload, including the original provider of a cache hit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    #[serde(rename = "latency_ms", with = "duration_ms")]
    pub latency: Duration,
    pub degraded: bool,
    /// Served from the response cache rather than a live call
    #[serde(default)]
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    pub fn success(provider: ProviderId, payload: serde_json::Value, latency: Duration) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error_kind: None,
            provider: Some(provider),
            latency,
            degraded: false,
            cached: false,
            message: None,
        }
    }

    pub fn failure(error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            error_kind: Some(error_kind),
            provider: None,
            latency: Duration::ZERO,
            degraded: false,
            cached: false,
            message: Some(message.into()),
        }
    }

    pub fn with_provider(mut self, provider: ProviderId) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
