// Provider transport seam
//
// Concrete transports (MCP stdio, MCP HTTP, in-memory mocks) implement this
// trait; the orchestration layer never sees their connection details.

use serde_json::Value;

/// Transport-level failure reported by a provider connection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Could not reach the provider, or the connection dropped mid-call
    #[error("connection failure: {0}")]
    Connection(String),

    /// The provider answered with a well-formed rejection
    #[error("provider rejected request: {0}")]
    Rejected(String),

    /// The provider answered with data that could not be decoded
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// A connection to one external capability provider
#[async_trait::async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Invoke a capability with the given payload
    async fn call(&self, capability: &str, payload: &Value) -> Result<Value, TransportError>;

    /// Establish the connection ahead of the first call
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Release the connection
    async fn shutdown(&self) {}

    /// Human-readable endpoint for logs and health output
    fn describe(&self) -> String;
}
