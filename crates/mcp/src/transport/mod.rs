//! MCP provider transports and the descriptors that configure them.

pub mod http;
pub mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

use conduit_core::ProviderTransport;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Errors raised while turning a descriptor into a transport
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported URL scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("stdio command must not be empty")]
    EmptyCommand,

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Capability name to MCP tool name. Unmapped capabilities use their own name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolMap(HashMap<String, String>);

impl ToolMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: impl Into<String>, tool: impl Into<String>) -> Self {
        self.0.insert(capability.into(), tool.into());
        self
    }

    pub fn resolve<'a>(&'a self, capability: &'a str) -> &'a str {
        self.0.get(capability).map(String::as_str).unwrap_or(capability)
    }
}

/// Spawn an MCP server as a child process and talk over its stdio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StdioConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub tools: ToolMap,
}

/// POST JSON-RPC to an MCP HTTP endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub tools: ToolMap,
}

/// Connection descriptor for one provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    Stdio(StdioConfig),
    Http(HttpConfig),
}

impl TransportConfig {
    pub fn build(&self) -> Result<Arc<dyn ProviderTransport>, BuildError> {
        match self {
            Self::Stdio(config) => Ok(Arc::new(StdioTransport::new(config.clone())?)),
            Self::Http(config) => Ok(Arc::new(HttpTransport::new(config.clone())?)),
        }
    }
}
