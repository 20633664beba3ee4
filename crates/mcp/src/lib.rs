// MCP (Model Context Protocol) client transports
// Connects the orchestration layer to MCP servers over stdio or HTTP

pub mod protocol;
pub mod transport;

pub use transport::{
    BuildError, HttpConfig, HttpTransport, StdioConfig, StdioTransport, ToolMap, TransportConfig,
};
