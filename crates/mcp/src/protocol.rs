// MCP protocol types (JSON-RPC 2.0), client side

use conduit_core::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: impl Into<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: impl Into<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Unwrap the result, mapping a JSON-RPC error to a provider rejection
    pub fn into_result(self) -> Result<Value, TransportError> {
        if let Some(error) = self.error {
            return Err(TransportError::Rejected(format!(
                "{} (code {})",
                error.message, error.code
            )));
        }
        self.result.ok_or_else(|| {
            TransportError::Malformed("response carried neither result nor error".to_string())
        })
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {}", method),
            data: None,
        }
    }
}

// MCP-specific protocol messages

/// Call tool request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    pub arguments: Value,
}

/// Call tool response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(rename = "structuredContent", skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl CallToolResult {
    /// Text content blocks joined by newlines
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ToolContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Convert into the payload handed back to the orchestration layer.
    ///
    /// Tool-level errors become rejections. Structured content wins over text.
    pub fn into_payload(self) -> Result<Value, TransportError> {
        if self.is_error == Some(true) {
            let text = self.text();
            let message = if text.is_empty() {
                "tool reported an error".to_string()
            } else {
                text
            };
            return Err(TransportError::Rejected(message));
        }

        match self.structured_content {
            Some(structured) => Ok(structured),
            None => Ok(serde_json::json!({ "text": self.text() })),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(rename = "resource")]
    Resource { resource: Value },
    /// Content types this client does not interpret
    #[serde(other)]
    Other,
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Initialize request params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

impl InitializeParams {
    pub fn conduit() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "conduit".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub experimental: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub sampling: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Initialize response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Decode a `tools/call` response into a payload
pub fn decode_tool_response(response: JsonRpcResponse) -> Result<Value, TransportError> {
    let result = response.into_result()?;
    let result: CallToolResult = serde_json::from_value(result)
        .map_err(|e| TransportError::Malformed(format!("invalid tools/call result: {}", e)))?;
    result.into_payload()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest::new(7, "tools/call", json!({"name": "x"}));
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "tools/call");

        let note = JsonRpcRequest::notification("notifications/initialized", None);
        let value = serde_json::to_value(&note).unwrap();
        assert!(value.get("id").is_none());
        assert!(value.get("params").is_none());
    }

    #[test]
    fn test_structured_content_preferred() {
        let response = JsonRpcResponse::success(
            1,
            json!({
                "content": [{"type": "text", "text": "ignored"}],
                "structuredContent": {"score": 0.9}
            }),
        );
        assert_eq!(decode_tool_response(response).unwrap(), json!({"score": 0.9}));
    }

    #[test]
    fn test_text_content_joined() {
        let response = JsonRpcResponse::success(
            1,
            json!({
                "content": [
                    {"type": "text", "text": "first"},
                    {"type": "image", "data": "aGk=", "mimeType": "image/png"},
                    {"type": "text", "text": "second"}
                ]
            }),
        );
        assert_eq!(
            decode_tool_response(response).unwrap(),
            json!({"text": "first\nsecond"})
        );
    }

    #[test]
    fn test_unknown_content_type_tolerated() {
        let response = JsonRpcResponse::success(
            1,
            json!({"content": [{"type": "audio", "data": "..."}, {"type": "text", "text": "ok"}]}),
        );
        assert_eq!(decode_tool_response(response).unwrap(), json!({"text": "ok"}));
    }

    #[test]
    fn test_tool_error_is_rejection() {
        let response = JsonRpcResponse::success(
            1,
            json!({"content": [{"type": "text", "text": "bad input"}], "isError": true}),
        );
        assert_eq!(
            decode_tool_response(response),
            Err(TransportError::Rejected("bad input".to_string()))
        );
    }

    #[test]
    fn test_rpc_error_is_rejection() {
        let response = JsonRpcResponse::error(1, JsonRpcError::method_not_found("tools/call"));
        assert!(matches!(
            decode_tool_response(response),
            Err(TransportError::Rejected(msg)) if msg.contains("-32601")
        ));
    }

    #[test]
    fn test_missing_result_is_malformed() {
        let response = JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id: json!(1),
            result: None,
            error: None,
        };
        assert!(matches!(
            decode_tool_response(response),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn test_non_object_result_is_malformed() {
        let response = JsonRpcResponse::success(1, json!("just a string"));
        assert!(matches!(
            decode_tool_response(response),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn test_initialize_params_shape() {
        let value = serde_json::to_value(InitializeParams::conduit()).unwrap();
        assert_eq!(value["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(value["clientInfo"]["name"], "conduit");
        assert_eq!(value["capabilities"], json!({}));
    }
}
