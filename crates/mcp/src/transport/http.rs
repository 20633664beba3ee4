//! HTTP transport for MCP servers.
//!
//! Each call is a JSON-RPC POST. The first call (or `connect`) runs the
//! `initialize` handshake and keeps any `mcp-session-id` the server hands
//! out; a 404 on a session-bound call drops the session, re-initializes and
//! retries the call once.

use crate::protocol::{
    decode_tool_response, CallToolParams, InitializeParams, InitializeResult, JsonRpcRequest,
    JsonRpcResponse,
};
use crate::transport::{BuildError, HttpConfig, ToolMap};
use conduit_core::{ProviderTransport, TransportError};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Debug, Clone)]
struct Session {
    id: Option<String>,
}

/// MCP client over HTTP POST
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    url: Url,
    tools: ToolMap,
    next_id: AtomicU64,
    session: Mutex<Option<Session>>,
}

impl HttpTransport {
    pub fn new(config: HttpConfig) -> Result<Self, BuildError> {
        let url = Url::parse(&config.url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(BuildError::UnsupportedScheme(url.scheme().to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        for (name, value) in &config.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| BuildError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| BuildError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            headers.insert(header_name, header_value);
        }

        let client = Client::builder()
            .user_agent(concat!("conduit/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            url,
            tools: config.tools,
            next_id: AtomicU64::new(1),
            session: Mutex::new(None),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Current session, running the handshake if there is none
    async fn session(&self) -> Result<Session, TransportError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }

        let session = self.initialize().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn initialize(&self) -> Result<Session, TransportError> {
        let id = self.next_id();
        let params = serde_json::to_value(InitializeParams::conduit())
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        let request = JsonRpcRequest::new(id, "initialize", params);

        let response = self.post(&request, None).await?;
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let result = read_response(response, id).await?.into_result()?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| TransportError::Malformed(format!("invalid initialize result: {}", e)))?;
        debug!(
            endpoint = %self.url,
            protocol_version = %init.protocol_version,
            server = init.server_info.as_ref().map(|s| s.name.as_str()).unwrap_or("unknown"),
            "MCP session initialized"
        );

        let initialized = JsonRpcRequest::notification("notifications/initialized", None);
        self.post(&initialized, session_id.as_deref()).await?;

        Ok(Session { id: session_id })
    }

    /// POST one message and map HTTP failures to transport errors
    async fn post(
        &self,
        message: &JsonRpcRequest,
        session_id: Option<&str>,
    ) -> Result<reqwest::Response, TransportError> {
        check_status(self.send(message, session_id).await?).await
    }

    async fn send(
        &self,
        message: &JsonRpcRequest,
        session_id: Option<&str>,
    ) -> Result<reqwest::Response, TransportError> {
        let mut request = self.client.post(self.url.clone()).json(message);
        if let Some(session_id) = session_id {
            request = request.header(SESSION_HEADER, session_id);
        }

        request
            .send()
            .await
            .map_err(|e| TransportError::Connection(format!("HTTP request failed: {}", e)))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
    if status.is_client_error() {
        Err(TransportError::Rejected(message))
    } else {
        Err(TransportError::Connection(message))
    }
}

/// Read the JSON-RPC response with the given id from a JSON or SSE body
async fn read_response(response: reqwest::Response, id: u64) -> Result<JsonRpcResponse, TransportError> {
    let is_event_stream = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream"));

    let body = response
        .text()
        .await
        .map_err(|e| TransportError::Connection(format!("failed to read response body: {}", e)))?;

    let parsed = if is_event_stream {
        parse_event_stream(&body, id)?
    } else {
        serde_json::from_str::<JsonRpcResponse>(&body)
            .map_err(|e| TransportError::Malformed(format!("invalid JSON-RPC response: {}", e)))?
    };

    if parsed.id.as_u64() != Some(id) {
        return Err(TransportError::Malformed(format!(
            "response id {} does not match request id {}",
            parsed.id, id
        )));
    }
    Ok(parsed)
}

/// Find the response for `id` among the `data:` events of an SSE body
fn parse_event_stream(body: &str, id: u64) -> Result<JsonRpcResponse, TransportError> {
    let mut data = String::new();

    for line in body.lines().chain(std::iter::once("")) {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
        } else if line.trim().is_empty() && !data.is_empty() {
            if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&data) {
                if response.id.as_u64() == Some(id) {
                    return Ok(response);
                }
            }
            data.clear();
        }
    }

    Err(TransportError::Malformed(format!(
        "event stream carried no response for request {}",
        id
    )))
}

#[async_trait::async_trait]
impl ProviderTransport for HttpTransport {
    async fn call(&self, capability: &str, payload: &Value) -> Result<Value, TransportError> {
        let params = CallToolParams {
            name: self.tools.resolve(capability).to_string(),
            arguments: payload.clone(),
        };
        let params =
            serde_json::to_value(params).map_err(|e| TransportError::Malformed(e.to_string()))?;

        let mut renewed = false;
        loop {
            let session = self.session().await?;
            let id = self.next_id();
            let request = JsonRpcRequest::new(id, "tools/call", params.clone());

            let response = self.send(&request, session.id.as_deref()).await?;
            if response.status() == StatusCode::NOT_FOUND && session.id.is_some() {
                // Session expired server-side; start a new one and retry once
                *self.session.lock().await = None;
                if !renewed {
                    renewed = true;
                    debug!(endpoint = %self.url, "MCP session expired, re-initializing");
                    continue;
                }
            }

            let response = check_status(response).await?;
            return decode_tool_response(read_response(response, id).await?);
        }
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.session().await.map(|_| ())
    }

    async fn shutdown(&self) {
        let session = self.session.lock().await.take();
        if let Some(Session { id: Some(session_id) }) = session {
            let result = self
                .client
                .delete(self.url.clone())
                .header(SESSION_HEADER, session_id)
                .send()
                .await;
            if let Err(e) = result {
                warn!(endpoint = %self.url, error = %e, "Failed to close MCP session");
            }
        }
    }

    fn describe(&self) -> String {
        format!("http:{}", self.url)
    }
}
