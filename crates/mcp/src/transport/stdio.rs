//! Stdio transport: an MCP server running as a child process.
//!
//! Messages are newline-delimited JSON. A reader task routes responses to
//! waiting callers by request id and answers the server's own `ping`
//! requests. The process is spawned on first use and respawned after it
//! exits.

use crate::protocol::{
    decode_tool_response, CallToolParams, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse,
};
use crate::transport::{BuildError, StdioConfig};
use conduit_core::{ProviderTransport, TransportError};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

/// Longest line accepted from a server (16 MiB)
const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

type Responder = oneshot::Sender<Result<JsonRpcResponse, TransportError>>;
type PendingMap = Arc<SyncMutex<HashMap<u64, Responder>>>;
type Writer = Arc<Mutex<FramedWrite<ChildStdin, LinesCodec>>>;

/// MCP client over a child process's stdin/stdout
pub struct StdioTransport {
    config: StdioConfig,
    session: Mutex<Option<Arc<Session>>>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("command", &self.config.command)
            .field("args", &self.config.args)
            .finish_non_exhaustive()
    }
}

impl StdioTransport {
    pub fn new(config: StdioConfig) -> Result<Self, BuildError> {
        if config.command.trim().is_empty() {
            return Err(BuildError::EmptyCommand);
        }
        Ok(Self {
            config,
            session: Mutex::new(None),
        })
    }

    /// Live session, spawning and initializing the server if needed
    async fn session(&self) -> Result<Arc<Session>, TransportError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            if session.is_alive() {
                return Ok(session.clone());
            }
            debug!(command = %self.config.command, "MCP server exited, respawning");
        }
        *guard = None;

        let session = Arc::new(Session::spawn(&self.config)?);
        session.initialize().await?;
        *guard = Some(session.clone());
        Ok(session)
    }
}

#[async_trait::async_trait]
impl ProviderTransport for StdioTransport {
    async fn call(&self, capability: &str, payload: &Value) -> Result<Value, TransportError> {
        let session = self.session().await?;
        let params = CallToolParams {
            name: self.config.tools.resolve(capability).to_string(),
            arguments: payload.clone(),
        };
        let params =
            serde_json::to_value(params).map_err(|e| TransportError::Malformed(e.to_string()))?;

        decode_tool_response(session.request("tools/call", params).await?)
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.session().await.map(|_| ())
    }

    async fn shutdown(&self) {
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.close().await;
        }
    }

    fn describe(&self) -> String {
        let mut description = format!("stdio:{}", self.config.command);
        for arg in &self.config.args {
            description.push(' ');
            description.push_str(arg);
        }
        description
    }
}

/// One running server process
struct Session {
    command: String,
    child: Mutex<Child>,
    writer: Writer,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    next_id: AtomicU64,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    fn spawn(config: &StdioConfig) -> Result<Self, TransportError> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TransportError::Connection(format!("failed to spawn '{}': {}", config.command, e))
            })?;

        let missing = || TransportError::Connection("child process pipes unavailable".to_string());
        let stdin = child.stdin.take().ok_or_else(missing)?;
        let stdout = child.stdout.take().ok_or_else(missing)?;
        let stderr = child.stderr.take();

        let writer: Writer = Arc::new(Mutex::new(FramedWrite::new(
            stdin,
            LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        )));
        let pending: PendingMap = Arc::new(SyncMutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let mut tasks = vec![tokio::spawn(read_loop(
            config.command.clone(),
            FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
            writer.clone(),
            pending.clone(),
            alive.clone(),
        ))];

        if let Some(stderr) = stderr {
            let command = config.command.clone();
            tasks.push(tokio::spawn(async move {
                let lines =
                    FramedRead::new(stderr, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
                drain_stderr(&command, lines).await;
            }));
        }

        debug!(command = %config.command, pid = ?child.id(), "Spawned MCP server");

        Ok(Self {
            command: config.command.clone(),
            child: Mutex::new(child),
            writer,
            pending,
            alive,
            next_id: AtomicU64::new(1),
            tasks,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn initialize(&self) -> Result<(), TransportError> {
        let params = serde_json::to_value(InitializeParams::conduit())
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        let result = self.request("initialize", params).await?.into_result()?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| TransportError::Malformed(format!("invalid initialize result: {}", e)))?;

        debug!(
            command = %self.command,
            protocol_version = %init.protocol_version,
            server = init.server_info.as_ref().map(|s| s.name.as_str()).unwrap_or("unknown"),
            "MCP session initialized"
        );

        write_message(
            &self.writer,
            &JsonRpcRequest::notification("notifications/initialized", None),
        )
        .await
    }

    /// Send a request and wait for the response with the same id
    async fn request(&self, method: &str, params: Value) -> Result<JsonRpcResponse, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _pending = PendingGuard {
            pending: &self.pending,
            id,
        };

        write_message(&self.writer, &JsonRpcRequest::new(id, method, params)).await?;

        rx.await.map_err(|_| {
            TransportError::Connection(format!("MCP server '{}' went away", self.command))
        })?
    }

    async fn close(&self) {
        for task in &self.tasks {
            task.abort();
        }
        self.alive.store(false, Ordering::Release);
        if let Err(e) = self.child.lock().await.kill().await {
            debug!(command = %self.command, error = %e, "MCP server already stopped");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Removes a pending entry when its caller stops waiting
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

async fn write_message<T: serde::Serialize>(writer: &Writer, message: &T) -> Result<(), TransportError> {
    let line =
        serde_json::to_string(message).map_err(|e| TransportError::Malformed(e.to_string()))?;
    writer
        .lock()
        .await
        .send(line)
        .await
        .map_err(|e| TransportError::Connection(format!("failed to write to MCP server: {}", e)))
}

async fn read_loop(
    command: String,
    mut lines: FramedRead<ChildStdout, LinesCodec>,
    writer: Writer,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
) {
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(command = %command, error = %e, "Failed to read from MCP server");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(_) => {
                debug!(command = %command, line = %line, "Ignoring non-JSON output");
                continue;
            }
        };

        if let Some(method) = message.get("method").and_then(Value::as_str) {
            handle_server_message(&command, method, message.get("id"), &writer).await;
            continue;
        }

        match serde_json::from_value::<JsonRpcResponse>(message) {
            Ok(response) => {
                let waiter = response.id.as_u64().and_then(|id| pending.lock().remove(&id));
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Ok(response));
                    }
                    None => debug!(command = %command, id = %response.id, "Response for unknown request"),
                }
            }
            Err(e) => warn!(command = %command, error = %e, "Malformed JSON-RPC message"),
        }
    }

    alive.store(false, Ordering::Release);
    let waiters: Vec<Responder> = pending.lock().drain().map(|(_, tx)| tx).collect();
    for tx in waiters {
        let _ = tx.send(Err(TransportError::Connection(format!(
            "MCP server '{}' closed its output",
            command
        ))));
    }
    debug!(command = %command, "MCP server output closed");
}

/// Forward server stderr to the log until the pipe closes, returning the
/// number of lines forwarded.
///
/// Overlong lines are discarded and reading continues, so the child never
/// blocks on a full stderr pipe.
async fn drain_stderr<R>(command: &str, mut lines: FramedRead<R, LinesCodec>) -> usize
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut forwarded = 0;
    let mut overflowed = false;

    loop {
        match lines.next().await {
            Some(Ok(line)) => {
                overflowed = false;
                forwarded += 1;
                debug!(command = %command, "{}", line);
            }
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                overflowed = true;
                debug!(command = %command, "Discarded overlong stderr line");
            }
            Some(Err(LinesCodecError::Io(e))) => {
                debug!(command = %command, error = %e, "Stopped reading MCP server stderr");
                break;
            }
            // The stream pauses once after a decode error, then resumes
            None if overflowed => overflowed = false,
            None => break,
        }
    }

    forwarded
}

/// Requests and notifications initiated by the server
async fn handle_server_message(command: &str, method: &str, id: Option<&Value>, writer: &Writer) {
    let Some(id) = id.filter(|id| !id.is_null()) else {
        debug!(command = %command, method = %method, "Server notification");
        return;
    };

    let reply = if method == "ping" {
        JsonRpcResponse::success(id.clone(), json!({}))
    } else {
        JsonRpcResponse::error(id.clone(), JsonRpcError::method_not_found(method))
    };

    if let Err(e) = write_message(writer, &reply).await {
        warn!(command = %command, method = %method, error = %e, "Failed to answer server request");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::transport::ToolMap;

    fn shell(script: &str) -> StdioTransport {
        StdioTransport::new(StdioConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: HashMap::new(),
            tools: ToolMap::new().with("analyze", "think"),
        })
        .unwrap()
    }

    const INIT_REPLY: &str = r#"echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"fake","version":"0"}}}'"#;

    #[tokio::test]
    async fn test_call_over_stdio() {
        let script = format!(
            r#"read -r init
{INIT_REPLY}
read -r initialized
read -r call
case "$call" in
  *'"name":"think"'*) echo '{{"jsonrpc":"2.0","id":2,"result":{{"content":[{{"type":"text","text":"hello"}}]}}}}' ;;
  *) echo '{{"jsonrpc":"2.0","id":2,"result":{{"content":[],"isError":true}}}}' ;;
esac
read -r done"#
        );
        let transport = shell(&script);

        let result = transport
            .call("analyze", &json!({"topic": "x"}))
            .await
            .unwrap();
        assert_eq!(result, json!({"text": "hello"}));

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn test_server_ping_is_answered() {
        let script = format!(
            r#"read -r init
{INIT_REPLY}
read -r initialized
read -r call
echo '{{"jsonrpc":"2.0","id":"srv-1","method":"ping"}}'
read -r pong
case "$pong" in
  *'"id":"srv-1","result":{{}}'*) echo '{{"jsonrpc":"2.0","id":2,"result":{{"structuredContent":{{"pong":true}}}}}}' ;;
  *) echo '{{"jsonrpc":"2.0","id":2,"result":{{"structuredContent":{{"pong":false}}}}}}' ;;
esac
read -r done"#
        );
        let transport = shell(&script);

        let result = transport.call("analyze", &json!({})).await.unwrap();
        assert_eq!(result, json!({"pong": true}));

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn test_server_exit_fails_pending_call() {
        let transport = shell("read -r init; exit 0");

        let result = transport.call("analyze", &json!({})).await;
        assert!(matches!(result, Err(TransportError::Connection(_))));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_connection_error() {
        let transport = StdioTransport::new(StdioConfig {
            command: "/nonexistent/conduit-test-server".to_string(),
            args: vec![],
            env: HashMap::new(),
            tools: ToolMap::new(),
        })
        .unwrap();

        assert!(matches!(
            transport.connect().await,
            Err(TransportError::Connection(msg)) if msg.contains("failed to spawn")
        ));
    }

    #[tokio::test]
    async fn test_stderr_drain_survives_overlong_line() {
        let output = format!("starting\n{}\nready\n", "x".repeat(64));
        let lines = FramedRead::new(output.as_bytes(), LinesCodec::new_with_max_length(16));

        assert_eq!(drain_stderr("fake", lines).await, 2);
    }

    #[test]
    fn test_describe() {
        let transport = StdioTransport::new(StdioConfig {
            command: "npx".to_string(),
            args: vec!["-y".to_string(), "server-thinking".to_string()],
            env: HashMap::new(),
            tools: ToolMap::new(),
        })
        .unwrap();

        assert_eq!(transport.describe(), "stdio:npx -y server-thinking");
    }
}
