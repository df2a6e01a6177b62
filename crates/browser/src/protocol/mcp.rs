//! MCP protocol client over stdio.
//!
//! Registration spawns the server process and wires the JSON-RPC plumbing;
//! `connect` performs the initialize handshake. The reader task clears the
//! `connected` flag when the server's stdout closes, which is what the
//! client liveness predicate observes.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};
use webbridge_core::{Error, Result};

use super::{ClientStatus, ProtocolClient, ProtocolRegistry, ServerSpec, ToolOutput};

const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<u64>,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<std::result::Result<Value, String>>>>>;

pub struct McpClient {
    name: String,
    stdin: Arc<Mutex<ChildStdin>>,
    next_id: AtomicU64,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
    _child: Mutex<Child>,
}

impl McpClient {
    /// Spawn the server process and wire the response reader. The client is
    /// Disconnected until [`ProtocolClient::connect`] completes a handshake.
    pub async fn spawn(name: &str, spec: &ServerSpec) -> Result<Self> {
        let mut child = Command::new(&spec.command)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::ClientInit(format!("{}: spawn '{}': {}", name, spec.command, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::ClientInit(format!("{}: no stdin", name)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::ClientInit(format!("{}: no stdout", name)))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::reader_task(
            stdout,
            pending.clone(),
            connected.clone(),
            name.to_string(),
        ));

        Ok(Self {
            name: name.to_string(),
            stdin: Arc::new(Mutex::new(stdin)),
            next_id: AtomicU64::new(1),
            pending,
            connected,
            _child: Mutex::new(child),
        })
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method: method.to_string(),
            params,
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut map = self.pending.lock().await;
            map.insert(id, tx);
        }

        let line = serde_json::to_string(&req)?;
        debug!(client = %self.name, id, method, "→ request");
        self.write_line(&line).await?;

        rx.await
            .map_err(|_| Error::Protocol(format!("{}: server closed", self.name)))?
            .map_err(|e| Error::Protocol(format!("{}: {}", self.name, e)))
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Protocol(format!("{}: write: {}", self.name, e)))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| Error::Protocol(format!("{}: write: {}", self.name, e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Protocol(format!("{}: flush: {}", self.name, e)))?;
        Ok(())
    }

    /// Dispatch newline-delimited JSON-RPC responses to waiting callers.
    async fn reader_task(
        stdout: ChildStdout,
        pending: PendingMap,
        connected: Arc<AtomicBool>,
        name: String,
    ) {
        let reader = BufReader::new(stdout);
        let mut lines = reader.lines();

        loop {
            match lines.next_line().await {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    match serde_json::from_str::<JsonRpcResponse>(&line) {
                        Ok(resp) => {
                            if let Some(id) = resp.id {
                                let mut map = pending.lock().await;
                                if let Some(tx) = map.remove(&id) {
                                    let payload = if let Some(err) = resp.error {
                                        Err(format!("JSON-RPC error {}: {}", err.code, err.message))
                                    } else {
                                        Ok(resp.result.unwrap_or(Value::Null))
                                    };
                                    let _ = tx.send(payload);
                                }
                            }
                            // Notifications (no id) are ignored.
                        }
                        Err(e) => {
                            warn!(client = %name, "unparseable response: {}", e);
                        }
                    }
                }
                Ok(Some(_)) => {} // blank line
                Ok(None) => {
                    error!(client = %name, "stdout closed");
                    break;
                }
                Err(e) => {
                    error!(client = %name, "read error: {}", e);
                    break;
                }
            }
        }

        connected.store(false, Ordering::SeqCst);
        let mut map = pending.lock().await;
        for (_, tx) in map.drain() {
            let _ = tx.send(Err("server stdout closed".to_string()));
        }
    }
}

#[async_trait]
impl ProtocolClient for McpClient {
    fn status(&self) -> ClientStatus {
        if self.connected.load(Ordering::SeqCst) {
            ClientStatus::Connected
        } else {
            ClientStatus::Disconnected
        }
    }

    async fn connect(&self) -> Result<()> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "webbridge", "version": env!("CARGO_PKG_VERSION") }
        });
        let result = self
            .request("initialize", Some(params))
            .await
            .map_err(|e| Error::ClientInit(e.to_string()))?;
        debug!(client = %self.name, ?result, "initialized");

        // Fire-and-forget per the handshake: no id, no response expected.
        let notif = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });
        self.write_line(&notif.to_string())
            .await
            .map_err(|e| Error::ClientInit(e.to_string()))?;

        self.connected.store(true, Ordering::SeqCst);
        info!(client = %self.name, "protocol client connected");
        Ok(())
    }

    async fn call_tool(&self, tool: &str, args: Value) -> Result<ToolOutput> {
        let params = serde_json::json!({ "name": tool, "arguments": args });
        let result = self.request("tools/call", Some(params)).await?;

        if result.get("isError").and_then(|v| v.as_bool()) == Some(true) {
            let msg = result
                .get("content")
                .and_then(|c| c.as_array())
                .and_then(|arr| arr.first())
                .and_then(|item| item.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or("tool returned an error");
            return Err(Error::Protocol(format!("{}: {}: {}", self.name, tool, msg)));
        }

        let output: ToolOutput = serde_json::from_value(result)?;
        Ok(output)
    }
}

/// In-memory name → client map. One process per distinct name; the first
/// registration wins.
#[derive(Default)]
pub struct McpRegistry {
    clients: Mutex<HashMap<String, Arc<McpClient>>>,
}

impl McpRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProtocolRegistry for McpRegistry {
    async fn get(&self, name: &str) -> Option<Arc<dyn ProtocolClient>> {
        let map = self.clients.lock().await;
        map.get(name).map(|c| c.clone() as Arc<dyn ProtocolClient>)
    }

    async fn register(&self, name: &str, spec: ServerSpec) -> Result<()> {
        let mut map = self.clients.lock().await;
        if map.contains_key(name) {
            debug!(name, "client already registered");
            return Ok(());
        }
        info!(name, command = %spec.command, "registering protocol client");
        let client = McpClient::spawn(name, &spec).await?;
        map.insert(name.to_string(), Arc::new(client));
        Ok(())
    }
}
