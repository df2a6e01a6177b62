//! Chrome DevTools Protocol client over WebSocket.
//!
//! Correlates commands with responses by request id. The reader task clears
//! the `connected` flag when the socket closes, which is what the browser
//! liveness predicate observes.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};
use webbridge_core::{Error, Result};

const COMMAND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

pub struct CdpClient {
    ws_tx: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a CDP WebSocket endpoint (browser-level or page-level).
    pub async fn connect(ws_url: &str) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::Cdp(format!("connect to {}: {}", ws_url, e)))?;

        let (mut ws_sink, mut ws_read) = ws_stream.split();
        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        let writer_connected = connected.clone();
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    warn!("CDP write error: {}", e);
                    writer_connected.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_connected = connected.clone();
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if let Ok(val) = serde_json::from_str::<Value>(&text) {
                            if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                                let mut pending = reader_pending.lock().await;
                                if let Some(tx) = pending.remove(&id) {
                                    let _ = tx.send(val);
                                }
                            }
                            // Events are not dispatched; the bridge polls
                            // state lazily instead of watching the stream.
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP socket closed by peer");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
            // Fail anything still waiting for a response.
            let mut pending = reader_pending.lock().await;
            pending.clear();
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            connected,
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Whether the underlying socket is still open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send a CDP command and wait for its response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let msg = json!({ "id": id, "method": method, "params": params });

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| Error::Cdp(format!("send '{}': {}", method, e)))?;

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => {
                if let Some(error) = response.get("error") {
                    Err(Error::Cdp(format!("'{}' failed: {}", method, error)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Cdp(format!("'{}': connection closed", method))),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                Err(Error::Cdp(format!(
                    "'{}' timed out after {}s",
                    method,
                    COMMAND_TIMEOUT.as_secs()
                )))
            }
        }
    }

    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await?;
        Ok(())
    }

    /// Create an isolated browsing context, returning its id.
    pub async fn create_browser_context(&self) -> Result<String> {
        let result = self
            .send_command("Target.createBrowserContext", json!({}))
            .await?;
        result
            .get("browserContextId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Cdp("no browserContextId returned".to_string()))
    }

    /// Create a page target, optionally inside a browsing context.
    pub async fn create_target(&self, url: &str, context_id: Option<&str>) -> Result<String> {
        let mut params = json!({ "url": url });
        if let Some(ctx) = context_id {
            params["browserContextId"] = json!(ctx);
        }
        let result = self.send_command("Target.createTarget", params).await?;
        result
            .get("targetId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Cdp("no targetId returned".to_string()))
    }

    /// Evaluate a JavaScript expression in the page.
    pub async fn evaluate_expression(&self, expression: &str) -> Result<Value> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        Ok(unwrap_remote_value(result))
    }

    /// Call `function` in the page with `args` bound as its single argument.
    ///
    /// The argument travels as a CDP call argument, so no value ever gets
    /// spliced into the function source.
    pub async fn call_function(&self, function: &str, args: Value) -> Result<Value> {
        let global = self
            .send_command("Runtime.evaluate", json!({ "expression": "globalThis" }))
            .await?;
        let object_id = global
            .get("result")
            .and_then(|r| r.get("objectId"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Cdp("no global objectId".to_string()))?;

        let result = self
            .send_command(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": function,
                    "arguments": [{ "value": args }],
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        Ok(unwrap_remote_value(result))
    }

    /// Ask the browser to shut down. Used only by the external close path.
    pub async fn close_browser(&self) -> Result<()> {
        self.send_command("Browser.close", json!({})).await?;
        Ok(())
    }
}

/// Extract the value from a Runtime result, surfacing thrown exceptions.
fn unwrap_remote_value(result: Value) -> Value {
    if let Some(details) = result.get("exceptionDetails") {
        return json!({ "exception": details.get("text").cloned().unwrap_or(Value::Null) });
    }
    result
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null)
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}
