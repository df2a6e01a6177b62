//! Control-protocol client seam.
//!
//! The lifecycle manager resolves clients by a port-derived name so that
//! repeated ensures against one port converge on one registered client.
//! The production MCP implementation lives in [`mcp`].

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use webbridge_core::Result;

pub mod mcp;

const CLIENT_NAME_PREFIX: &str = "browser-";

/// Registry name for the client bound to `port`. Pure function of the port:
/// equal ports give equal names.
pub fn client_name(port: u16) -> String {
    format!("{}{}", CLIENT_NAME_PREFIX, port)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Connected,
    Disconnected,
}

/// How to start a protocol server process at registration time.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub command: String,
    pub args: Vec<String>,
}

/// One content block of a tool result.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Normalized tool-call result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolOutput {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

impl ToolOutput {
    /// Join the text blocks into one string; non-text blocks are skipped.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Liveness predicate for the control connection.
    fn status(&self) -> ClientStatus;

    /// Establish (or re-establish) the control connection.
    async fn connect(&self) -> Result<()>;

    /// Issue a remote command by name with structured arguments.
    async fn call_tool(&self, tool: &str, args: Value) -> Result<ToolOutput>;
}

#[async_trait]
pub trait ProtocolRegistry: Send + Sync {
    async fn get(&self, name: &str) -> Option<Arc<dyn ProtocolClient>>;

    /// Register a client under `name`. Registering an already-known name is
    /// a no-op; the first registration wins.
    async fn register(&self, name: &str, spec: ServerSpec) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_name_is_pure_in_port() {
        assert_eq!(client_name(54213), client_name(54213));
        assert_eq!(client_name(54213), "browser-54213");
        assert_ne!(client_name(54213), client_name(54214));
    }

    #[test]
    fn test_tool_output_text_joins_text_blocks() {
        let out: ToolOutput = serde_json::from_value(serde_json::json!({
            "content": [
                {"type": "text", "text": "clicked"},
                {"type": "image", "data": "..."},
                {"type": "text", "text": "at 10,20"}
            ]
        }))
        .unwrap();
        assert_eq!(out.text(), "clicked\nat 10,20");
    }

    #[test]
    fn test_tool_output_missing_content_is_empty() {
        let out: ToolOutput = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(out.content.is_empty());
        assert_eq!(out.text(), "");
    }
}
