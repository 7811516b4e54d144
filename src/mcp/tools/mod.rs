//! MCP Tools module - tool trait, execution context and result types
//!
//! Tools fall into three groups: `bridge` tools called by the editor plugin,
//! `scene` tools that read the plugin's snapshot, and `commands` that push
//! work to the plugin through the command broker.
pub mod bridge;
pub mod commands;
pub mod registry;
pub mod scene;

// Re-export core tool types
pub use self::registry::{ToolInfo, ToolRegistry};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use crate::mcp::{
    broker::CommandBroker,
    errors::{ErrorKind, ToolError},
    snapshot::SnapshotStore,
};

/// Core trait that all MCP tools must implement
#[async_trait]
pub trait MCPTool: Send + Sync {
    /// Get the tool name (unique identifier)
    fn name(&self) -> &str;

    /// Get the tool description for documentation
    fn description(&self) -> &str;

    /// Get the JSON schema for input parameters
    fn input_schema(&self) -> Value;

    /// Execute the tool with already-validated parameters
    async fn execute(
        &self,
        params: Value,
        context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError>;

    /// Outcome when arguments fail schema validation
    fn reject_arguments(
        &self,
        message: String,
        _context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        Err(ToolError::InvalidParams(message))
    }
}

/// Identity of the caller as seen by the bridge tools
#[derive(Debug, Clone, Default)]
pub struct BridgeContext {
    pub session_id: Option<String>,
    pub initialized: bool,
}

impl BridgeContext {
    /// The session id, but only for a session that completed initialization
    pub fn ready_session(&self) -> Option<&str> {
        match (&self.session_id, self.initialized) {
            (Some(id), true) if !id.is_empty() => Some(id),
            _ => None,
        }
    }
}

/// Everything a tool may touch while executing
#[derive(Clone)]
pub struct ExecutionContext {
    pub bridge: BridgeContext,
    pub snapshots: Arc<SnapshotStore>,
    pub broker: Arc<CommandBroker>,
    /// Default wait for broker-backed commands
    pub command_timeout: Duration,
}

/// Tool execution result, serialized as the `tools/call` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "structuredContent", skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

/// Content types that tools can return
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Content {
    /// Plain text content
    #[serde(rename = "text")]
    Text { text: String },
}

impl ToolResult {
    /// Successful result carrying `value` both as text and structured content
    pub fn success(value: Value) -> Self {
        let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
        Self {
            content: vec![Content::Text { text }],
            structured_content: Some(value),
            is_error: false,
        }
    }

    /// Tool-level failure the client can branch on via `error.kind`
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            content: vec![Content::Text {
                text: message.clone(),
            }],
            structured_content: Some(json!({
                "error": { "kind": kind, "message": message }
            })),
            is_error: true,
        }
    }

    /// The `kind` of a failure result
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.structured_content
            .as_ref()
            .and_then(|value| value.pointer("/error/kind"))
            .and_then(|kind| serde_json::from_value(kind.clone()).ok())
    }
}

/// Register every built-in tool with `registry`
pub async fn register_builtin_tools(registry: &ToolRegistry) -> crate::mcp::errors::MCPResult<()> {
    registry.register_tool(Arc::new(bridge::SyncSnapshotTool)).await?;
    registry.register_tool(Arc::new(bridge::BridgePingTool)).await?;
    registry.register_tool(Arc::new(bridge::AckCommandTool)).await?;

    registry.register_tool(Arc::new(scene::SceneSummaryTool)).await?;
    registry.register_tool(Arc::new(scene::SceneTreeTool)).await?;
    registry.register_tool(Arc::new(scene::NodeDetailsTool)).await?;

    registry.register_tool(Arc::new(commands::RunProjectTool)).await?;
    registry.register_tool(Arc::new(commands::StopProjectTool)).await?;
    registry.register_tool(Arc::new(commands::EditorCommandTool)).await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::mcp::broker::CommandNotifier;
    use crate::mcp::errors::{MCPResult, TransportError};
    use crate::mcp::protocol::MCPMessage;
    use parking_lot::Mutex;

    /// Notifier that records pushes, optionally with no push path at all
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub connected: bool,
        pub pushed: Mutex<Vec<(String, MCPMessage)>>,
    }

    impl RecordingNotifier {
        pub fn last_command_id(&self) -> Option<String> {
            self.pushed.lock().last().and_then(|(_, message)| {
                message
                    .params
                    .as_ref()
                    .and_then(|params| params["commandId"].as_str())
                    .map(str::to_string)
            })
        }
    }

    #[async_trait]
    impl CommandNotifier for RecordingNotifier {
        fn has_push_path(&self, _session_id: &str) -> bool {
            self.connected
        }

        async fn push(&self, session_id: &str, message: &MCPMessage) -> MCPResult<()> {
            if !self.connected {
                return Err(TransportError::Closed.into());
            }
            self.pushed
                .lock()
                .push((session_id.to_string(), message.clone()));
            Ok(())
        }
    }

    pub fn context(
        session_id: Option<&str>,
        initialized: bool,
        notifier: Arc<RecordingNotifier>,
    ) -> ExecutionContext {
        ExecutionContext {
            bridge: BridgeContext {
                session_id: session_id.map(str::to_string),
                initialized,
            },
            snapshots: Arc::new(SnapshotStore::new(Duration::from_secs(10))),
            broker: Arc::new(CommandBroker::new(notifier, Duration::from_secs(1))),
            command_timeout: Duration::from_secs(1),
        }
    }
}
