use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{info, warn};

use crate::mcp::errors::{ErrorKind, ToolError};
use crate::mcp::tools::{ExecutionContext, MCPTool, ToolResult};

/// Upper bound for a caller-supplied command timeout
const MAX_COMMAND_TIMEOUT_MS: u64 = 600_000;

/// Push a command to the editor owning the latest snapshot and wait for its ack
async fn run_editor_command(
    context: &ExecutionContext,
    command: &str,
    args: Value,
    timeout: Duration,
) -> Result<ToolResult, ToolError> {
    let target = context.snapshots.latest_session_id().ok_or_else(|| {
        ToolError::NotAvailable("no editor is connected to the bridge".to_string())
    })?;

    info!("Dispatching {} to editor session {}", command, target);
    let ack = context
        .broker
        .dispatch_and_wait(&target, command, args, timeout)
        .await
        .map_err(|e| {
            warn!("Command {} not delivered: {}", command, e);
            ToolError::NotAvailable(e.to_string())
        })?;

    if ack.success {
        Ok(ToolResult::success(json!({
            "commandId": ack.command_id,
            "command": command,
            "result": ack.result.unwrap_or(Value::Null),
            "ackedAt": ack.acked_at,
        })))
    } else {
        let message = ack
            .error
            .unwrap_or_else(|| format!("editor reported failure for {}", command));
        Ok(ToolResult::failure(ErrorKind::Internal, message))
    }
}

pub struct RunProjectTool;

#[async_trait]
impl MCPTool for RunProjectTool {
    fn name(&self) -> &str {
        "run_project"
    }

    fn description(&self) -> &str {
        "Run the project in the editor, optionally starting from a specific scene"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "scene": {
                    "type": "string",
                    "description": "Scene to run instead of the main scene, e.g. res://levels/level1.tscn"
                }
            }
        })
    }

    async fn execute(
        &self,
        params: Value,
        context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let mut args = Map::new();
        if let Some(scene) = params["scene"].as_str() {
            args.insert("scene".to_string(), json!(scene));
        }
        run_editor_command(
            context,
            "run-project",
            Value::Object(args),
            context.command_timeout,
        )
        .await
    }
}

pub struct StopProjectTool;

#[async_trait]
impl MCPTool for StopProjectTool {
    fn name(&self) -> &str {
        "stop_project"
    }

    fn description(&self) -> &str {
        "Stop the project if it is running in the editor"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        _params: Value,
        context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        run_editor_command(context, "stop-project", json!({}), context.command_timeout).await
    }
}

/// Generic escape hatch for commands the plugin understands
pub struct EditorCommandTool;

#[async_trait]
impl MCPTool for EditorCommandTool {
    fn name(&self) -> &str {
        "editor_command"
    }

    fn description(&self) -> &str {
        "Send an arbitrary named command to the editor plugin and wait for its result"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "minLength": 1 },
                "args": { "type": "object" },
                "timeoutMs": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_COMMAND_TIMEOUT_MS
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        params: Value,
        context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let command = params["command"]
            .as_str()
            .filter(|command| !command.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidParams("command is required".to_string()))?;

        let args = params
            .get("args")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let timeout = params["timeoutMs"]
            .as_u64()
            .map(|ms| Duration::from_millis(ms.min(MAX_COMMAND_TIMEOUT_MS)))
            .unwrap_or(context.command_timeout);

        run_editor_command(context, command, args, timeout).await
    }
}
