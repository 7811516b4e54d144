//! Read-only scene tools backed by the snapshot store
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::debug;

use crate::mcp::errors::ToolError;
use crate::mcp::snapshot::StoredSnapshot;
use crate::mcp::tools::{ExecutionContext, MCPTool, ToolResult};

/// Fresh snapshot for the caller: its own session first, then the
/// process-wide latest. Stale or missing data is never served.
pub fn lookup_snapshot(context: &ExecutionContext) -> Result<StoredSnapshot, ToolError> {
    let now = Utc::now();

    if let Some(session_id) = context.bridge.session_id.as_deref() {
        if let Ok(stored) = context.snapshots.fresh_for_session(session_id, now) {
            return Ok(stored);
        }
    }

    context.snapshots.latest_fresh(now).map_err(|e| {
        debug!("No fresh snapshot to serve: {}", e);
        ToolError::NotAvailable(format!(
            "editor state unavailable ({}); waiting for the editor to sync",
            e
        ))
    })
}

fn with_meta(stored: &StoredSnapshot, key: &str, value: &Value) -> Value {
    let mut result = json!({
        "sessionId": stored.session_id,
        "updatedAt": stored.updated_at,
    });
    result[key] = value.clone();
    result
}

pub struct SceneSummaryTool;

#[async_trait]
impl MCPTool for SceneSummaryTool {
    fn name(&self) -> &str {
        "get_scene_summary"
    }

    fn description(&self) -> &str {
        "Summary of the scene currently open in the editor"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        _params: Value,
        context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let stored = lookup_snapshot(context)?;
        Ok(ToolResult::success(with_meta(
            &stored,
            "sceneSummary",
            &stored.snapshot.scene_summary,
        )))
    }
}

pub struct SceneTreeTool;

#[async_trait]
impl MCPTool for SceneTreeTool {
    fn name(&self) -> &str {
        "get_scene_tree"
    }

    fn description(&self) -> &str {
        "Node hierarchy of the scene currently open in the editor"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        _params: Value,
        context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let stored = lookup_snapshot(context)?;
        Ok(ToolResult::success(with_meta(
            &stored,
            "nodeTree",
            &stored.snapshot.node_tree,
        )))
    }
}

/// Properties of one node, looked up by its path
pub struct NodeDetailsTool;

#[async_trait]
impl MCPTool for NodeDetailsTool {
    fn name(&self) -> &str {
        "get_node_details"
    }

    fn description(&self) -> &str {
        "Properties of a single node in the open scene, by node path"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Node path, e.g. \"Root/Player\""
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        params: Value,
        context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let path = params["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidParams("path is required".to_string()))?;

        let stored = lookup_snapshot(context)?;
        let details = stored
            .snapshot
            .node_details
            .get(path)
            .ok_or_else(|| ToolError::InvalidParams(format!("no node at path {}", path)))?;

        Ok(ToolResult::success(json!({
            "path": path,
            "details": details,
            "sessionId": stored.session_id,
            "updatedAt": stored.updated_at,
        })))
    }
}
