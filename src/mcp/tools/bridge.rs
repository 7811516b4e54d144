//! Plugin-facing bridge tools
//!
//! The editor plugin uses these to push snapshots, signal liveness and
//! acknowledge dispatched commands. Every failure is a structured tool
//! result so the plugin never has to parse protocol errors.
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::mcp::broker::CommandAck;
use crate::mcp::errors::{BrokerError, ErrorKind, SnapshotError, ToolError};
use crate::mcp::snapshot::Snapshot;
use crate::mcp::tools::{ExecutionContext, MCPTool, ToolResult};

const NOT_READY: &str = "bridge session is not initialized";

/// Resolve the caller's session, or the structured failure to return
fn ready_session(context: &ExecutionContext) -> Result<&str, ToolResult> {
    context
        .bridge
        .ready_session()
        .ok_or_else(|| ToolResult::failure(ErrorKind::NotAvailable, NOT_READY))
}

/// Schema rejections stay tool results, after the readiness check
fn structured_rejection(
    message: String,
    context: &ExecutionContext,
) -> Result<ToolResult, ToolError> {
    Ok(match ready_session(context) {
        Ok(_) => ToolResult::failure(ErrorKind::InvalidParams, message),
        Err(failure) => failure,
    })
}

/// Replace the caller's snapshot with the pushed editor state
pub struct SyncSnapshotTool;

#[async_trait]
impl MCPTool for SyncSnapshotTool {
    fn name(&self) -> &str {
        "bridge_sync_snapshot"
    }

    fn description(&self) -> &str {
        "Push the editor's current scene summary, node tree and node details"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "sceneSummary": {
                    "type": "object",
                    "description": "Open scene, project name and similar summary fields"
                },
                "nodeTree": {
                    "type": "object",
                    "description": "Hierarchy of nodes in the edited scene"
                },
                "nodeDetails": {
                    "type": "object",
                    "description": "Per-node properties keyed by node path"
                }
            }
        })
    }

    async fn execute(
        &self,
        params: Value,
        context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let session_id = match ready_session(context) {
            Ok(id) => id,
            Err(failure) => return Ok(failure),
        };

        let snapshot: Snapshot = match serde_json::from_value(params) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                return Ok(ToolResult::failure(
                    ErrorKind::InvalidParams,
                    format!("invalid snapshot payload: {}", e),
                ));
            }
        };

        match context.snapshots.upsert(session_id, snapshot, Utc::now()) {
            Ok(stored) => Ok(ToolResult::success(json!({
                "ok": true,
                "sessionId": stored.session_id,
                "updatedAt": stored.updated_at,
            }))),
            Err(e) => Ok(ToolResult::failure(ErrorKind::InvalidParams, e.to_string())),
        }
    }

    fn reject_arguments(
        &self,
        message: String,
        context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        structured_rejection(message, context)
    }
}

/// Refresh the caller's snapshot timestamp without resending content
pub struct BridgePingTool;

#[async_trait]
impl MCPTool for BridgePingTool {
    fn name(&self) -> &str {
        "bridge_ping"
    }

    fn description(&self) -> &str {
        "Signal that the editor is alive and its last snapshot is still current"
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        _params: Value,
        context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let session_id = match ready_session(context) {
            Ok(id) => id,
            Err(failure) => return Ok(failure),
        };

        let now = Utc::now();
        match context.snapshots.touch(session_id, now) {
            Ok(()) => Ok(ToolResult::success(json!({ "ok": true, "updatedAt": now }))),
            Err(SnapshotError::NotFound) => Ok(ToolResult::failure(
                ErrorKind::NotAvailable,
                "no snapshot synced yet for this session",
            )),
            Err(e) => Ok(ToolResult::failure(ErrorKind::NotAvailable, e.to_string())),
        }
    }

    fn reject_arguments(
        &self,
        message: String,
        context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        structured_rejection(message, context)
    }
}

/// Resolve a command previously pushed to the caller
pub struct AckCommandTool;

#[async_trait]
impl MCPTool for AckCommandTool {
    fn name(&self) -> &str {
        "bridge_ack_command"
    }

    fn description(&self) -> &str {
        "Acknowledge a bridge/command notification with its outcome"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "commandId": { "type": "string", "minLength": 1 },
                "success": { "type": "boolean" },
                "result": {},
                "error": { "type": ["string", "null"] },
                "ackedAt": { "type": ["string", "null"], "description": "RFC 3339 timestamp" }
            },
            "required": ["commandId", "success"]
        })
    }

    async fn execute(
        &self,
        params: Value,
        context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let session_id = match ready_session(context) {
            Ok(id) => id,
            Err(failure) => return Ok(failure),
        };

        let ack: CommandAck = match serde_json::from_value(params) {
            Ok(ack) => ack,
            Err(e) => {
                return Ok(ToolResult::failure(
                    ErrorKind::InvalidParams,
                    format!("invalid ack payload: {}", e),
                ));
            }
        };

        match context.broker.ack(session_id, &ack) {
            Ok(()) => {
                debug!("Ack accepted for {}", ack.command_id);
                Ok(ToolResult::success(json!({
                    "ok": true,
                    "commandId": ack.command_id,
                })))
            }
            Err(e @ BrokerError::SessionMismatch(_)) => {
                warn!("Rejected ack from session {}: {}", session_id, e);
                Ok(ToolResult::failure(ErrorKind::InvalidParams, e.to_string()))
            }
            Err(e) => Ok(ToolResult::failure(ErrorKind::NotAvailable, e.to_string())),
        }
    }

    fn reject_arguments(
        &self,
        message: String,
        context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        structured_rejection(message, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tools::test_support::{RecordingNotifier, context};
    use std::sync::Arc;
    use std::time::Duration;

    fn ready() -> ExecutionContext {
        context(Some("plugin"), true, Arc::new(RecordingNotifier::default()))
    }

    #[tokio::test]
    async fn test_uninitialized_context_is_not_available() {
        let ctx = context(Some("plugin"), false, Arc::new(RecordingNotifier::default()));
        for tool in [
            &SyncSnapshotTool as &dyn MCPTool,
            &BridgePingTool,
            &AckCommandTool,
        ] {
            let result = tool.execute(json!({}), &ctx).await.unwrap();
            assert!(result.is_error, "{}", tool.name());
            assert_eq!(result.error_kind(), Some(ErrorKind::NotAvailable));
        }
        assert!(ctx.snapshots.is_empty());
    }

    #[tokio::test]
    async fn test_sync_then_ping() {
        let ctx = ready();

        let ping = BridgePingTool.execute(json!({}), &ctx).await.unwrap();
        assert!(ping.is_error);

        let sync = SyncSnapshotTool
            .execute(
                json!({ "sceneSummary": { "scene": "res://main.tscn" } }),
                &ctx,
            )
            .await
            .unwrap();
        assert!(!sync.is_error);
        assert_eq!(ctx.snapshots.latest_session_id().as_deref(), Some("plugin"));

        let ping = BridgePingTool.execute(json!({}), &ctx).await.unwrap();
        assert!(!ping.is_error);
        let stored = ctx.snapshots.fresh_for_session("plugin", Utc::now()).unwrap();
        assert_eq!(stored.snapshot.scene_summary["scene"], "res://main.tscn");
    }

    #[tokio::test]
    async fn test_ack_resolves_pending_command() {
        let notifier = Arc::new(RecordingNotifier {
            connected: true,
            ..Default::default()
        });
        let ctx = context(Some("plugin"), true, notifier.clone());

        let waiter = {
            let broker = ctx.broker.clone();
            tokio::spawn(async move {
                broker
                    .dispatch_and_wait("plugin", "run-project", json!({}), Duration::from_secs(2))
                    .await
            })
        };

        let command_id = loop {
            if let Some(id) = notifier.last_command_id() {
                break id;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        let result = AckCommandTool
            .execute(
                json!({ "commandId": command_id, "success": true, "result": { "pid": 7 } }),
                &ctx,
            )
            .await
            .unwrap();
        assert!(!result.is_error);

        let ack = waiter.await.unwrap().unwrap();
        assert_eq!(ack.result, Some(json!({ "pid": 7 })));

        // The same id cannot be resolved twice
        let again = AckCommandTool
            .execute(json!({ "commandId": command_id, "success": true }), &ctx)
            .await
            .unwrap();
        assert!(again.is_error);
        assert_eq!(again.error_kind(), Some(ErrorKind::NotAvailable));
    }
}
