use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::mcp::{
    SERVER_NAME, SERVER_VERSION,
    broker::CommandBroker,
    errors::{JsonRpcError, MCPError, MCPResult, ProtocolError, SessionError},
    protocol::{
        CallToolParams, InitializeResult, MCPMessage, MCPRequest, PromptsCapability,
        ReadResourceParams, ResourcesCapability, ServerCapabilities, ServerInfo, ToolsCapability,
    },
    session::SessionManager,
    snapshot::SnapshotStore,
    tools::{BridgeContext, ExecutionContext, ToolRegistry, scene::lookup_snapshot},
};

pub const SCENE_SUMMARY_URI: &str = "editor://scene/summary";
pub const SCENE_TREE_URI: &str = "editor://scene/tree";

/// Per-request facts established by the HTTP layer
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub session_id: Option<String>,
}

impl RequestContext {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
        }
    }
}

/// Routes validated requests to their handlers. Holds no state of its own.
pub struct Dispatcher {
    sessions: Arc<SessionManager>,
    snapshots: Arc<SnapshotStore>,
    broker: Arc<CommandBroker>,
    tools: Arc<ToolRegistry>,
    command_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        sessions: Arc<SessionManager>,
        snapshots: Arc<SnapshotStore>,
        broker: Arc<CommandBroker>,
        tools: Arc<ToolRegistry>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            snapshots,
            broker,
            tools,
            command_timeout,
        }
    }

    /// Handle one request. Notifications never produce a response.
    pub async fn handle(&self, request: MCPRequest, context: &RequestContext) -> Option<MCPMessage> {
        let Some(id) = request.id.clone() else {
            self.handle_notification(&request, context);
            return None;
        };

        debug!("Dispatching {} (id {})", request.method, id);

        let outcome = match request.method.as_str() {
            "initialize" => self.handle_initialize(&request, context),
            "ping" => Ok(json!({})),
            "tools/list" => self.handle_list_tools().await,
            "tools/call" => self.handle_tool_call(&request, context).await,
            "resources/list" => Ok(Self::handle_list_resources()),
            "resources/read" => self.handle_read_resource(&request, context),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(JsonRpcError::from(ProtocolError::MethodNotFound(
                request.method.clone(),
            ))),
        };

        Some(match outcome {
            Ok(result) => MCPMessage::response(id, result),
            Err(error) => MCPMessage::error_response(id, error),
        })
    }

    fn handle_notification(&self, request: &MCPRequest, context: &RequestContext) {
        match request.method.as_str() {
            "notifications/initialized" => {
                if let Some(session_id) = &context.session_id {
                    if self.sessions.mark_initialized(session_id) {
                        info!("Session {} initialized", session_id);
                    }
                }
            }
            other => debug!("Ignoring notification {}", other),
        }
    }

    fn handle_initialize(
        &self,
        request: &MCPRequest,
        context: &RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let session_id = context
            .session_id
            .as_deref()
            .ok_or_else(|| JsonRpcError::from(SessionError::MissingSessionId))?;

        let params = request.params_object();
        let requested = params.get("protocolVersion").and_then(Value::as_str);
        if let Some(client) = params.get("clientInfo") {
            info!("Initialize from client {} on session {}", client, session_id);
        }

        let version = self
            .sessions
            .negotiate_protocol_version(session_id, requested)
            .ok_or_else(|| JsonRpcError::from(SessionError::NotFound(session_id.to_string())))?;

        let result = InitializeResult {
            protocol_version: version,
            capabilities: ServerCapabilities {
                tools: ToolsCapability { list_changed: false },
                prompts: PromptsCapability { list_changed: false },
                resources: ResourcesCapability {
                    list_changed: false,
                    subscribe: false,
                },
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
            instructions: Some(
                "Editor state is available through the scene tools once the editor plugin has synced."
                    .to_string(),
            ),
        };

        to_result(result)
    }

    async fn handle_list_tools(&self) -> Result<Value, JsonRpcError> {
        let tools = self.tools.list_tools().await;
        Ok(json!({ "tools": tools }))
    }

    async fn handle_tool_call(
        &self,
        request: &MCPRequest,
        context: &RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = request
            .params
            .clone()
            .ok_or_else(|| JsonRpcError::invalid_params("Missing parameters"))
            .and_then(|params| {
                serde_json::from_value(params)
                    .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))
            })?;

        let execution = self.execution_context(context);
        let arguments = params.arguments.unwrap_or(Value::Null);

        match self
            .tools
            .execute_tool(&params.name, arguments, &execution)
            .await
        {
            Ok(result) => to_result(result),
            Err(e) => {
                debug!("Tool call {} failed: {}", params.name, e);
                Err(e.into())
            }
        }
    }

    fn handle_list_resources() -> Value {
        json!({
            "resources": [
                {
                    "uri": SCENE_SUMMARY_URI,
                    "name": "Scene summary",
                    "description": "Summary of the scene open in the editor",
                    "mimeType": "application/json"
                },
                {
                    "uri": SCENE_TREE_URI,
                    "name": "Scene tree",
                    "description": "Node hierarchy of the scene open in the editor",
                    "mimeType": "application/json"
                }
            ]
        })
    }

    fn handle_read_resource(
        &self,
        request: &MCPRequest,
        context: &RequestContext,
    ) -> Result<Value, JsonRpcError> {
        let params: ReadResourceParams = request
            .params
            .clone()
            .ok_or_else(|| JsonRpcError::invalid_params("Missing parameters"))
            .and_then(|params| {
                serde_json::from_value(params)
                    .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))
            })?;

        let is_summary = match params.uri.as_str() {
            SCENE_SUMMARY_URI => true,
            SCENE_TREE_URI => false,
            other => {
                warn!("Unknown resource requested: {}", other);
                return Err(JsonRpcError::invalid_params(format!(
                    "Unknown resource: {}",
                    other
                )));
            }
        };

        let stored = lookup_snapshot(&self.execution_context(context))?;
        let payload = if is_summary {
            &stored.snapshot.scene_summary
        } else {
            &stored.snapshot.node_tree
        };

        let text = serde_json::to_string_pretty(payload).map_err(MCPError::from)?;
        Ok(json!({
            "contents": [{
                "uri": params.uri,
                "mimeType": "application/json",
                "text": text
            }]
        }))
    }

    fn execution_context(&self, context: &RequestContext) -> ExecutionContext {
        let initialized = context
            .session_id
            .as_deref()
            .map(|id| self.sessions.is_initialized(id))
            .unwrap_or(false);

        ExecutionContext {
            bridge: BridgeContext {
                session_id: context.session_id.clone(),
                initialized,
            },
            snapshots: self.snapshots.clone(),
            broker: self.broker.clone(),
            command_timeout: self.command_timeout,
        }
    }
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, JsonRpcError> {
    let value: MCPResult<Value> = serde_json::to_value(value).map_err(MCPError::from);
    value.map_err(JsonRpcError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::errors::{ErrorKind, JsonRpcErrorCode};
    use crate::mcp::snapshot::Snapshot;
    use crate::mcp::tools::register_builtin_tools;
    use chrono::Utc;

    async fn dispatcher() -> (Dispatcher, Arc<SessionManager>, Arc<SnapshotStore>) {
        let snapshots = Arc::new(SnapshotStore::new(Duration::from_secs(10)));
        let sessions = Arc::new(SessionManager::new(snapshots.clone()));
        let broker = Arc::new(CommandBroker::new(sessions.clone(), Duration::from_secs(1)));
        let tools = Arc::new(ToolRegistry::new());
        register_builtin_tools(&tools).await.unwrap();

        let dispatcher = Dispatcher::new(
            sessions.clone(),
            snapshots.clone(),
            broker,
            tools,
            Duration::from_secs(1),
        );
        (dispatcher, sessions, snapshots)
    }

    fn request(id: Option<Value>, method: &str, params: Option<Value>) -> MCPRequest {
        MCPRequest {
            id,
            method: method.to_string(),
            params,
        }
    }

    fn error_of(message: &MCPMessage) -> &JsonRpcError {
        message.error.as_ref().expect("error response")
    }

    #[tokio::test]
    async fn test_initialize_negotiates_version() {
        let (dispatcher, sessions, _) = dispatcher().await;
        sessions.create_session("s1");

        let response = dispatcher
            .handle(
                request(
                    Some(json!(1)),
                    "initialize",
                    Some(json!({ "protocolVersion": "2025-03-26", "capabilities": {} })),
                ),
                &RequestContext::for_session("s1"),
            )
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(sessions.protocol_version("s1").as_deref(), Some("2025-03-26"));
    }

    #[tokio::test]
    async fn test_initialized_notification_marks_session() {
        let (dispatcher, sessions, _) = dispatcher().await;
        sessions.create_session("s1");

        let response = dispatcher
            .handle(
                request(None, "notifications/initialized", None),
                &RequestContext::for_session("s1"),
            )
            .await;
        assert!(response.is_none());
        assert!(sessions.is_initialized("s1"));
    }

    #[tokio::test]
    async fn test_unknown_method_and_notification() {
        let (dispatcher, _, _) = dispatcher().await;
        let ctx = RequestContext::default();

        let response = dispatcher
            .handle(request(Some(json!("a")), "bogus/method", None), &ctx)
            .await
            .unwrap();
        assert_eq!(error_of(&response).code, JsonRpcErrorCode::MethodNotFound as i32);
        assert_eq!(response.id, Some(json!("a")));

        assert!(
            dispatcher
                .handle(request(None, "notifications/cancelled", None), &ctx)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_tools_list_and_prompts() {
        let (dispatcher, _, _) = dispatcher().await;
        let ctx = RequestContext::default();

        let tools = dispatcher
            .handle(request(Some(json!(2)), "tools/list", None), &ctx)
            .await
            .unwrap()
            .result
            .unwrap();
        let names: Vec<&str> = tools["tools"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|tool| tool["name"].as_str())
            .collect();
        assert!(names.contains(&"bridge_sync_snapshot"));
        assert!(names.contains(&"run_project"));
        assert!(names.contains(&"get_node_details"));

        let prompts = dispatcher
            .handle(request(Some(json!(3)), "prompts/list", None), &ctx)
            .await
            .unwrap()
            .result
            .unwrap();
        assert_eq!(prompts["prompts"], json!([]));
    }

    #[tokio::test]
    async fn test_tool_call_errors_map_to_codes() {
        let (dispatcher, _, _) = dispatcher().await;
        let ctx = RequestContext::default();

        let unknown = dispatcher
            .handle(
                request(Some(json!(4)), "tools/call", Some(json!({ "name": "nope" }))),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(error_of(&unknown).code, JsonRpcErrorCode::InvalidParams as i32);

        let stale = dispatcher
            .handle(
                request(
                    Some(json!(5)),
                    "tools/call",
                    Some(json!({ "name": "get_scene_summary", "arguments": {} })),
                ),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(error_of(&stale).kind(), Some(ErrorKind::NotAvailable));

        let bad_args = dispatcher
            .handle(
                request(
                    Some(json!(6)),
                    "tools/call",
                    Some(json!({ "name": "get_node_details", "arguments": { "path": 1 } })),
                ),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(error_of(&bad_args).kind(), Some(ErrorKind::InvalidParams));
    }

    #[tokio::test]
    async fn test_bridge_tool_requires_initialized_session() {
        let (dispatcher, sessions, snapshots) = dispatcher().await;
        sessions.create_session("plugin");
        let ctx = RequestContext::for_session("plugin");
        let sync = || {
            request(
                Some(json!(7)),
                "tools/call",
                Some(json!({
                    "name": "bridge_sync_snapshot",
                    "arguments": { "sceneSummary": { "scene": "res://main.tscn" } }
                })),
            )
        };

        let response = dispatcher.handle(sync(), &ctx).await.unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["structuredContent"]["error"]["kind"], "not_available");
        assert!(snapshots.is_empty());

        sessions.mark_initialized("plugin");
        let response = dispatcher.handle(sync(), &ctx).await.unwrap();
        assert_eq!(response.result.unwrap()["isError"], false);
        assert_eq!(snapshots.latest_session_id().as_deref(), Some("plugin"));
    }

    #[tokio::test]
    async fn test_bridge_schema_rejection_is_tool_result() {
        let (dispatcher, sessions, snapshots) = dispatcher().await;
        sessions.create_session("plugin");
        let ctx = RequestContext::for_session("plugin");
        let call = |name: &str, arguments: Value| {
            request(
                Some(json!(10)),
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
        };

        // Readiness is reported before the argument problem
        let response = dispatcher
            .handle(call("bridge_ack_command", json!({})), &ctx)
            .await
            .unwrap();
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["structuredContent"]["error"]["kind"], "not_available");

        sessions.mark_initialized("plugin");
        let response = dispatcher
            .handle(call("bridge_sync_snapshot", json!({ "sceneSummary": "x" })), &ctx)
            .await
            .unwrap();
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["structuredContent"]["error"]["kind"], "invalid_params");
        assert!(snapshots.is_empty());

        let response = dispatcher
            .handle(call("bridge_ack_command", json!({ "success": true })), &ctx)
            .await
            .unwrap();
        assert!(response.error.is_none());
        assert_eq!(
            response.result.unwrap()["structuredContent"]["error"]["kind"],
            "invalid_params"
        );
    }

    #[tokio::test]
    async fn test_read_resources() {
        let (dispatcher, _, snapshots) = dispatcher().await;
        let ctx = RequestContext::default();

        let list = dispatcher
            .handle(request(Some(json!(8)), "resources/list", None), &ctx)
            .await
            .unwrap()
            .result
            .unwrap();
        assert_eq!(list["resources"][0]["uri"], SCENE_SUMMARY_URI);

        let read = |uri: &str| {
            request(
                Some(json!(9)),
                "resources/read",
                Some(json!({ "uri": uri })),
            )
        };

        let unavailable = dispatcher.handle(read(SCENE_TREE_URI), &ctx).await.unwrap();
        assert_eq!(error_of(&unavailable).kind(), Some(ErrorKind::NotAvailable));

        snapshots
            .upsert(
                "plugin",
                Snapshot {
                    node_tree: json!({ "name": "Root" }),
                    ..Default::default()
                },
                Utc::now(),
            )
            .unwrap();

        let tree = dispatcher
            .handle(read(SCENE_TREE_URI), &ctx)
            .await
            .unwrap()
            .result
            .unwrap();
        assert!(tree["contents"][0]["text"].as_str().unwrap().contains("Root"));

        let unknown = dispatcher.handle(read("editor://nope"), &ctx).await.unwrap();
        assert_eq!(error_of(&unknown).code, JsonRpcErrorCode::InvalidParams as i32);
    }
}
