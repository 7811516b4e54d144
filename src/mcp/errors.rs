use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

/// Error handling for the bridge's protocol engine
pub type MCPResult<T> = Result<T, MCPError>;

/// Main error type for all bridge operations
#[derive(Debug, thiserror::Error)]
pub enum MCPError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Tool execution error: {0}")]
    ToolExecution(#[from] ToolError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Command broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// SSE transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),
}

/// Protocol-level errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Tool execution errors
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Not available: {0}")]
    NotAvailable(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

/// Session management errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Missing Mcp-Session-Id header")]
    MissingSessionId,

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Missing MCP-Protocol-Version header")]
    MissingProtocolVersion,

    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(String),

    #[error("Protocol version mismatch: negotiated {negotiated}, received {received}")]
    ProtocolVersionMismatch { negotiated: String, received: String },

    #[error("Session {0} has not negotiated a protocol version")]
    NotNegotiated(String),
}

/// Command broker failures, surfaced to tool handlers as typed reasons
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("session id and command name are required")]
    InvalidRequest,

    #[error("transport unavailable for session {0}")]
    TransportUnavailable(String),

    #[error("command ack timeout after {0:?}")]
    AckTimeout(Duration),

    #[error("unknown or expired command id: {0}")]
    UnknownCommand(String),

    #[error("command {0} belongs to a different session")]
    SessionMismatch(String),
}

/// Snapshot store failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("session id is required")]
    InvalidSession,

    #[error("no snapshot available")]
    NotFound,

    #[error("snapshot for session {session_id} is stale ({age_ms}ms old)")]
    Stale { session_id: String, age_ms: i64 },
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// JSON-RPC error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonRpcErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
    ServerError = -32000, // -32000 to -32099 are reserved for implementation-defined server-errors
}

/// Semantic discriminator carried in `error.data.kind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient: the editor is not connected, data is stale, session not ready
    NotAvailable,
    /// The feature is disabled or not implemented
    NotSupported,
    /// Client-supplied mistake
    InvalidParams,
    Internal,
}

/// JSON-RPC error response structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: JsonRpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_kind(self, kind: ErrorKind) -> Self {
        self.with_data(json!({ "kind": kind }))
    }

    pub fn parse_error(detail: impl std::fmt::Display) -> Self {
        Self::new(JsonRpcErrorCode::ParseError, format!("Parse error: {}", detail))
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::InvalidRequest, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::InvalidParams, message).with_kind(ErrorKind::InvalidParams)
    }

    pub fn not_available(message: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::ServerError, message).with_kind(ErrorKind::NotAvailable)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::ServerError, message).with_kind(ErrorKind::NotSupported)
    }

    /// Generic internal error; detail stays in the local log
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(JsonRpcErrorCode::InternalError, message).with_kind(ErrorKind::Internal)
    }

    /// The discriminator, if one was attached
    pub fn kind(&self) -> Option<ErrorKind> {
        self.data
            .as_ref()
            .and_then(|data| data.get("kind"))
            .and_then(|kind| serde_json::from_value(kind.clone()).ok())
    }
}

impl From<ToolError> for JsonRpcError {
    fn from(error: ToolError) -> Self {
        match error {
            ToolError::NotFound(name) => {
                JsonRpcError::invalid_params(format!("Unknown tool: {}", name))
            }
            ToolError::InvalidParams(msg) => JsonRpcError::invalid_params(msg),
            ToolError::NotAvailable(msg) => JsonRpcError::not_available(msg),
            ToolError::NotSupported(msg) => JsonRpcError::not_supported(msg),
            ToolError::ExecutionFailed(_) => JsonRpcError::internal("Tool execution failed"),
        }
    }
}

impl From<SessionError> for JsonRpcError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::NotFound(_) | SessionError::NotNegotiated(_) => {
                JsonRpcError::not_available(error.to_string())
            }
            _ => JsonRpcError::invalid_request(error.to_string()),
        }
    }
}

impl From<MCPError> for JsonRpcError {
    fn from(error: MCPError) -> Self {
        match error {
            MCPError::Protocol(ProtocolError::MethodNotFound(method)) => JsonRpcError::new(
                JsonRpcErrorCode::MethodNotFound,
                format!("Method not found: {}", method),
            ),
            MCPError::Validation(msg) => JsonRpcError::invalid_params(msg),
            MCPError::ToolExecution(tool_error) => tool_error.into(),
            MCPError::Session(session_error) => session_error.into(),
            MCPError::Broker(broker_error) => JsonRpcError::not_available(broker_error.to_string()),
            MCPError::Snapshot(snapshot_error) => {
                JsonRpcError::not_available(snapshot_error.to_string())
            }
            _ => JsonRpcError::internal("Internal error"),
        }
    }
}

impl From<ProtocolError> for JsonRpcError {
    fn from(error: ProtocolError) -> Self {
        MCPError::Protocol(error).into()
    }
}
