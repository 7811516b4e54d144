use crate::mcp::JSONRPC_VERSION;
use crate::mcp::errors::{JsonRpcError, MCPError, MCPResult, ProtocolError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Method name of the handshake call
pub const INITIALIZE_METHOD: &str = "initialize";

/// JSON-RPC 2.0 message structure for MCP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MCPMessage {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A validated inbound call. `id` is `None` for notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct MCPRequest {
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

impl MCPRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_initialize(&self) -> bool {
        self.method == INITIALIZE_METHOD
    }

    /// Params as an object, or an empty one when absent
    pub fn params_object(&self) -> Map<String, Value> {
        match &self.params {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }
}

impl MCPMessage {
    /// Create a new response message
    pub fn response(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Create a new error response message
    pub fn error_response(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    /// Create a new notification message
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// Check if this is a response message
    pub fn is_response(&self) -> bool {
        self.id.is_some()
            && self.method.is_none()
            && (self.result.is_some() || self.error.is_some())
    }

    /// Check if this is a notification message
    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// MCP protocol initialization parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(rename = "clientInfo", default)]
    pub client_info: Option<ClientInfo>,
}

/// Client information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsCapability {
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesCapability {
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
    #[serde(default)]
    pub subscribe: bool,
}

/// Server capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
    pub prompts: PromptsCapability,
    pub resources: ResourcesCapability,
}

/// Server information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Initialize response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// `tools/call` parameters
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// `resources/read` parameters
#[derive(Debug, Clone, Deserialize)]
pub struct ReadResourceParams {
    pub uri: String,
}

/// Outcome of parsing one POST body
#[derive(Debug, Default)]
pub struct ParsedFrame {
    /// Well-formed requests and notifications
    pub requests: Vec<MCPRequest>,
    /// Pre-built error responses for malformed entries
    pub errors: Vec<MCPMessage>,
    /// A bare response (result/error, no method) was accepted
    pub accepted_one_way: bool,
}

impl ParsedFrame {
    fn rejected(id: Value, error: JsonRpcError) -> Self {
        Self {
            errors: vec![MCPMessage::error_response(id, error)],
            ..Default::default()
        }
    }

    fn request(request: MCPRequest) -> Self {
        Self {
            requests: vec![request],
            ..Default::default()
        }
    }

    fn one_way() -> Self {
        Self {
            accepted_one_way: true,
            ..Default::default()
        }
    }
}

/// Protocol message parser
pub struct MessageParser;

impl MessageParser {
    /// Parse and validate exactly one JSON-RPC message from a frame body.
    ///
    /// Never fails: every malformed input becomes a well-formed error
    /// response, with a null id when the original id is unusable.
    pub fn parse_frame(data: &[u8]) -> ParsedFrame {
        let value: Value = match serde_json::from_slice(data) {
            Ok(value) => value,
            Err(e) => {
                debug!("Rejecting unparseable frame: {}", e);
                return ParsedFrame::rejected(Value::Null, JsonRpcError::parse_error(e));
            }
        };

        let object = match value {
            Value::Object(object) => object,
            Value::Array(_) => {
                return ParsedFrame::rejected(
                    Value::Null,
                    JsonRpcError::invalid_request(
                        "Invalid Request: batch requests are not supported",
                    ),
                );
            }
            _ => {
                return ParsedFrame::rejected(
                    Value::Null,
                    JsonRpcError::invalid_request("Invalid Request: expected a JSON object"),
                );
            }
        };

        // Validate the id first so later errors can echo it back
        let id = match object.get("id") {
            None => None,
            Some(id) if Self::is_valid_id(id) => Some(id.clone()),
            Some(_) => {
                return ParsedFrame::rejected(
                    Value::Null,
                    JsonRpcError::invalid_request(
                        "Invalid Request: id must be a string or an integer",
                    ),
                );
            }
        };
        let reply_id = id.clone().unwrap_or(Value::Null);

        if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return ParsedFrame::rejected(
                reply_id,
                JsonRpcError::invalid_request("Invalid Request: jsonrpc must be \"2.0\""),
            );
        }

        let has_result = object.contains_key("result");
        let has_error = object.contains_key("error");

        let method = match object.get("method") {
            None => {
                return match (has_result, has_error, id.is_some()) {
                    (true, true, _) => ParsedFrame::rejected(
                        reply_id,
                        JsonRpcError::invalid_request(
                            "Invalid Request: response cannot carry both result and error",
                        ),
                    ),
                    (false, false, _) => ParsedFrame::rejected(
                        reply_id,
                        JsonRpcError::invalid_request("Invalid Request: missing method"),
                    ),
                    (_, _, false) => ParsedFrame::rejected(
                        Value::Null,
                        JsonRpcError::invalid_request("Invalid Request: response requires an id"),
                    ),
                    _ => ParsedFrame::one_way(),
                };
            }
            Some(Value::String(method)) if !method.is_empty() => method.clone(),
            Some(_) => {
                return ParsedFrame::rejected(
                    reply_id,
                    JsonRpcError::invalid_request("Invalid Request: method must be a string"),
                );
            }
        };

        if has_result || has_error {
            return ParsedFrame::rejected(
                reply_id,
                JsonRpcError::invalid_request(
                    "Invalid Request: request cannot carry result or error",
                ),
            );
        }

        let params = match object.get("params") {
            None => None,
            Some(Value::Object(params)) => Some(Value::Object(params.clone())),
            Some(_) => {
                return ParsedFrame::rejected(
                    reply_id,
                    JsonRpcError::invalid_params("Invalid params: params must be an object"),
                );
            }
        };

        if method == INITIALIZE_METHOD && id.is_none() {
            return ParsedFrame::rejected(
                Value::Null,
                JsonRpcError::invalid_request("Invalid Request: initialize requires an id"),
            );
        }

        ParsedFrame::request(MCPRequest { id, method, params })
    }

    /// Serialize a message to JSON bytes
    pub fn serialize_message(message: &MCPMessage) -> MCPResult<Vec<u8>> {
        serde_json::to_vec(message)
            .map_err(|e| MCPError::Protocol(ProtocolError::InternalError(e.to_string())))
    }

    fn is_valid_id(id: &Value) -> bool {
        match id {
            Value::String(_) => true,
            Value::Number(number) => number.is_i64() || number.is_u64(),
            _ => false,
        }
    }
}
