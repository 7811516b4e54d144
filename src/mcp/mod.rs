//! Model Context Protocol (MCP) bridge between AI clients and a running editor
//!
//! The concurrency core lives in `session`, `broker`, `snapshot` and
//! `transport`; `protocol` frames and validates inbound JSON-RPC, `dispatcher`
//! routes validated requests, and `server` exposes it all over HTTP + SSE.
pub mod broker;
pub mod dispatcher;
pub mod errors;
pub mod protocol;
pub mod server;
pub mod session;
pub mod snapshot;
pub mod tools;
pub mod transport;

// Re-export core types for easier access
pub use self::{
    broker::CommandBroker, dispatcher::Dispatcher, server::AppState, session::SessionManager,
    snapshot::SnapshotStore, tools::MCPTool, transport::SseTransport,
};

/// Protocol version the server prefers when a client asks for something unknown
pub const PREFERRED_PROTOCOL_VERSION: &str = "2025-06-18";

/// Every protocol version a session may negotiate
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// JSON-RPC version every frame must declare
pub const JSONRPC_VERSION: &str = "2.0";

pub const SESSION_ID_HEADER: &str = "Mcp-Session-Id";
pub const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";

/// Server information
pub const SERVER_NAME: &str = "Editor MCP Bridge";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn is_supported_protocol_version(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}
