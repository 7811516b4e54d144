use futures::FutureExt;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::mcp::errors::{MCPError, MCPResult, ToolError};
use crate::mcp::tools::{ExecutionContext, MCPTool, ToolResult};

/// Tool information for MCP client discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

struct RegisteredTool {
    tool: Arc<dyn MCPTool>,
    info: ToolInfo,
    validator: JSONSchema,
}

/// Tool registry for managing and executing MCP tools
pub struct ToolRegistry {
    /// Registered tools indexed by name
    tools: RwLock<HashMap<String, Arc<RegisteredTool>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new tool, compiling its input schema up front
    pub async fn register_tool(&self, tool: Arc<dyn MCPTool>) -> MCPResult<()> {
        let name = tool.name().to_string();
        if name.is_empty() {
            return Err(MCPError::Validation("Tool name cannot be empty".to_string()));
        }

        let schema = tool.input_schema();
        if !schema.is_object() {
            return Err(MCPError::Validation(format!(
                "Tool '{}' input schema must be a JSON object",
                name
            )));
        }
        let validator = JSONSchema::compile(&schema).map_err(|e| {
            MCPError::Validation(format!("Tool '{}' has an invalid input schema: {}", name, e))
        })?;

        let mut tools = self.tools.write().await;
        if tools.contains_key(&name) {
            return Err(MCPError::Validation(format!(
                "Tool '{}' is already registered",
                name
            )));
        }

        let info = ToolInfo {
            name: name.clone(),
            description: tool.description().to_string(),
            input_schema: schema,
        };
        tools.insert(
            name.clone(),
            Arc::new(RegisteredTool {
                tool,
                info,
                validator,
            }),
        );

        info!("Registered tool: {}", name);
        Ok(())
    }

    /// List all available tools, sorted by name
    pub async fn list_tools(&self) -> Vec<ToolInfo> {
        let tools = self.tools.read().await;
        let mut infos: Vec<ToolInfo> = tools.values().map(|entry| entry.info.clone()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub async fn tool_count(&self) -> usize {
        self.tools.read().await.len()
    }

    /// Validate arguments and run the named tool.
    ///
    /// Failures and panics inside the tool are logged in full and come back
    /// as `ExecutionFailed`, which the protocol layer reports generically.
    pub async fn execute_tool(
        &self,
        name: &str,
        params: Value,
        context: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        // Clone the entry out so the table lock is not held while executing
        let entry = self
            .tools
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let params = if params.is_null() {
            Value::Object(Default::default())
        } else {
            params
        };

        if let Err(errors) = entry.validator.validate(&params) {
            let details: Vec<String> = errors.map(|e| e.to_string()).collect();
            debug!("Rejected arguments for {}: {:?}", name, details);
            let message = format!("Invalid arguments for {}: {}", name, details.join("; "));
            return entry.tool.reject_arguments(message, context);
        }

        let start_time = Instant::now();
        let outcome = AssertUnwindSafe(entry.tool.execute(params, context))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => {
                debug!(
                    "Tool {} finished in {:?} (isError: {})",
                    name,
                    start_time.elapsed(),
                    result.is_error
                );
                Ok(result)
            }
            Ok(Err(ToolError::ExecutionFailed(detail))) => {
                error!("Tool {} failed: {}", name, detail);
                Err(ToolError::ExecutionFailed(detail))
            }
            Ok(Err(e)) => {
                debug!("Tool {} returned error: {}", name, e);
                Err(e)
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("Tool {} panicked: {}", name, detail);
                Err(ToolError::ExecutionFailed(detail))
            }
        }
    }
}
