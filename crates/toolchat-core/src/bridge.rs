//! Tool Session Bridge: the agent's view of the external tool subprocess.
//!
//! [`ToolBridge`] is the capability interface the lifecycle and the
//! reasoning loop depend on; [`McpBridge`] implements it over a stdio MCP
//! connection. Discovered capabilities are wrapped as [`BridgeTool`]s so the
//! tool registry can treat them like any other tool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use toolchat_mcp::{ConnectOptions, Implementation, McpConnection, McpError, ServerCommand};
use tracing::info;

use crate::config::ToolServerConfig;
use crate::error::AgentError;
use crate::tool_registry::Tool;
use crate::types::ToolSchema;

/// Uniform `invoke(name, args) -> result` access to a connected tool server.
#[async_trait]
pub trait ToolBridge: Send + Sync {
    /// Capabilities exposed by the server, in the order it lists them.
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, AgentError>;

    /// Invoke one capability. A result the server flags as an error is
    /// returned as `Err(ToolExecution)`.
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, AgentError>;

    /// Close the protocol session.
    async fn close_session(&self) -> Result<(), AgentError>;

    /// Stop the subprocess. Called after `close_session`.
    async fn close_transport(&self) -> Result<(), AgentError>;
}

/// A discovered capability exposed through the tool registry.
pub struct BridgeTool {
    schema: ToolSchema,
    bridge: Arc<dyn ToolBridge>,
}

impl BridgeTool {
    pub fn new(schema: ToolSchema, bridge: Arc<dyn ToolBridge>) -> Self {
        Self { schema, bridge }
    }
}

#[async_trait]
impl Tool for BridgeTool {
    fn name(&self) -> &str {
        &self.schema.name
    }

    fn description(&self) -> &str {
        &self.schema.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.parameters.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, AgentError> {
        self.bridge.call_tool(&self.schema.name, args).await
    }
}

/// [`ToolBridge`] over a spawned stdio MCP server.
pub struct McpBridge {
    connection: McpConnection,
}

impl McpBridge {
    /// Spawn the configured server with `credential` in its environment and
    /// complete the handshake. Either fully connected or fully torn down.
    pub async fn connect(config: &ToolServerConfig, credential: &str) -> Result<Self, AgentError> {
        let mut command = ServerCommand::new(&config.command);
        command.args = config.args.clone();
        command.env = config.env.clone();
        command
            .env
            .insert(config.credential_env.clone(), credential.to_string());

        let options = ConnectOptions {
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            exit_grace: Duration::from_millis(config.exit_grace_ms),
        };
        let client_info = Implementation::new("toolchat", env!("CARGO_PKG_VERSION"));

        let connection = McpConnection::connect(&command, &client_info, options)
            .await
            .map_err(|e| AgentError::Session(format!("Failed to initialize MCP client: {}", e)))?;

        info!(server = %connection.transport.label(), "MCP session initialized");
        Ok(Self { connection })
    }
}

fn tool_error(name: &str, e: McpError) -> AgentError {
    AgentError::ToolExecution {
        tool_name: name.to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl ToolBridge for McpBridge {
    async fn list_tools(&self) -> Result<Vec<ToolSchema>, AgentError> {
        let tools = self
            .connection
            .client
            .list_tools()
            .await
            .map_err(|e| AgentError::ToolDiscovery(format!("Failed to load MCP tools: {}", e)))?;

        Ok(tools
            .into_iter()
            .map(|t| ToolSchema {
                description: t.description.unwrap_or_else(|| t.name.clone()),
                name: t.name,
                parameters: t.input_schema,
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, AgentError> {
        let result = self
            .connection
            .client
            .call_tool(name, arguments)
            .await
            .map_err(|e| tool_error(name, e))?;

        let text = result.text();
        if result.is_error {
            return Err(AgentError::ToolExecution {
                tool_name: name.to_string(),
                message: if text.is_empty() {
                    "MCP tool returned error".into()
                } else {
                    text
                },
            });
        }
        Ok(if text.is_empty() {
            "(no output)".into()
        } else {
            text
        })
    }

    async fn close_session(&self) -> Result<(), AgentError> {
        self.connection
            .client
            .close()
            .await
            .map_err(|e| AgentError::Session(format!("closing MCP session: {}", e)))
    }

    async fn close_transport(&self) -> Result<(), AgentError> {
        self.connection
            .transport
            .shutdown(self.connection.exit_grace())
            .await
            .map_err(|e| AgentError::Session(format!("stopping tool server: {}", e)))
    }
}
