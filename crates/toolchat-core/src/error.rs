use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    /// Missing or invalid setup; fatal to initialization.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Runtime or session-level failure (tool server connection, agent composition).
    #[error("Agent error: {0}")]
    Session(String),

    /// Capability discovery failed.
    #[error("Tool error: {0}")]
    ToolDiscovery(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Machine-readable category tag.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Config(_) => "configuration_error",
            AgentError::Session(_) => "agent_error",
            AgentError::ToolDiscovery(_) => "tool_error",
            AgentError::Provider(_) => "provider_error",
            AgentError::ToolExecution { .. } | AgentError::ToolNotFound(_) => "tool_execution_error",
            AgentError::Io(_) => "io_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
