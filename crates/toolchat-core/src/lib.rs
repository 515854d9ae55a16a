pub mod agent_loop;
pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod host;
pub mod lifecycle;
pub mod provider;
pub mod tool_registry;
pub mod types;

pub use agent_loop::{AgentRuntime, AgentTrace};
pub use bridge::{BridgeTool, McpBridge, ToolBridge};
pub use config::AppConfig;
pub use dispatcher::Dispatcher;
pub use error::AgentError;
pub use host::{AgentHandle, AgentHost};
pub use lifecycle::{AgentBackend, AgentResource, AgentSnapshot, DefaultBackend};
pub use provider::{ChatModel, OpenAiModel};
pub use tool_registry::{Tool, ToolRegistry};
pub use types::{ChatOutcome, FailureKind, HistoryEntry, Message};
