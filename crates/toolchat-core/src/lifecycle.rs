//! Agent Lifecycle Manager: builds the Agent Resource and tears it down.
//!
//! [`AgentResource`] is only ever touched by the background host task (see
//! [`crate::host`]). Other contexts observe it through the
//! [`AgentSnapshot`] published on a watch channel after every transition.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::agent_loop::AgentRuntime;
use crate::bridge::{BridgeTool, McpBridge, ToolBridge};
use crate::config::{AppConfig, ProviderConfig, ToolServerConfig};
use crate::error::AgentError;
use crate::provider::{ChatModel, OpenAiModel};
use crate::tool_registry::ToolRegistry;

/// Constructs the external collaborators the agent is composed from.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    fn build_model(&self, config: &ProviderConfig) -> Result<Arc<dyn ChatModel>, AgentError>;

    /// Spawn the tool server and complete its handshake.
    async fn connect_tools(
        &self,
        config: &ToolServerConfig,
        credential: &str,
    ) -> Result<Arc<dyn ToolBridge>, AgentError>;
}

/// OpenAI-compatible model plus a stdio MCP tool server.
pub struct DefaultBackend;

#[async_trait]
impl AgentBackend for DefaultBackend {
    fn build_model(&self, config: &ProviderConfig) -> Result<Arc<dyn ChatModel>, AgentError> {
        let model = OpenAiModel::from_config(config)?;
        Ok(Arc::new(model))
    }

    async fn connect_tools(
        &self,
        config: &ToolServerConfig,
        credential: &str,
    ) -> Result<Arc<dyn ToolBridge>, AgentError> {
        let bridge = McpBridge::connect(config, credential).await?;
        Ok(Arc::new(bridge))
    }
}

/// Read-only view of the Agent Resource for other contexts.
#[derive(Clone, Default)]
pub struct AgentSnapshot {
    pub initialized: bool,
    pub tools: Vec<String>,
    pub runtime: Option<Arc<AgentRuntime>>,
}

/// The process-wide composition of model, tool connection and runtime.
///
/// `initialized` is true only while all three are held.
pub struct AgentResource {
    config: AppConfig,
    backend: Arc<dyn AgentBackend>,
    model: Option<Arc<dyn ChatModel>>,
    bridge: Option<Arc<dyn ToolBridge>>,
    runtime: Option<Arc<AgentRuntime>>,
    tools: Vec<String>,
    initialized: bool,
    state_tx: watch::Sender<AgentSnapshot>,
}

impl AgentResource {
    pub fn new(
        config: AppConfig,
        backend: Arc<dyn AgentBackend>,
    ) -> (Self, watch::Receiver<AgentSnapshot>) {
        let (state_tx, state_rx) = watch::channel(AgentSnapshot::default());
        let resource = Self {
            config,
            backend,
            model: None,
            bridge: None,
            runtime: None,
            tools: Vec::new(),
            initialized: false,
            state_tx,
        };
        (resource, state_rx)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model.as_ref().map(|m| m.model_name())
    }

    /// Run the fail-fast initialization sequence. On failure everything
    /// acquired so far is released before the error is returned.
    pub async fn initialize(&mut self) -> Result<(), AgentError> {
        if self.initialized {
            warn!("Agent already initialized, ignoring");
            return Ok(());
        }

        match self.acquire().await {
            Ok(()) => {
                self.initialized = true;
                self.publish();
                info!(tools = self.tools.len(), "Agent initialized");
                Ok(())
            }
            Err(e) => {
                warn!(kind = e.kind(), "Agent initialization failed, releasing resources");
                self.cleanup().await;
                Err(e)
            }
        }
    }

    async fn acquire(&mut self) -> Result<(), AgentError> {
        let tool_config = &self.config.tool_server;
        let credential = tool_config.resolve_credential().ok_or_else(|| {
            AgentError::Config(format!(
                "{} environment variable is required",
                tool_config.credential_env
            ))
        })?;

        let model = self
            .backend
            .build_model(&self.config.provider)
            .map_err(|e| match e {
                AgentError::Config(_) => e,
                other => AgentError::Config(format!("Failed to initialize model: {}", other)),
            })?;
        info!(model = %model.model_name(), "Model client ready");
        self.model = Some(model.clone());

        let bridge = self
            .backend
            .connect_tools(tool_config, &credential)
            .await
            .map_err(|e| match e {
                AgentError::Session(_) => e,
                other => AgentError::Session(format!("Failed to initialize MCP client: {}", other)),
            })?;
        self.bridge = Some(bridge.clone());

        let schemas = bridge.list_tools().await.map_err(|e| match e {
            AgentError::ToolDiscovery(_) => e,
            other => AgentError::ToolDiscovery(format!("Failed to load MCP tools: {}", other)),
        })?;
        info!("Loaded {} tools", schemas.len());

        let mut registry = ToolRegistry::new();
        for schema in schemas {
            registry.register(Arc::new(BridgeTool::new(schema, bridge.clone())));
        }

        let runtime = AgentRuntime::new(
            model,
            Arc::new(registry),
            self.config.agent.max_iterations,
        )
        .map_err(|e| match e {
            AgentError::Session(_) => e,
            other => AgentError::Session(format!("Failed to create agent: {}", other)),
        })?;
        self.tools = runtime.tool_names();
        self.runtime = Some(Arc::new(runtime));
        Ok(())
    }

    /// Release the tool session, then the subprocess. Failures are logged
    /// and do not stop the next step. Safe to call any number of times.
    pub async fn cleanup(&mut self) {
        self.initialized = false;
        self.runtime = None;
        self.tools.clear();
        self.publish();

        if let Some(bridge) = self.bridge.take() {
            info!("Closing tool session");
            if let Err(e) = bridge.close_session().await {
                warn!("Error closing session: {}", e);
            }
            info!("Stopping tool server");
            if let Err(e) = bridge.close_transport().await {
                warn!("Error closing MCP client: {}", e);
            }
            tokio::time::sleep(self.config.agent.cleanup_grace()).await;
        } else {
            debug!("Cleanup: no tool session held");
        }

        self.model = None;
        self.publish();
    }

    fn publish(&self) {
        let snapshot = AgentSnapshot {
            initialized: self.initialized,
            tools: self.tools.clone(),
            runtime: if self.initialized { self.runtime.clone() } else { None },
        };
        self.state_tx.send_replace(snapshot);
    }
}
