use toolchat_core::config::AppConfig;
use toolchat_core::{AgentHandle, Dispatcher};

/// Shared application state for the server.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(config: AppConfig, agent: AgentHandle) -> Self {
        let dispatcher = Dispatcher::new(agent, &config);
        Self { config, dispatcher }
    }

    pub fn agent(&self) -> &AgentHandle {
        self.dispatcher.host()
    }
}
