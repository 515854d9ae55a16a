use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fixed system instruction prepended to every conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a helpful AI assistant that can search the web, scrape and crawl \
websites, map site structure and extract structured data using the tools \
available to you. Your replies are shown in a chat window.

Formatting:
- Open with a one or two sentence answer or summary, then give details.
- Prefer short bullet lists over long paragraphs.
- Use **bold** for headings and key points.
- Keep sentences short and conversational; avoid jargon.
- Do not repeat the same information.
- Close with a suggested next step or an offer to dig deeper.";

/// Top-level application configuration, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub tool_server: ToolServerConfig,
    pub agent: AgentConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub system_prompt: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            tool_server: ToolServerConfig::default(),
            agent: AgentConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
        }
    }
}

impl AppConfig {
    /// Load configuration from default path (~/.config/toolchat/config.toml),
    /// falling back to defaults if the file doesn't exist.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Write current configuration to the default path.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;
        Ok(())
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("toolchat")
            .join("config.toml")
    }

    /// Apply process environment overrides (`PORT`).
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup("PORT") {
            match raw.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PORT value: {:?}", raw),
            }
        }
    }
}

/// LLM provider configuration (any OpenAI-compatible chat completions API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL for the OpenAI-compatible API.
    pub api_base: String,
    pub model: String,
    /// Explicit API key; takes precedence over `api_key_env`.
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta/openai".into(),
            model: "gemini-2.0-flash".into(),
            api_key: None,
            api_key_env: "GOOGLE_API_KEY".into(),
            max_tokens: 8192,
            temperature: 0.1,
        }
    }
}

impl ProviderConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// How to launch the tool-providing subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolServerConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Environment variable holding the credential the subprocess requires.
    pub credential_env: String,
    /// Explicit credential; takes precedence over `credential_env`.
    pub credential: Option<String>,
    /// Extra environment passed to the subprocess.
    pub env: HashMap<String, String>,
    pub handshake_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub exit_grace_ms: u64,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            command: "npx".into(),
            args: vec!["firecrawl-mcp".into()],
            credential_env: "FIRECRAWL_API_KEY".into(),
            credential: None,
            env: HashMap::new(),
            handshake_timeout_secs: 60,
            request_timeout_secs: 180,
            exit_grace_ms: 2000,
        }
    }
}

impl ToolServerConfig {
    pub fn resolve_credential(&self) -> Option<String> {
        self.credential
            .clone()
            .or_else(|| std::env::var(&self.credential_env).ok())
            .filter(|c| !c.trim().is_empty())
    }
}

/// Request processing and lifecycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Wall-clock bound on a single reasoning loop invocation.
    pub request_timeout_secs: u64,
    /// User messages longer than this are truncated (characters).
    pub max_input_chars: usize,
    /// Tool output shown in `content` is cut at this many characters.
    pub tool_output_preview_chars: usize,
    /// Model round-trips allowed per request.
    pub max_iterations: usize,
    /// How long startup waits for initialization before serving.
    pub startup_grace_secs: u64,
    /// Pause after tearing down the tool subprocess.
    pub cleanup_grace_ms: u64,
    /// Bound on waiting for cleanup at shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 120,
            max_input_chars: 175_000,
            tool_output_preview_chars: 1000,
            max_iterations: 25,
            startup_grace_secs: 2,
            cleanup_grace_ms: 100,
            shutdown_timeout_secs: 10,
        }
    }
}

impl AgentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_secs(self.startup_grace_secs)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Port (overridden by the `PORT` environment variable).
    pub port: u16,
    /// Enable permissive CORS.
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            cors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write logs to this file (None disables file logging).
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: Some(PathBuf::from("agent.log")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("gemini-2.0-flash"));
        assert!(toml_str.contains("firecrawl-mcp"));
        assert!(toml_str.contains("FIRECRAWL_API_KEY"));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider.model, config.provider.model);
        assert_eq!(parsed.agent.max_input_chars, 175_000);
        assert_eq!(parsed.agent.request_timeout_secs, 120);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[server]\nport = 9100\n\n[tool_server]\nargs = [\"-y\", \"firecrawl-mcp\"]\n",
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.tool_server.command, "npx");
        assert_eq!(config.tool_server.args, vec!["-y", "firecrawl-mcp"]);
        assert_eq!(config.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_port_env_override() {
        let mut config = AppConfig::default();
        config.apply_env_from(|k| (k == "PORT").then(|| "9001".to_string()));
        assert_eq!(config.server.port, 9001);

        config.apply_env_from(|k| (k == "PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.server.port, 9001);

        config.apply_env_from(|_| None);
        assert_eq!(config.server.port, 9001);
    }

    #[test]
    fn test_explicit_credential_wins() {
        let mut ts = ToolServerConfig::default();
        ts.credential_env = "TOOLCHAT_TEST_UNSET_VAR_91c2".into();
        assert_eq!(ts.resolve_credential(), None);

        ts.credential = Some("fc-123".into());
        assert_eq!(ts.resolve_credential().as_deref(), Some("fc-123"));

        ts.credential = Some("   ".into());
        assert_eq!(ts.resolve_credential(), None);
    }
}
