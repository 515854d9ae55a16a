use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use toolchat_core::bridge::{McpBridge, ToolBridge};
use toolchat_core::config::AppConfig;
use toolchat_core::{AgentHost, DefaultBackend};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "toolchat",
    about = "Chat API for a tool-using LLM agent backed by an MCP server",
    version,
    author
)]
struct Cli {
    /// Path to config file (default: ~/.config/toolchat/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the model name
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve {
        /// Bind host
        #[arg(long)]
        host: Option<String>,
        /// Bind port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Connect to the tool server and list its tools
    Tools,

    /// Show or manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Initialize default configuration file
    Init,
    /// Print config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Ignoring unreadable .env file: {}", e);
        }
    }

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AppConfig::load()?,
    };
    config.apply_env();
    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }

    match cli.command {
        Some(Commands::Config { action }) => handle_config_command(action, &config),
        Some(Commands::Tools) => {
            init_tracing(cli.verbose, None)?;
            list_tools(&config).await
        }
        Some(Commands::Serve { host, port }) => {
            if let Some(h) = host {
                config.server.host = h;
            }
            if let Some(p) = port {
                config.server.port = p;
            }
            init_tracing(cli.verbose, config.logging.file.as_deref())?;
            serve(config).await
        }
        None => {
            init_tracing(cli.verbose, config.logging.file.as_deref())?;
            serve(config).await
        }
    }
}

fn init_tracing(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("toolchat=info,tower_http=info,warn"))
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();
    Ok(())
}

async fn serve(config: AppConfig) -> Result<()> {
    tracing::info!(
        "Starting agent, model: {}, tool server: {} {}",
        config.provider.model,
        config.tool_server.command,
        config.tool_server.args.join(" "),
    );

    let agent = AgentHost::start(config.clone(), Arc::new(DefaultBackend))
        .context("starting agent host thread")?;

    // Give initialization a head start; /health reports the real state.
    let grace = config.agent.startup_grace();
    if tokio::time::timeout(grace, agent.wait_initialized()).await.is_err() {
        tracing::warn!("Agent not ready after {:?}; serving while it initializes", grace);
    }

    let base = format!("http://{}:{}", config.server.host, config.server.port);
    tracing::info!("Chat endpoint:   POST {}/chat", base);
    tracing::info!("Health endpoint: GET  {}/health", base);
    tracing::info!("Tools endpoint:  GET  {}/tools", base);

    let shutdown_wait = config.agent.shutdown_timeout();
    let result = toolchat_server::serve(config, agent.clone(), shutdown_signal()).await;

    tracing::info!("Server stopped, cleaning up agent");
    if !agent.shutdown(shutdown_wait).await {
        tracing::warn!("Agent cleanup abandoned");
    }
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

async fn list_tools(config: &AppConfig) -> Result<()> {
    let credential = config.tool_server.resolve_credential().with_context(|| {
        format!(
            "{} environment variable is required",
            config.tool_server.credential_env
        )
    })?;

    let bridge = McpBridge::connect(&config.tool_server, &credential).await?;
    let listed = bridge.list_tools().await;
    if let Err(e) = bridge.close_session().await {
        tracing::warn!("Error closing session: {}", e);
    }
    if let Err(e) = bridge.close_transport().await {
        tracing::warn!("Error closing MCP client: {}", e);
    }

    let tools = listed?;
    println!("{} tools available:", tools.len());
    for tool in tools {
        println!("  {:<28} {}", tool.name, tool.description);
    }
    Ok(())
}

fn handle_config_command(action: Option<ConfigAction>, config: &AppConfig) -> Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
        }
        Some(ConfigAction::Init) => {
            let path = AppConfig::default_path();
            if path.exists() {
                println!("Config already exists at: {}", path.display());
            } else {
                config.save()?;
                println!("Created default config at: {}", path.display());
            }
        }
        Some(ConfigAction::Path) => {
            println!("{}", AppConfig::default_path().display());
        }
    }
    Ok(())
}
