//! Stdio MCP client used to reach the tool-providing subprocess.
//!
//! [`McpConnection::connect`] spawns the server, runs the handshake and
//! returns only once the session is usable; on any failure the process is
//! torn down before the error is returned.

pub mod client;
pub mod error;
pub mod protocol;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

pub use client::McpClient;
pub use error::{McpError, Result};
pub use protocol::{CallToolResult, ContentBlock, Implementation, InitializeResult, McpTool};
pub use transport::{ServerCommand, StdioTransport};

/// Timeouts governing a connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    /// How long the process gets to exit after its stdin is closed.
    pub exit_grace: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(180),
            exit_grace: Duration::from_secs(2),
        }
    }
}

/// A handshaken session plus the subprocess it runs over.
pub struct McpConnection {
    pub client: Arc<McpClient>,
    pub transport: StdioTransport,
    pub server: InitializeResult,
    options: ConnectOptions,
}

impl McpConnection {
    pub async fn connect(
        command: &ServerCommand,
        client_info: &Implementation,
        options: ConnectOptions,
    ) -> Result<Self> {
        let mut transport = StdioTransport::spawn(command)?;
        let (stdout, stdin) = match transport.take_pipes() {
            Ok(pipes) => pipes,
            Err(e) => {
                abandon(&transport, options.exit_grace).await;
                return Err(e);
            }
        };

        let client = Arc::new(McpClient::new(stdout, stdin, options.request_timeout));

        let handshake =
            match tokio::time::timeout(options.handshake_timeout, client.initialize(client_info))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(McpError::Timeout("initialize".into())),
            };

        match handshake {
            Ok(server) => Ok(Self {
                client,
                transport,
                server,
                options,
            }),
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    warn!("Error closing half-open MCP session: {}", close_err);
                }
                abandon(&transport, options.exit_grace).await;
                Err(e)
            }
        }
    }

    /// Close the session, then the process.
    pub async fn close(&self) -> Result<()> {
        let session = self.client.close().await;
        let process = self.transport.shutdown(self.options.exit_grace).await;
        session.and(process)
    }

    pub fn exit_grace(&self) -> Duration {
        self.options.exit_grace
    }
}

async fn abandon(transport: &StdioTransport, grace: Duration) {
    if let Err(e) = transport.shutdown(grace).await {
        warn!("Error stopping tool server {}: {}", transport.label(), e);
    }
}
