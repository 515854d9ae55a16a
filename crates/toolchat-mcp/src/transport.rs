use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{McpError, Result};

/// How to launch a tool server.
#[derive(Debug, Clone, Default)]
pub struct ServerCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment variables layered over the inherited environment.
    pub env: HashMap<String, String>,
}

impl ServerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A spawned tool-server subprocess speaking newline-delimited JSON-RPC
/// over its stdin/stdout.
pub struct StdioTransport {
    child: Mutex<Option<Child>>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
    label: String,
}

impl StdioTransport {
    /// Spawn the server process with piped stdio.
    ///
    /// The child is killed if the transport is dropped without `shutdown`.
    pub fn spawn(command: &ServerCommand) -> Result<Self> {
        let label = command.display();
        debug!("Spawning tool server: {}", label);

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(&command.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("child stdout unavailable".into()))?;

        // Drain stderr so a chatty server never blocks on a full pipe.
        let stderr_task = child.stderr.take().map(|stderr| {
            let label = command.program.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %label, "stderr: {}", line);
                }
            })
        });

        info!(pid = ?child.id(), "Tool server spawned: {}", label);

        Ok(Self {
            child: Mutex::new(Some(child)),
            stdin: Some(stdin),
            stdout: Some(stdout),
            stderr_task,
            label,
        })
    }

    /// Hand the pipes to a client. Can only be called once.
    pub fn take_pipes(&mut self) -> Result<(ChildStdout, ChildStdin)> {
        match (self.stdout.take(), self.stdin.take()) {
            (Some(stdout), Some(stdin)) => Ok((stdout, stdin)),
            _ => Err(McpError::Transport("pipes already taken".into())),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait up to `grace` for the process to exit on its own (it should once
    /// its stdin is closed), then kill it. Safe to call more than once.
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        let mut slot = self.child.lock().await;
        let Some(mut child) = slot.take() else {
            return Ok(());
        };

        let outcome = match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Tool server exited: {}", status);
                Ok(())
            }
            Ok(Err(e)) => Err(McpError::Io(e)),
            Err(_) => {
                warn!("Tool server did not exit within {:?}, killing", grace);
                child.kill().await.map_err(McpError::Io)
            }
        };

        if let Some(task) = &self.stderr_task {
            task.abort();
        }
        outcome
    }
}
