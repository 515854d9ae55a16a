//! Request/response multiplexing over a line-delimited JSON-RPC stream.
//!
//! Each request gets a fresh numeric id and a oneshot waiter; a single reader
//! task routes responses back by id, so any number of requests may be in
//! flight at once. Writes are serialized behind a mutex so frames never
//! interleave on the pipe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{McpError, Result};
use crate::protocol::{
    initialize_params, tools_call_params, tools_list_params, CallToolResult, Implementation,
    Incoming, InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcReply, JsonRpcRequest,
    McpTool, ToolsListResult, ERROR_METHOD_NOT_FOUND, METHOD_INITIALIZE, METHOD_INITIALIZED,
    METHOD_PING, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type SharedWriter = Arc<Mutex<Option<BoxedWriter>>>;
type ResponseWaiter = oneshot::Sender<std::result::Result<Value, JsonRpcError>>;
type PendingMap = Arc<Mutex<HashMap<u64, ResponseWaiter>>>;

/// Upper bound on `tools/list` pages, in case a server keeps handing out cursors.
const MAX_LIST_PAGES: usize = 64;

pub struct McpClient {
    writer: SharedWriter,
    pending: PendingMap,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl McpClient {
    /// Start a client over the given byte streams. Spawns the reader task on
    /// the current runtime.
    pub fn new<R, W>(reader: R, writer: W, request_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: SharedWriter = Arc::new(Mutex::new(Some(Box::new(writer))));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let task = tokio::spawn(read_loop(reader, pending.clone(), writer.clone()));

        Self {
            writer,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            reader: Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// True once the server's output stream has ended.
    async fn reader_finished(&self) -> bool {
        self.reader
            .lock()
            .await
            .as_ref()
            .map_or(true, |task| task.is_finished())
    }

    /// Send a request and wait for its response.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.is_closed() || self.reader_finished().await {
            return Err(McpError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = write_frame(&self.writer, &JsonRpcRequest::new(id, method, params)).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }
        debug!(id, method, "MCP request sent");

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(err))) => Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            }),
            Ok(Err(_)) => Err(McpError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::Timeout(method.to_string()))
            }
        }
    }

    async fn request_typed<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T> {
        let value = self.request(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(McpError::Closed);
        }
        write_frame(&self.writer, &JsonRpcNotification::new(method, params)).await
    }

    /// Perform the `initialize` / `notifications/initialized` handshake.
    pub async fn initialize(&self, client: &Implementation) -> Result<InitializeResult> {
        let result: InitializeResult = self
            .request_typed(METHOD_INITIALIZE, Some(initialize_params(client)))
            .await?;

        match &result.server_info {
            Some(server) => info!(
                protocol = %result.protocol_version,
                "MCP handshake complete with {} {}",
                server.name,
                server.version
            ),
            None => info!(protocol = %result.protocol_version, "MCP handshake complete"),
        }

        self.notify(METHOD_INITIALIZED, None).await?;
        Ok(result)
    }

    /// List every tool the server exposes, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let page: ToolsListResult = self
                .request_typed(METHOD_TOOLS_LIST, tools_list_params(cursor.as_deref()))
                .await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        warn!("tools/list pagination exceeded {} pages, truncating", MAX_LIST_PAGES);
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult> {
        debug!("Calling MCP tool: {}", name);
        self.request_typed(METHOD_TOOLS_CALL, Some(tools_call_params(name, arguments)))
            .await
    }

    /// Stop the reader, close our end of the pipe and fail outstanding waiters.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(task) = self.reader.lock().await.take() {
            task.abort();
        }

        // Dropping the senders wakes every waiter with `Closed`.
        self.pending.lock().await.clear();

        let writer = self.writer.lock().await.take();
        if let Some(mut w) = writer {
            w.shutdown().await?;
        }
        Ok(())
    }
}

async fn write_frame<T: Serialize>(writer: &SharedWriter, frame: &T) -> Result<()> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');

    let mut guard = writer.lock().await;
    let w = guard.as_mut().ok_or(McpError::Closed)?;
    w.write_all(line.as_bytes()).await?;
    w.flush().await?;
    Ok(())
}

async fn read_loop<R>(reader: R, pending: PendingMap, writer: SharedWriter)
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("MCP server closed its output stream");
                break;
            }
            Err(e) => {
                warn!("MCP read error: {}", e);
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match Incoming::parse(trimmed) {
            Ok(Some(Incoming::Response { id, outcome })) => {
                match pending.lock().await.remove(&id) {
                    Some(waiter) => {
                        let _ = waiter.send(outcome);
                    }
                    None => warn!("Received response for unknown request ID: {}", id),
                }
            }
            Ok(Some(Incoming::Notification { method })) => {
                debug!("Received MCP notification: method={}", method);
            }
            Ok(Some(Incoming::Request { id, method })) => {
                let reply = if method == METHOD_PING {
                    JsonRpcReply::result(id, json!({}))
                } else {
                    warn!("Unsupported request from MCP server: {}", method);
                    JsonRpcReply::error(id, ERROR_METHOD_NOT_FOUND, format!("Method not found: {}", method))
                };
                if let Err(e) = write_frame(&writer, &reply).await {
                    warn!("Failed to answer MCP server request: {}", e);
                }
            }
            Ok(None) => debug!("Ignoring unroutable MCP frame"),
            Err(e) => debug!("Ignoring non-JSON line from MCP server: {} ({})", trimmed, e),
        }
    }

    // Stream is gone: nothing will ever answer the remaining waiters.
    pending.lock().await.clear();
}
