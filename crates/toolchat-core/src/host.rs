//! Dedicated background context that owns the Agent Resource.
//!
//! A named OS thread runs a single-threaded tokio runtime. Initialization,
//! every reasoning loop invocation and cleanup execute there; the request
//! context reaches it only through [`AgentHandle::submit`].

use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::lifecycle::{AgentBackend, AgentResource, AgentSnapshot};

const THREAD_NAME: &str = "agent-host";

pub struct AgentHost;

impl AgentHost {
    /// Spawn the background thread and begin initialization there. Returns
    /// immediately; readiness is observed through the returned handle.
    pub fn start(config: AppConfig, backend: Arc<dyn AgentBackend>) -> std::io::Result<AgentHandle> {
        let (resource, state) = AgentResource::new(config, backend);
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let runtime_slot: Arc<OnceLock<Handle>> = Arc::new(OnceLock::new());

        let slot = runtime_slot.clone();
        std::thread::Builder::new()
            .name(THREAD_NAME.into())
            .spawn(move || {
                let runtime = match Builder::new_current_thread()
                    .enable_all()
                    .thread_name(THREAD_NAME)
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("Failed to start agent runtime: {}", e);
                        return;
                    }
                };
                let _ = slot.set(runtime.handle().clone());
                runtime.block_on(host_main(resource, shutdown_rx));
                info!("Agent host stopped");
            })?;

        Ok(AgentHandle {
            runtime: runtime_slot,
            state,
            shutdown_tx,
        })
    }
}

async fn host_main(
    mut resource: AgentResource,
    mut shutdown_rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
) {
    info!("Initializing agent");
    if let Err(e) = resource.initialize().await {
        error!(kind = e.kind(), "Failed to initialize agent: {}", e);
    }

    // Runs until asked to stop, or until every handle is gone.
    let done = shutdown_rx.recv().await;
    info!("Shutting down agent");
    resource.cleanup().await;
    if let Some(done) = done {
        let _ = done.send(());
    }
}

/// Cloneable access to the background context from any other context.
#[derive(Clone)]
pub struct AgentHandle {
    runtime: Arc<OnceLock<Handle>>,
    state: watch::Receiver<AgentSnapshot>,
    shutdown_tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl AgentHandle {
    pub fn snapshot(&self) -> AgentSnapshot {
        self.state.borrow().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.borrow().initialized
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.state.borrow().tools.clone()
    }

    /// Resolves once initialization has completed. Never resolves if it
    /// failed; callers bound the wait themselves.
    pub async fn wait_initialized(&self) -> bool {
        let mut state = self.state.clone();
        let ready = state.wait_for(|s| s.initialized).await.is_ok();
        ready
    }

    /// Run `fut` on the background context and wait for it.
    ///
    /// `None` when the background context does not exist (yet). A task that
    /// panicked or was cancelled by runtime shutdown yields `Some(Err)`.
    pub async fn submit<F, T>(&self, fut: F) -> Option<Result<T, JoinError>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.runtime.get()?;
        Some(handle.spawn(fut).await)
    }

    /// Ask the background context to clean up and stop. Returns `false` if it
    /// did not confirm within `wait`.
    pub async fn shutdown(&self, wait: Duration) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        if self.shutdown_tx.send(done_tx).is_err() {
            return true;
        }
        match tokio::time::timeout(wait, done_rx).await {
            Ok(_) => true,
            Err(_) => {
                warn!("Agent cleanup did not finish within {:?}, abandoning", wait);
                false
            }
        }
    }

    /// Handle with no background context behind it.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (_state_tx, state) = watch::channel(AgentSnapshot {
            initialized: true,
            ..Default::default()
        });
        let (shutdown_tx, _shutdown_rx) = mpsc::unbounded_channel();
        Self {
            runtime: Arc::new(OnceLock::new()),
            state,
            shutdown_tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::tests::{test_config, FailAt, FakeBackend};
    use std::sync::atomic::Ordering;

    const WAIT: Duration = Duration::from_secs(5);

    fn handle_panics() -> bool {
        true
    }

    #[tokio::test]
    async fn test_start_initializes_and_shutdown_cleans_up() {
        let backend = Arc::new(FakeBackend::new(FailAt::Nowhere));
        let handle = AgentHost::start(test_config(), backend.clone()).unwrap();

        assert!(tokio::time::timeout(WAIT, handle.wait_initialized()).await.unwrap());
        assert!(handle.is_initialized());
        assert_eq!(handle.tool_names().len(), 2);

        assert!(handle.shutdown(WAIT).await);
        assert!(!handle.is_initialized());
        assert_eq!(backend.bridge.session_closes.load(Ordering::SeqCst), 1);

        // Second shutdown finds the host gone.
        assert!(handle.shutdown(WAIT).await);
    }

    #[tokio::test]
    async fn test_submit_runs_on_host_thread() {
        let handle = AgentHost::start(test_config(), Arc::new(FakeBackend::new(FailAt::Nowhere))).unwrap();
        tokio::time::timeout(WAIT, handle.wait_initialized()).await.unwrap();

        let name = handle
            .submit(async { std::thread::current().name().map(str::to_string) })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(name.as_deref(), Some(THREAD_NAME));

        handle.shutdown(WAIT).await;
        // Runtime is gone; submission no longer completes successfully.
        let after = handle.submit(async { 1 }).await;
        assert!(!matches!(after, Some(Ok(_))));
    }

    #[tokio::test]
    async fn test_failed_initialize_stays_uninitialized() {
        let handle = AgentHost::start(test_config(), Arc::new(FakeBackend::new(FailAt::Discovery))).unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(200), handle.wait_initialized())
            .await
            .is_err());
        assert!(!handle.is_initialized());
        assert!(handle.tool_names().is_empty());
        handle.shutdown(WAIT).await;
    }

    #[tokio::test]
    async fn test_detached_handle_cannot_submit() {
        let handle = AgentHandle::detached();
        assert!(handle.submit(async { 1 }).await.is_none());
    }

    #[tokio::test]
    async fn test_submitted_panic_is_reported() {
        let handle = AgentHost::start(test_config(), Arc::new(FakeBackend::new(FailAt::Nowhere))).unwrap();
        assert!(tokio::time::timeout(WAIT, handle.wait_initialized()).await.unwrap());
        let result = handle
            .submit(async {
                if handle_panics() {
                    panic!("boom");
                }
                1
            })
            .await;
        assert!(matches!(result, Some(Err(e)) if e.is_panic()));
        handle.shutdown(WAIT).await;
    }
}
