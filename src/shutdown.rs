//! Graceful shutdown of a cohort node.
//!
//! One [`ShutdownCoordinator`] is shared by the HTTP server, the event pump,
//! the cohort watcher and the lineage promoter. Background loops select on
//! [`ShutdownCoordinator::wait_for_shutdown`]; the promoter also polls
//! [`ShutdownCoordinator::is_shutting_down`] between processes.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

/// Maximum time to wait for graceful shutdown before force exit.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shutdown coordinator for managing graceful service termination.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    /// One-shot notification for subscribers.
    shutdown_tx: broadcast::Sender<()>,
    /// Shutdown state for late subscribers and `select!` loops.
    shutdown_watch: watch::Receiver<bool>,
    /// Sender half of `shutdown_watch`, shared by every clone.
    shutdown_watch_tx: Arc<watch::Sender<bool>>,
    /// Set once by the first `shutdown` call.
    is_shutting_down: Arc<AtomicBool>,
    /// How long services get to drain.
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator with the default drain timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_SHUTDOWN_TIMEOUT)
    }

    /// Create a coordinator with a custom drain timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (shutdown_watch_tx, shutdown_watch) = watch::channel(false);

        Self {
            shutdown_tx,
            shutdown_watch,
            shutdown_watch_tx: Arc::new(shutdown_watch_tx),
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    /// Subscribe to shutdown signals.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Get a watch receiver for shutdown status.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.shutdown_watch.clone()
    }

    /// Check whether shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Initiate shutdown. Later calls are no-ops.
    pub fn shutdown(&self) {
        if self
            .is_shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Initiating graceful shutdown");
            let _ = self.shutdown_watch_tx.send(true);
            let _ = self.shutdown_tx.send(());
        }
    }

    /// Resolves once shutdown has been initiated (for use in `select!`).
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_watch.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Drain timeout for registered services.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns OS signals into a shutdown.
pub struct SignalHandler {
    coordinator: ShutdownCoordinator,
}

impl SignalHandler {
    /// Create a signal handler that triggers `coordinator`.
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self { coordinator }
    }

    /// Wait for SIGTERM or SIGINT, then initiate shutdown.
    ///
    /// If the handlers cannot be installed the node keeps running and can
    /// still be stopped through the coordinator.
    #[cfg(unix)]
    pub async fn run(self) {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!(error = %e, "Failed to install signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = self.coordinator.wait_for_shutdown() => return,
        }

        self.coordinator.shutdown();
    }

    /// Wait for Ctrl+C, then initiate shutdown.
    #[cfg(not(unix))]
    pub async fn run(self) {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to install Ctrl+C handler");
                    return;
                }
                info!("Received Ctrl+C");
            }
            _ = self.coordinator.wait_for_shutdown() => return,
        }
        self.coordinator.shutdown();
    }
}

/// A running service that can be gracefully shut down.
pub struct ServiceHandle {
    /// Service name used in logs.
    name: String,
    /// Runs once, on shutdown.
    shutdown_fn: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
}

impl ServiceHandle {
    /// Create a handle that runs `shutdown_fn` on shutdown.
    pub fn new<S, F>(name: S, shutdown_fn: F) -> Self
    where
        S: Into<String>,
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            shutdown_fn: Some(Box::pin(shutdown_fn)),
        }
    }

    /// A service whose shutdown is waiting for its task to finish.
    pub fn task<S: Into<String>>(name: S, handle: tokio::task::JoinHandle<()>) -> Self {
        let name = name.into();
        let task_name = name.clone();
        Self::new(name, async move {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(service = %task_name, error = %e, "Service task panicked");
                }
            }
        })
    }

    /// Get the service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the shutdown future. Later calls do nothing.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown_fn) = self.shutdown_fn.take() {
            info!(service = %self.name, "Shutting down service");
            shutdown_fn.await;
        }
    }
}

/// Shuts registered services down in reverse order of registration.
pub struct ShutdownManager {
    coordinator: ShutdownCoordinator,
    services: Vec<ServiceHandle>,
}

impl ShutdownManager {
    /// Create a manager driven by `coordinator`.
    pub fn new(coordinator: ShutdownCoordinator) -> Self {
        Self {
            coordinator,
            services: Vec::new(),
        }
    }

    /// Register a service for managed shutdown.
    pub fn register(&mut self, handle: ServiceHandle) {
        info!(service = %handle.name(), "Registered service for managed shutdown");
        self.services.push(handle);
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Wait for the shutdown signal, then stop every service within the
    /// coordinator's timeout. Returns false if the timeout was hit.
    pub async fn run(mut self) -> bool {
        self.coordinator.wait_for_shutdown().await;

        info!(services = self.services.len(), "Shutdown initiated");
        let timeout = self.coordinator.timeout();

        let shutdown_future = async {
            while let Some(mut service) = self.services.pop() {
                service.shutdown().await;
            }
        };

        if tokio::time::timeout(timeout, shutdown_future).await.is_err() {
            error!(timeout_ms = timeout.as_millis() as u64, "Shutdown timed out");
            false
        } else {
            info!("All services shut down");
            true
        }
    }
}

/// Extension trait for futures to make them shutdown-aware.
pub trait ShutdownAware: Sized {
    /// Run until completion or shutdown; `None` if shutdown came first.
    fn with_shutdown(
        self,
        coordinator: &ShutdownCoordinator,
    ) -> impl Future<Output = Option<Self::Output>> + Send
    where
        Self: Future + Send,
        Self::Output: Send;
}

impl<F> ShutdownAware for F
where
    F: Future + Send,
    F::Output: Send,
{
    async fn with_shutdown(self, coordinator: &ShutdownCoordinator) -> Option<F::Output> {
        tokio::select! {
            result = self => Some(result),
            _ = coordinator.wait_for_shutdown() => None,
        }
    }
}
