//! Task spawning and graceful shutdown for long running service tasks.
//!
//! The [`TaskManager`] owns the process-wide shutdown signal and watches for
//! panics in critical tasks; the [`TaskExecutor`] is the handle used to spawn
//! them. Every spawned task gets a [`ShutdownGuard`] it must poll or await so
//! that a ctrl-c or a sibling panic tears the whole process down cleanly.

use std::{
    any::Any,
    fmt::{Display, Formatter},
    future::Future,
    panic,
    pin::pin,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::{future::select, FutureExt, TryFutureExt};
use tokio::{
    runtime::Handle,
    sync::{futures::Notified, mpsc, Notify},
};
use tracing::{debug, error, info, warn};

/// Error with the name of the task that panicked and an error downcasted to
/// string, if possible.
#[derive(Debug, thiserror::Error)]
pub struct PanickedTaskError {
    task_name: String,
    error: Option<String>,
}

impl Display for PanickedTaskError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let task_name = &self.task_name;
        if let Some(error) = &self.error {
            write!(f, "Critical task `{task_name}` panicked: `{error}`")
        } else {
            write!(f, "Critical task `{task_name}` panicked")
        }
    }
}

impl PanickedTaskError {
    fn new(task_name: &str, error: Box<dyn Any>) -> Self {
        let error = match error.downcast::<String>() {
            Ok(value) => Some(*value),
            Err(error) => match error.downcast::<&str>() {
                Ok(value) => Some(value.to_string()),
                Err(_) => None,
            },
        };

        Self {
            task_name: task_name.to_string(),
            error,
        }
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }
}

/// Sending half of the process shutdown signal. Cloneable.
#[derive(Debug, Clone)]
pub struct ShutdownSignal(Arc<AtomicBool>, Arc<Notify>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)), Arc::new(Notify::new()))
    }

    /// Send shutdown signal to all subscribers.
    pub fn send(&self) {
        self.0.fetch_or(true, Ordering::Relaxed);
        self.1.notify_waiters();
    }

    fn subscribe(&self) -> Shutdown {
        Shutdown(self.clone())
    }

    /// Creates a standalone guard not tracked by any [`TaskManager`]. Useful
    /// when a shutdown observer is needed outside a managed task.
    pub fn guard(&self) -> ShutdownGuard {
        ShutdownGuard::new(self.subscribe(), Arc::new(AtomicUsize::new(0)))
    }

    fn should_shutdown(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn notified(&self) -> Notified<'_> {
        self.1.notified()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of the shutdown signal.
struct Shutdown(ShutdownSignal);

impl Shutdown {
    fn should_shutdown(&self) -> bool {
        self.0.should_shutdown()
    }

    async fn wait_for_shutdown(&self) {
        while !self.should_shutdown() {
            self.0.notified().await
        }
    }
}

/// Shutdown receiver handed to spawned tasks. Holding one counts the task as
/// pending for the graceful shutdown wait.
pub struct ShutdownGuard(Shutdown, Arc<AtomicUsize>);

impl ShutdownGuard {
    fn new(shutdown: Shutdown, counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(shutdown, counter)
    }

    /// Check if shutdown signal has been sent.
    pub fn should_shutdown(&self) -> bool {
        self.0.should_shutdown()
    }

    /// Waits until shutdown signal is sent.
    pub async fn wait_for_shutdown(&self) {
        self.0.wait_for_shutdown().await
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.1.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Spawns and tracks long running tasks, watches for task panics and manages
/// graceful shutdown on critical task panics and external signals.
pub struct TaskManager {
    /// Handle to the tokio runtime tasks get spawned on.
    tokio_handle: Handle,
    /// Sender tasks use to report their own panic.
    panicked_tasks_tx: mpsc::UnboundedSender<PanickedTaskError>,
    /// Receiver the monitor waits on for the first panic.
    panicked_tasks_rx: mpsc::UnboundedReceiver<PanickedTaskError>,
    /// Process-wide shutdown signal.
    shutdown_signal: ShutdownSignal,
    /// Pending tasks counter for graceful shutdown.
    pending_tasks_counter: Arc<AtomicUsize>,
}

impl TaskManager {
    pub fn new(tokio_handle: Handle) -> Self {
        let (panicked_tasks_tx, panicked_tasks_rx) = mpsc::unbounded_channel();

        Self {
            tokio_handle,
            panicked_tasks_tx,
            panicked_tasks_rx,
            shutdown_signal: ShutdownSignal::new(),
            pending_tasks_counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn executor(&self) -> TaskExecutor {
        TaskExecutor {
            tokio_handle: self.tokio_handle.clone(),
            panicked_tasks_tx: self.panicked_tasks_tx.clone(),
            shutdown_signal: self.shutdown_signal.clone(),
            pending_tasks_counter: self.pending_tasks_counter.clone(),
        }
    }

    /// Get shutdown signal trigger.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown_signal.clone()
    }

    /// Listens for ctrl-c and triggers shutdown when received.
    pub fn start_signal_listeners(&self) {
        let shutdown_signal = self.shutdown_signal();

        self.tokio_handle.spawn(async move {
            let _ = tokio::signal::ctrl_c().into_future().await;
            warn!("got INT, initiating shutdown");
            shutdown_signal.send()
        });
    }

    /// Blocks until a critical task panics or a shutdown is signalled, then
    /// shuts everything down. Returns the first panic as an error, if any.
    pub fn monitor(mut self, shutdown_timeout: Option<Duration>) -> Result<(), PanickedTaskError> {
        let res = self.wait_for_task_panic(self.shutdown_signal.subscribe());

        self.shutdown_signal.send();
        let shutdown_in_time = self.wait_for_graceful_shutdown(shutdown_timeout);

        if !shutdown_in_time {
            info!("shutdown timeout expired, forcing shutdown");
        }

        res
    }

    /// Waits until any task panics, returning `Err(first_panic_error)`, or
    /// `Ok(())` if a shutdown is signalled first.
    fn wait_for_task_panic(&mut self, shutdown: Shutdown) -> Result<(), PanickedTaskError> {
        self.tokio_handle.block_on(async {
            tokio::select! {
                msg = self.panicked_tasks_rx.recv() => {
                    match msg {
                        Some(error) => Err(error),
                        None => Ok(())
                    }
                }
                _ = shutdown.wait_for_shutdown() => {
                    Ok(())
                }
            }
        })
    }

    /// Waits for all pending tasks to finish, up to `timeout` if provided.
    /// Returns false if tasks have not completed by then.
    fn wait_for_graceful_shutdown(&self, timeout: Option<Duration>) -> bool {
        let when = timeout.map(|t| std::time::Instant::now() + t);
        while self.pending_tasks_counter.load(Ordering::Relaxed) > 0 {
            if when
                .map(|when| std::time::Instant::now() > when)
                .unwrap_or(false)
            {
                debug!("graceful shutdown timed out");
                return false;
            }
            std::hint::spin_loop();
        }

        debug!("gracefully shut down");
        true
    }
}

/// A type that can spawn new critical tasks.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    tokio_handle: Handle,
    panicked_tasks_tx: mpsc::UnboundedSender<PanickedTaskError>,
    shutdown_signal: ShutdownSignal,
    pending_tasks_counter: Arc<AtomicUsize>,
}

impl TaskExecutor {
    pub fn handle(&self) -> &Handle {
        &self.tokio_handle
    }

    /// Spawns a future on the tokio runtime. The task is ended early if a
    /// shutdown is signalled; a panic inside it triggers process shutdown.
    pub fn spawn_critical_async(
        &self,
        name: &'static str,
        fut: impl Future<Output = ()> + Send + 'static,
    ) -> tokio::task::JoinHandle<()> {
        let panicked_tasks_tx = self.panicked_tasks_tx.clone();
        let shutdown = self.shutdown_signal.subscribe();

        let task = panic::AssertUnwindSafe(fut)
            .catch_unwind()
            .map_err(move |error| {
                let task_error = PanickedTaskError::new(name, error);
                error!(%name, err = %task_error, "critical task failed");
                let _ = panicked_tasks_tx.send(task_error);
            })
            .map(drop);

        let task = async move {
            let task = pin!(task);
            let shutdown = pin!(shutdown.wait_for_shutdown());
            let _ = select(shutdown, task).await;
        };
        info!(%name, "starting critical task");
        self.tokio_handle.spawn(task)
    }

    /// Spawns a future on the tokio runtime, handing it a [`ShutdownGuard`] it
    /// must observe to end itself on shutdown. A panic inside it triggers
    /// process shutdown.
    pub fn spawn_critical_async_with_shutdown<F>(
        &self,
        name: &'static str,
        async_func: impl FnOnce(ShutdownGuard) -> F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let panicked_tasks_tx = self.panicked_tasks_tx.clone();
        let shutdown = ShutdownGuard::new(
            self.shutdown_signal.subscribe(),
            self.pending_tasks_counter.clone(),
        );
        let fut = async_func(shutdown);

        let task = panic::AssertUnwindSafe(fut)
            .catch_unwind()
            .map_err(move |error| {
                let task_error = PanickedTaskError::new(name, error);
                error!(%name, err = %task_error, "critical task failed");
                let _ = panicked_tasks_tx.send(task_error);
            })
            .map(drop);

        info!(%name, "starting critical task");
        self.tokio_handle.spawn(task)
    }
}
