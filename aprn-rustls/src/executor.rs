//! Executors that run verification attempts off the handshake path.

use crate::prelude::debug;
use futures::future::BoxFuture;
use std::fmt;
use tokio::sync::mpsc;

/// A verification attempt ready to be driven to completion.
pub type VerifyTask = BoxFuture<'static, ()>;

/// Returned when an executor no longer accepts work.
///
/// The rejected task is dropped. Attempts dropped this way still complete,
/// as rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("verification executor is closed")]
pub struct ExecutorClosed;

/// Runs verification tasks.
pub trait VerifyExecutor: Send + Sync + fmt::Debug {
    /// Queues `task`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorClosed`] if the executor has shut down.
    fn spawn(&self, task: VerifyTask) -> Result<(), ExecutorClosed>;

    /// Whether tasks run inside a tokio runtime with the time driver
    /// enabled, so `tokio::time` can be used in them.
    fn drives_tokio_timer(&self) -> bool {
        false
    }
}

/// A dedicated thread that runs every attempt on one single-threaded tokio
/// runtime, with the timer enabled.
///
/// Attempts interleave at their suspension points but never run in parallel.
/// Dropping the executor stops the thread once queued tasks are handed off;
/// attempts still suspended at that point are dropped and complete as
/// rejected.
pub struct SerialExecutor {
    name: String,
    tx: mpsc::UnboundedSender<VerifyTask>,
}

impl fmt::Debug for SerialExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialExecutor")
            .field("name", &self.name)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl SerialExecutor {
    /// Default thread name.
    pub const DEFAULT_NAME: &'static str = "aprn-tls-verify";

    /// Starts the executor thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime or the thread cannot be created.
    pub fn new(name: impl Into<String>) -> std::io::Result<Self> {
        let name = name.into();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let (tx, mut rx) = mpsc::unbounded_channel::<VerifyTask>();

        let thread_name = name.clone();
        std::thread::Builder::new().name(name.clone()).spawn(move || {
            runtime.block_on(async move {
                while let Some(task) = rx.recv().await {
                    tokio::spawn(task);
                }
            });
            debug!("verification executor {thread_name} stopped");
        })?;

        debug!("started verification executor {name}");
        Ok(Self { name, tx })
    }

    /// The executor thread's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl VerifyExecutor for SerialExecutor {
    fn spawn(&self, task: VerifyTask) -> Result<(), ExecutorClosed> {
        self.tx.send(task).map_err(|_| ExecutorClosed)
    }

    fn drives_tokio_timer(&self) -> bool {
        true
    }
}

/// Runs each task to completion on the calling thread before returning.
///
/// Meant for tests and for engines that never suspend.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl VerifyExecutor for InlineExecutor {
    fn spawn(&self, task: VerifyTask) -> Result<(), ExecutorClosed> {
        futures::executor::block_on(task);
        Ok(())
    }
}
