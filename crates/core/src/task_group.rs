//! Supervision of the engine's long-lived tasks.
//!
//! Every loop (the sync loop, each ledger worker) runs as one task in a
//! [`TaskGroup`]. A task that returns an error or panics is turned into a
//! single [`CriticalError`] and the group's root token is cancelled, which
//! makes every other task finish its in-flight tick and exit.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::metrics::record_critical_error;

/// The error that brought the process down, with the task it came from.
#[derive(Debug, Error)]
#[error("critical error in task {task}: {error}")]
pub struct CriticalError {
    pub task: String,
    #[source]
    pub error: SyncError,
}

/// Group of supervised tasks sharing one cancellation token.
pub struct TaskGroup {
    token: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
    critical: Arc<Mutex<Option<CriticalError>>>,
}

impl TaskGroup {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            tasks: Vec::new(),
            critical: Arc::new(Mutex::new(None)),
        }
    }

    /// Root token; cancelled on shutdown or on the first critical error.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a supervised task.
    ///
    /// `Ok(())` and [`SyncError::ShutdownRequested`] are clean exits. Any
    /// other error, and any panic, is critical.
    pub fn spawn<F>(&mut self, name: impl Into<String>, fut: F)
    where
        F: Future<Output = SyncResult<()>> + Send + 'static,
    {
        let name = name.into();
        let task = name.clone();
        let token = self.token.clone();
        let critical = Arc::clone(&self.critical);

        let handle = tokio::spawn(async move {
            let error = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) | Ok(Err(SyncError::ShutdownRequested)) => {
                    debug!(task = %task, "Task finished");
                    return;
                }
                Ok(Err(e)) => e,
                Err(payload) => SyncError::TaskPanicked {
                    task: task.clone(),
                    message: panic_message(payload.as_ref()),
                },
            };

            error!(task = %task, error = %error, "🚨 Critical error, shutting down");
            record_critical_error(&task);
            {
                let mut slot = critical.lock().unwrap_or_else(|p| p.into_inner());
                if slot.is_none() {
                    *slot = Some(CriticalError { task, error });
                }
            }
            token.cancel();
        });

        self.tasks.push((name, handle));
    }

    /// Whether a critical error was recorded.
    pub fn has_failed(&self) -> bool {
        self.critical
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(true)
    }

    /// Cancel every task and wait up to `grace` for them to finish.
    ///
    /// Returns the first critical error, if any task failed.
    pub async fn shutdown(self, grace: Duration) -> Option<CriticalError> {
        self.token.cancel();

        let names: Vec<String> = self.tasks.iter().map(|(n, _)| n.clone()).collect();
        let aborts: Vec<_> = self.tasks.iter().map(|(_, h)| h.abort_handle()).collect();
        let handles = self.tasks.into_iter().map(|(_, h)| h);

        match tokio::time::timeout(grace, futures::future::join_all(handles)).await {
            Ok(_) => info!(tasks = names.len(), "✅ All tasks stopped"),
            Err(_) => {
                let pending: Vec<&str> = names
                    .iter()
                    .zip(&aborts)
                    .filter(|(_, a)| !a.is_finished())
                    .map(|(n, _)| n.as_str())
                    .collect();
                warn!(pending = ?pending, "⚠️  Shutdown grace period elapsed, aborting tasks");
                aborts.iter().for_each(|a| a.abort());
            }
        }

        self.critical
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
