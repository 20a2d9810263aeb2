//! Scheduler-owned background tasks with cooperative cancellation.
//!
//! Monitoring jobs are explicit tasks owned by this scheduler rather than
//! free-floating callbacks; shutting the scheduler down cancels every loop
//! it spawned. Runs are recorded through the store for observability.

use chrono::Utc;
use log::{info, warn};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::CoreResult;
use crate::store::{ScheduledTask, Store, TaskExecution};

pub struct Scheduler {
    store: Arc<dyn Store>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// A child token tied to this scheduler's lifetime.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Spawns a recurring job. Each run gets a child cancellation token and
    /// is recorded as a `TaskExecution`.
    pub async fn spawn_interval<F, Fut>(&self, task: ScheduledTask, job: F) -> CoreResult<()>
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<String>> + Send + 'static,
    {
        self.store.record_task(&task).await?;
        let store = self.store.clone();
        let cancel = self.cancel.child_token();
        let interval = Duration::from_secs(task.interval_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would run the job before anything
            // exists to monitor.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("scheduled task '{}' stopped", task.name);
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                let started_at = Utc::now();
                let outcome = match job(cancel.child_token()).await {
                    Ok(summary) => summary,
                    Err(err) => {
                        warn!("scheduled task '{}' run failed: {}", task.name, err);
                        format!("error: {}", err.code())
                    }
                };
                let execution = TaskExecution {
                    task_id: task.task_id.clone(),
                    started_at,
                    finished_at: Utc::now(),
                    outcome,
                };
                if let Err(err) = store.record_execution(&execution).await {
                    warn!("could not record task execution: {}", err);
                }
            }
        });

        if let Ok(mut handles) = self.handles.lock() {
            handles.push(handle);
        }
        Ok(())
    }

    /// Cancels every spawned task. Loops observe the token at their next
    /// suspension point.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
