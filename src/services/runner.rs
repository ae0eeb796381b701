//! Worker pool: pulls jobs off the queue and drives them to completion with
//! per-job timeout and graceful drain on shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{AppError, Result};
use crate::models::SyncType;
use crate::services::achievements::AchievementSyncService;
use crate::services::job_queue::{JobEnvelope, JobFunction, RedisJobQueue};
use crate::services::metadata::MetadataSyncService;
use crate::services::sync_state::SyncStateStore;
use crate::services::sync_worker::SyncWorker;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct WorkerPool {
    pub queue: RedisJobQueue,
    pub worker: Arc<SyncWorker>,
    pub achievements: Arc<AchievementSyncService>,
    pub metadata: Arc<MetadataSyncService>,
    pub state: Arc<dyn SyncStateStore>,
}

impl WorkerPool {
    /// Spawn `count` worker loops; each owns one job at a time.
    pub fn spawn(self: Arc<Self>, count: usize, shutdown: watch::Receiver<bool>) {
        for index in 0..count {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                pool.run_loop(index, shutdown).await;
            });
        }
    }

    async fn run_loop(&self, index: usize, shutdown: watch::Receiver<bool>) {
        tracing::info!(worker = index, "sync worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.queue.dequeue().await {
                Ok(Some(job)) => self.execute(job, &shutdown).await,
                Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(err) => {
                    tracing::error!(worker = index, error = %err, "dequeue failed");
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
        tracing::info!(worker = index, "sync worker stopped");
    }

    async fn execute(&self, mut job: JobEnvelope, shutdown: &watch::Receiver<bool>) {
        let timeout = Duration::from_millis(job.timeout_ms);

        // On shutdown the watcher trips the cancel flag; the job checkpoints
        // at the next batch boundary and exits inside the drain window.
        let cancel = Arc::new(AtomicBool::new(false));
        let watcher = {
            let mut shutdown = shutdown.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if shutdown.changed().await.is_ok() {
                    cancel.store(true, Ordering::Relaxed);
                }
            })
        };

        let outcome = tokio::time::timeout(timeout, self.dispatch(&job, &cancel)).await;
        watcher.abort();

        let result = match outcome {
            Ok(result) => result,
            Err(_elapsed) => {
                // Timed out: free the library for the next attempt but keep
                // the checkpoint so it resumes rather than restarts.
                let library_id = job.function.library_id();
                if let Err(err) = self.state.release_lock(library_id).await {
                    tracing::error!(library_id = %library_id, error = %err, "lock release after timeout failed");
                }
                Err(AppError::internal(format!(
                    "job timed out after {}ms",
                    job.timeout_ms
                )))
            }
        };

        let finish = match result {
            Ok(value) => self.queue.complete(&mut job, value).await,
            Err(err) => self.queue.fail(&mut job, &err.to_string()).await,
        };
        if let Err(err) = finish {
            tracing::error!(job_id = %job.job_id, error = %err, "job bookkeeping failed");
        }
    }

    async fn dispatch(&self, job: &JobEnvelope, cancel: &AtomicBool) -> Result<serde_json::Value> {
        match &job.function {
            JobFunction::LibrarySync {
                library_id,
                force,
                sync_type,
            } => {
                let sync_type = SyncType::parse(sync_type).unwrap_or(SyncType::IncrementalSync);
                let summary = self
                    .worker
                    .run_sync(*library_id, *force, sync_type, cancel)
                    .await?;
                Ok(serde_json::to_value(summary)?)
            }
            JobFunction::AchievementSync { library_id } => {
                self.achievements.run(*library_id).await
            }
            JobFunction::MetadataSync { library_id } => self.metadata.run(*library_id).await,
        }
    }
}
