//! The sync worker: drives one library sync job through the adapter, rate
//! limiter, checkpoint store, catalog, and progress tracker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{AppError, Result};
use crate::models::{
    CurrentGame, OperationStatus, ProgressEvent, ProgressStatus, SyncCheckpoint, SyncStatus,
    SyncSummary, SyncType,
};
use crate::realtime::RealtimeBus;
use crate::services::adapters::{AdapterError, PlatformAdapter};
use crate::services::catalog::{OperationUpdate, SyncCatalog, SyncTarget};
use crate::services::job_queue::{JobFunction, QueueName};
use crate::services::progress::ProgressSink;
use crate::services::rate_limiter::{RateGate, RateLimitError};
use crate::services::sync_state::SyncStateStore;

const MAX_TRANSIENT_ATTEMPTS: u32 = 5;
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_MAX_MS: u64 = 30_000;

/// Full-jitter exponential backoff: uniform in `[0, min(max, base * 2^attempt)]`.
pub fn backoff_with_jitter(attempt: u32, base_ms: u64, max_ms: u64, jitter: f64) -> Duration {
    let ceiling = base_ms
        .saturating_mul(2u64.saturating_pow(attempt.min(16)))
        .min(max_ms);
    Duration::from_millis((ceiling as f64 * jitter.clamp(0.0, 1.0)) as u64)
}

/// Deferred re-enqueue seam so the worker can push follow-up jobs.
#[async_trait::async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        queue: QueueName,
        function: JobFunction,
        not_before: Option<chrono::DateTime<Utc>>,
    ) -> Result<Uuid>;
}

#[async_trait::async_trait]
impl JobDispatcher for crate::services::job_queue::RedisJobQueue {
    async fn dispatch(
        &self,
        queue: QueueName,
        function: JobFunction,
        not_before: Option<chrono::DateTime<Utc>>,
    ) -> Result<Uuid> {
        self.enqueue(queue, function, not_before).await
    }
}

/// How a batch-level adapter failure resolves after classification.
enum LoopFailure {
    RateLimited { retry_after: u64 },
    Terminal { status: SyncStatus, error: String },
}

pub struct SyncWorker {
    worker_id: String,
    adapters: HashMap<String, Arc<dyn PlatformAdapter>>,
    rate_gate: Arc<dyn RateGate>,
    state: Arc<dyn SyncStateStore>,
    catalog: Arc<dyn SyncCatalog>,
    progress: Arc<dyn ProgressSink>,
    dispatcher: Arc<dyn JobDispatcher>,
    bus: RealtimeBus,
    config: SyncConfig,
}

impl SyncWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: String,
        rate_gate: Arc<dyn RateGate>,
        state: Arc<dyn SyncStateStore>,
        catalog: Arc<dyn SyncCatalog>,
        progress: Arc<dyn ProgressSink>,
        dispatcher: Arc<dyn JobDispatcher>,
        bus: RealtimeBus,
        config: SyncConfig,
    ) -> Self {
        Self {
            worker_id,
            adapters: HashMap::new(),
            rate_gate,
            state,
            catalog,
            progress,
            dispatcher,
            bus,
            config,
        }
    }

    pub fn register_adapter(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters
            .insert(adapter.platform_code().to_string(), adapter);
    }

    fn adapter(&self, platform_code: &str) -> Result<Arc<dyn PlatformAdapter>> {
        self.adapters
            .get(platform_code)
            .cloned()
            .ok_or_else(|| AppError::internal(format!("no adapter for platform {}", platform_code)))
    }

    /// Execute one library sync job end to end.
    pub async fn run_sync(
        &self,
        library_id: Uuid,
        force: bool,
        sync_type: SyncType,
        cancel: &AtomicBool,
    ) -> Result<SyncSummary> {
        let run_started = std::time::Instant::now();
        let target = self.catalog.library_sync_target(library_id).await?;
        let adapter = self.adapter(&target.platform_code)?;

        // CheckLock: a held lock means another worker owns this library.
        if self.state.is_syncing(library_id).await? {
            if !force {
                tracing::info!(library_id = %library_id, "sync already in progress, skipping");
                return Ok(self.summary(None, library_id, "already_syncing", 0, 0, 0, 0, run_started));
            }
            self.state.release_lock(library_id).await?;
        }
        if !self
            .state
            .acquire_lock(library_id, &self.worker_id, self.config.lock_ttl)
            .await?
        {
            return Ok(self.summary(None, library_id, "already_syncing", 0, 0, 0, 0, run_started));
        }

        // Resume from an existing checkpoint unless this is a full re-sync.
        let mut checkpoint = match self.state.load(library_id).await? {
            Some(cp)
                if sync_type != SyncType::FullSync
                    && cp.user_identifier == target.user_identifier
                    && cp.status != SyncStatus::Completed =>
            {
                cp
            }
            _ => {
                self.state
                    .initialize(library_id, &target.platform_code, &target.user_identifier)
                    .await?
            }
        };

        let operation_id = match checkpoint.operation_id {
            Some(id) => id,
            None => {
                let id = self.catalog.record_sync_operation(library_id, sync_type).await?;
                checkpoint.operation_id = Some(id);
                id
            }
        };
        checkpoint.status = SyncStatus::InProgress;
        checkpoint.retry_after = None;
        self.state.save(&checkpoint).await?;
        self.state
            .set_status(library_id, SyncStatus::InProgress, None)
            .await?;

        let started_at = checkpoint.started_at;
        self.push_progress(
            operation_id,
            &target,
            ProgressStatus::Starting,
            checkpoint.games_synced,
            None,
            0,
            0,
            None,
            Vec::new(),
            started_at,
        )
        .await?;

        // Count first so progress has a denominator; counts as one API call.
        let total = match self
            .rate_limited_call(&target, || adapter.count_games(&target.user_identifier))
            .await
        {
            Ok(total) => total,
            Err(failure) => {
                return self
                    .handle_loop_failure(failure, operation_id, &target, checkpoint, run_started)
                    .await
            }
        };

        let mut offset = checkpoint.last_offset;
        let mut processed = checkpoint.games_synced;
        let mut added = 0u32;
        let mut updated = 0u32;
        let mut errors: Vec<String> = Vec::new();
        let batch_size = self.config.upsert_batch_size as u32;

        while offset < total {
            if cancel.load(Ordering::Relaxed) || self.state.should_pause(library_id).await? {
                return self
                    .finish_cancelled(operation_id, &target, checkpoint, processed, added, updated, run_started)
                    .await;
            }

            let batch = match self
                .rate_limited_call(&target, || {
                    adapter.fetch_batch(&target.user_identifier, offset, batch_size)
                })
                .await
            {
                Ok(batch) => batch,
                Err(failure) => {
                    checkpoint.advance(offset, processed);
                    self.state.save(&checkpoint).await?;
                    return self
                        .handle_loop_failure(failure, operation_id, &target, checkpoint, run_started)
                        .await;
                }
            };
            if batch.is_empty() {
                break;
            }

            let outcome = self
                .catalog
                .upsert_games_batch(library_id, &target.platform_code, &batch)
                .await?;
            added += outcome.added;
            updated += outcome.updated;
            errors.extend(outcome.notes.iter().cloned());

            for event in &outcome.events {
                self.bus.publish(
                    match event.kind {
                        crate::services::catalog::GameEventKind::GameAdded => "game_added",
                        crate::services::catalog::GameEventKind::GameUpdated => "game_updated",
                    },
                    Some(library_id),
                    serde_json::json!({
                        "library_id": library_id,
                        "game_id": event.game_id,
                        "title": event.title,
                    }),
                );
            }

            offset += batch.len() as u32;
            processed += batch.len() as u32;
            checkpoint.advance(offset, processed);
            self.state
                .update_offset(library_id, offset, processed)
                .await?;

            if !outcome.notes.is_empty() {
                self.catalog
                    .update_sync_operation(OperationUpdate {
                        operation_id,
                        status: OperationStatus::InProgress,
                        games_processed: processed,
                        games_added: added,
                        games_updated: updated,
                        errors_count: errors.len() as u32,
                        error_details: None,
                        log_notes: outcome.notes.clone(),
                    })
                    .await?;
            }

            // Lost lock means another worker took over or the operator
            // cancelled between batches.
            if !self
                .state
                .heartbeat(library_id, &self.worker_id, self.config.lock_ttl)
                .await?
            {
                return self
                    .finish_cancelled(operation_id, &target, checkpoint, processed, added, updated, run_started)
                    .await;
            }

            let current = batch.last().map(|game| CurrentGame {
                title: game.title.clone(),
                platform_game_id: game.platform_game_id.clone(),
            });
            self.push_progress(
                operation_id,
                &target,
                ProgressStatus::Syncing,
                processed,
                Some(total),
                added,
                updated,
                current,
                errors.clone(),
                started_at,
            )
            .await?;
        }

        // Finalize.
        let errors_count = errors.len() as u32;
        self.catalog
            .update_sync_operation(OperationUpdate {
                operation_id,
                status: OperationStatus::Completed,
                games_processed: processed,
                games_added: added,
                games_updated: updated,
                errors_count,
                error_details: None,
                log_notes: Vec::new(),
            })
            .await?;
        self.state
            .set_status(library_id, SyncStatus::Completed, None)
            .await?;
        self.state.clear_checkpoint(library_id).await?;
        self.push_progress(
            operation_id,
            &target,
            ProgressStatus::Completed,
            processed,
            Some(total),
            added,
            updated,
            None,
            errors,
            started_at,
        )
        .await?;
        self.state.release_lock(library_id).await?;

        // Queue metadata and achievement enrichment behind every completed
        // sync.
        if processed > 0 {
            let _ = self
                .dispatcher
                .dispatch(
                    QueueName::Low,
                    JobFunction::MetadataSync { library_id },
                    None,
                )
                .await;
            let _ = self
                .dispatcher
                .dispatch(
                    QueueName::Low,
                    JobFunction::AchievementSync { library_id },
                    None,
                )
                .await;
        }

        tracing::info!(
            library_id = %library_id,
            operation_id = %operation_id,
            games_processed = processed,
            games_added = added,
            games_updated = updated,
            latency_ms = run_started.elapsed().as_millis() as u64,
            "sync completed"
        );

        Ok(self.summary(
            Some(operation_id),
            library_id,
            "completed",
            processed,
            added,
            updated,
            errors_count,
            run_started,
        ))
    }

    /// Acquire the rate gate and run one adapter call, retrying transient
    /// failures with full-jitter backoff. Everything else is classified into
    /// a loop failure for the state machine.
    async fn rate_limited_call<T, F, Fut>(
        &self,
        target: &SyncTarget,
        call: F,
    ) -> std::result::Result<T, LoopFailure>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, AdapterError>>,
    {
        let mut attempt = 0u32;
        loop {
            match self.rate_gate.acquire(&target.platform_code, 1).await {
                Ok(waited) => {
                    if waited >= Duration::from_secs(5) {
                        self.bus.publish(
                            "rate_limit_warning",
                            Some(target.library_id),
                            serde_json::json!({
                                "platform": target.platform_code,
                                "waited_ms": waited.as_millis() as u64,
                            }),
                        );
                    }
                }
                Err(RateLimitError::DailyCapExceeded { platform }) => {
                    return Err(LoopFailure::Terminal {
                        status: SyncStatus::Failed,
                        error: format!("RATE_EXCEEDED_DAILY: daily cap exhausted for {}", platform),
                    })
                }
                Err(err) => {
                    return Err(LoopFailure::Terminal {
                        status: SyncStatus::Failed,
                        error: format!("rate limiter failure: {}", err),
                    })
                }
            }

            match call().await {
                Ok(value) => return Ok(value),
                Err(AdapterError::Transient(message)) => {
                    attempt += 1;
                    if attempt >= MAX_TRANSIENT_ATTEMPTS {
                        return Err(LoopFailure::Terminal {
                            status: SyncStatus::Failed,
                            error: format!("transient failure persisted: {}", message),
                        });
                    }
                    let delay = backoff_with_jitter(
                        attempt,
                        BACKOFF_BASE_MS,
                        BACKOFF_MAX_MS,
                        rand::random::<f64>(),
                    );
                    tracing::warn!(
                        library_id = %target.library_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "transient adapter failure, backing off"
                    );
                    sleep(delay).await;
                }
                Err(AdapterError::RateLimited { retry_after }) => {
                    return Err(LoopFailure::RateLimited {
                        retry_after: retry_after.unwrap_or(300),
                    })
                }
                Err(AdapterError::Auth(message)) => {
                    return Err(LoopFailure::Terminal {
                        status: SyncStatus::Failed,
                        error: format!("AUTH_FAILED: {}", message),
                    })
                }
                Err(AdapterError::NotFound(message)) => {
                    return Err(LoopFailure::Terminal {
                        status: SyncStatus::Failed,
                        error: format!("USER_NOT_FOUND: {}", message),
                    })
                }
                Err(AdapterError::Permanent(message)) => {
                    return Err(LoopFailure::Terminal {
                        status: SyncStatus::Failed,
                        error: format!("UPSTREAM_REJECTED: {}", message),
                    })
                }
            }
        }
    }

    async fn handle_loop_failure(
        &self,
        failure: LoopFailure,
        operation_id: Uuid,
        target: &SyncTarget,
        mut checkpoint: SyncCheckpoint,
        run_started: std::time::Instant,
    ) -> Result<SyncSummary> {
        let library_id = target.library_id;
        match failure {
            LoopFailure::RateLimited { retry_after } => {
                checkpoint.status = SyncStatus::RateLimited;
                checkpoint.retry_after = Some(retry_after);
                self.state.save(&checkpoint).await?;
                self.state
                    .set_status(
                        library_id,
                        SyncStatus::RateLimited,
                        Some(format!("upstream rate limit, retrying in {}s", retry_after)),
                    )
                    .await?;
                self.catalog
                    .update_sync_operation(OperationUpdate {
                        operation_id,
                        status: OperationStatus::InProgress,
                        games_processed: checkpoint.games_synced,
                        games_added: 0,
                        games_updated: 0,
                        errors_count: 0,
                        error_details: None,
                        log_notes: vec![format!(
                            "rate limited at offset {}, deferred {}s",
                            checkpoint.last_offset, retry_after
                        )],
                    })
                    .await?;
                self.push_progress(
                    operation_id,
                    target,
                    ProgressStatus::RateLimited,
                    checkpoint.games_synced,
                    None,
                    0,
                    0,
                    None,
                    vec![format!("rate limited, retrying in {}s", retry_after)],
                    checkpoint.started_at,
                )
                .await?;

                // Deferred resume on the low queue; the checkpoint carries
                // the offset and operation to continue from.
                self.dispatcher
                    .dispatch(
                        QueueName::Low,
                        JobFunction::LibrarySync {
                            library_id,
                            force: false,
                            sync_type: SyncType::IncrementalSync.as_str().to_string(),
                        },
                        Some(Utc::now() + chrono::Duration::seconds(retry_after as i64)),
                    )
                    .await?;
                self.state.release_lock(library_id).await?;

                Ok(self.summary(
                    Some(operation_id),
                    library_id,
                    "rate_limited",
                    checkpoint.games_synced,
                    0,
                    0,
                    0,
                    run_started,
                ))
            }
            LoopFailure::Terminal { status, error } => {
                checkpoint.status = status;
                checkpoint.error = Some(error.clone());
                self.state.save(&checkpoint).await?;
                self.state
                    .set_status(library_id, status, Some(error.clone()))
                    .await?;
                self.catalog
                    .update_sync_operation(OperationUpdate {
                        operation_id,
                        status: OperationStatus::Failed,
                        games_processed: checkpoint.games_synced,
                        games_added: 0,
                        games_updated: 0,
                        errors_count: 1,
                        error_details: Some(error.clone()),
                        log_notes: Vec::new(),
                    })
                    .await?;
                self.push_progress(
                    operation_id,
                    target,
                    ProgressStatus::Failed,
                    checkpoint.games_synced,
                    None,
                    0,
                    0,
                    None,
                    vec![error.clone()],
                    checkpoint.started_at,
                )
                .await?;
                self.state.release_lock(library_id).await?;

                tracing::error!(
                    library_id = %library_id,
                    operation_id = %operation_id,
                    error_code = "SYNC_FAILED",
                    error = %error,
                    latency_ms = run_started.elapsed().as_millis() as u64,
                    "sync failed"
                );
                Ok(self.summary(
                    Some(operation_id),
                    library_id,
                    "failed",
                    checkpoint.games_synced,
                    0,
                    0,
                    1,
                    run_started,
                ))
            }
        }
    }

    async fn finish_cancelled(
        &self,
        operation_id: Uuid,
        target: &SyncTarget,
        mut checkpoint: SyncCheckpoint,
        processed: u32,
        added: u32,
        updated: u32,
        run_started: std::time::Instant,
    ) -> Result<SyncSummary> {
        let library_id = target.library_id;
        checkpoint.status = SyncStatus::Cancelled;
        self.state.save(&checkpoint).await?;
        self.state
            .set_status(library_id, SyncStatus::Cancelled, None)
            .await?;
        self.catalog
            .update_sync_operation(OperationUpdate {
                operation_id,
                status: OperationStatus::Cancelled,
                games_processed: processed,
                games_added: added,
                games_updated: updated,
                errors_count: 0,
                error_details: None,
                log_notes: vec!["cancelled by operator".to_string()],
            })
            .await?;
        self.push_progress(
            operation_id,
            target,
            ProgressStatus::Cancelled,
            processed,
            None,
            added,
            updated,
            None,
            Vec::new(),
            checkpoint.started_at,
        )
        .await?;
        self.state.release_lock(library_id).await?;

        tracing::info!(
            library_id = %library_id,
            operation_id = %operation_id,
            games_processed = processed,
            "sync cancelled, checkpoint retained"
        );
        Ok(self.summary(
            Some(operation_id),
            library_id,
            "cancelled",
            processed,
            added,
            updated,
            0,
            run_started,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    async fn push_progress(
        &self,
        operation_id: Uuid,
        target: &SyncTarget,
        status: ProgressStatus,
        processed: u32,
        total: Option<u32>,
        added: u32,
        updated: u32,
        current: Option<CurrentGame>,
        errors: Vec<String>,
        started_at: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let message = match status {
            ProgressStatus::Starting => format!("Starting {} sync", target.platform_code),
            ProgressStatus::Syncing => format!("Synced {} games", processed),
            ProgressStatus::Completed => format!("Completed: {} games", processed),
            ProgressStatus::Failed => "Sync failed".to_string(),
            ProgressStatus::RateLimited => "Paused by upstream rate limit".to_string(),
            ProgressStatus::Cancelled => "Cancelled".to_string(),
        };
        self.progress
            .push(ProgressEvent {
                operation_id,
                library_id: target.library_id,
                platform: target.platform_code.clone(),
                status,
                progress_percent: crate::models::progress_percent(processed, total),
                games_processed: processed,
                games_total: total,
                games_added: added,
                games_updated: updated,
                current_game: current,
                message,
                started_at,
                updated_at: Utc::now(),
                errors,
                sequence: 0,
            })
            .await
    }

    #[allow(clippy::too_many_arguments)]
    fn summary(
        &self,
        operation_id: Option<Uuid>,
        library_id: Uuid,
        status: &str,
        processed: u32,
        added: u32,
        updated: u32,
        errors: u32,
        run_started: std::time::Instant,
    ) -> SyncSummary {
        SyncSummary {
            operation_id,
            library_id,
            status: status.to_string(),
            games_processed: processed,
            games_added: added,
            games_updated: updated,
            errors_count: errors,
            duration_ms: run_started.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExternalIds, NormalizedGame};
    use crate::services::catalog::{BatchOutcome, GameEventKind, LibraryGameEvent};
    use std::sync::Mutex;
    use std::time::Duration;

    // ── In-memory seam stubs ────────────────────────────────────

    struct StubAdapter {
        games: Vec<NormalizedGame>,
        /// Fail fetches that start at this offset, once per entry.
        failures: Mutex<HashMap<u32, AdapterError>>,
    }

    impl StubAdapter {
        fn with_games(count: u32) -> Self {
            let games = (0..count)
                .map(|i| NormalizedGame {
                    platform_game_id: format!("{}", 1000 + i),
                    title: format!("Game {}", i),
                    description: None,
                    release_date: None,
                    developer: None,
                    publisher: None,
                    genres: Vec::new(),
                    metacritic_score: None,
                    cover_image_url: None,
                    screenshots: Vec::new(),
                    external_ids: ExternalIds {
                        steam_app_id: Some(format!("{}", 1000 + i)),
                        ..Default::default()
                    },
                    playtime_minutes: i as i64 * 10,
                    last_played_at: None,
                    platform_data: serde_json::json!({}),
                })
                .collect();
            Self {
                games,
                failures: Mutex::new(HashMap::new()),
            }
        }

        fn fail_at(self, offset: u32, error: AdapterError) -> Self {
            self.failures.lock().unwrap().insert(offset, error);
            self
        }
    }

    #[async_trait::async_trait]
    impl PlatformAdapter for StubAdapter {
        fn platform_code(&self) -> &str {
            "steam"
        }

        async fn count_games(&self, _user: &str) -> std::result::Result<u32, AdapterError> {
            Ok(self.games.len() as u32)
        }

        async fn fetch_batch(
            &self,
            _user: &str,
            offset: u32,
            limit: u32,
        ) -> std::result::Result<Vec<NormalizedGame>, AdapterError> {
            if let Some(error) = self.failures.lock().unwrap().remove(&offset) {
                return Err(error);
            }
            let start = (offset as usize).min(self.games.len());
            let end = (start + limit as usize).min(self.games.len());
            Ok(self.games[start..end].to_vec())
        }

        async fn game_details(
            &self,
            _id: &str,
        ) -> std::result::Result<Option<NormalizedGame>, AdapterError> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct StubState {
        lock: Mutex<Option<String>>,
        checkpoint: Mutex<Option<SyncCheckpoint>>,
        statuses: Mutex<Vec<(SyncStatus, Option<String>)>>,
        /// Drop the lock after this many heartbeats, simulating cancellation.
        cancel_after_heartbeats: Mutex<Option<u32>>,
    }

    #[async_trait::async_trait]
    impl SyncStateStore for StubState {
        async fn is_syncing(&self, _library_id: Uuid) -> Result<bool> {
            Ok(self.lock.lock().unwrap().is_some())
        }

        async fn acquire_lock(&self, _library_id: Uuid, holder: &str, _ttl: Duration) -> Result<bool> {
            let mut lock = self.lock.lock().unwrap();
            if lock.is_some() {
                return Ok(false);
            }
            *lock = Some(holder.to_string());
            Ok(true)
        }

        async fn release_lock(&self, _library_id: Uuid) -> Result<()> {
            *self.lock.lock().unwrap() = None;
            Ok(())
        }

        async fn heartbeat(&self, _library_id: Uuid, holder: &str, _ttl: Duration) -> Result<bool> {
            let mut remaining = self.cancel_after_heartbeats.lock().unwrap();
            if let Some(count) = remaining.as_mut() {
                if *count == 0 {
                    *self.lock.lock().unwrap() = None;
                } else {
                    *count -= 1;
                }
            }
            Ok(self.lock.lock().unwrap().as_deref() == Some(holder))
        }

        async fn initialize(
            &self,
            library_id: Uuid,
            platform_code: &str,
            user_identifier: &str,
        ) -> Result<SyncCheckpoint> {
            let cp = SyncCheckpoint::new(library_id, platform_code, user_identifier);
            *self.checkpoint.lock().unwrap() = Some(cp.clone());
            Ok(cp)
        }

        async fn load(&self, _library_id: Uuid) -> Result<Option<SyncCheckpoint>> {
            Ok(self.checkpoint.lock().unwrap().clone())
        }

        async fn save(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
            *self.checkpoint.lock().unwrap() = Some(checkpoint.clone());
            Ok(())
        }

        async fn update_offset(&self, _library_id: Uuid, offset: u32, games: u32) -> Result<()> {
            if let Some(cp) = self.checkpoint.lock().unwrap().as_mut() {
                cp.advance(offset, games);
            }
            Ok(())
        }

        async fn set_status(
            &self,
            _library_id: Uuid,
            status: SyncStatus,
            error: Option<String>,
        ) -> Result<()> {
            self.statuses.lock().unwrap().push((status, error));
            Ok(())
        }

        async fn should_pause(&self, _library_id: Uuid) -> Result<bool> {
            Ok(self.lock.lock().unwrap().is_none())
        }

        async fn clear_checkpoint(&self, _library_id: Uuid) -> Result<()> {
            *self.checkpoint.lock().unwrap() = None;
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubCatalog {
        target_user: String,
        /// platform_game_id -> playtime, the "database".
        user_games: Mutex<HashMap<String, i64>>,
        operations: Mutex<Vec<OperationUpdate>>,
        recorded_ops: Mutex<Vec<Uuid>>,
    }

    #[async_trait::async_trait]
    impl SyncCatalog for StubCatalog {
        async fn library_sync_target(&self, library_id: Uuid) -> Result<SyncTarget> {
            Ok(SyncTarget {
                library_id,
                platform_id: Uuid::new_v4(),
                platform_code: "steam".to_string(),
                user_identifier: self.target_user.clone(),
                sync_enabled: true,
            })
        }

        async fn upsert_games_batch(
            &self,
            _library_id: Uuid,
            _platform_code: &str,
            games: &[NormalizedGame],
        ) -> Result<BatchOutcome> {
            let mut outcome = BatchOutcome::default();
            let mut store = self.user_games.lock().unwrap();
            for game in games {
                match store.get(&game.platform_game_id) {
                    None => {
                        store.insert(game.platform_game_id.clone(), game.playtime_minutes);
                        outcome.added += 1;
                        outcome.events.push(LibraryGameEvent {
                            kind: GameEventKind::GameAdded,
                            game_id: Uuid::new_v4(),
                            title: game.title.clone(),
                        });
                    }
                    Some(&playtime) if playtime != game.playtime_minutes => {
                        store.insert(game.platform_game_id.clone(), game.playtime_minutes);
                        outcome.updated += 1;
                    }
                    Some(_) => outcome.unchanged += 1,
                }
            }
            Ok(outcome)
        }

        async fn record_sync_operation(&self, _library_id: Uuid, _sync_type: SyncType) -> Result<Uuid> {
            let id = Uuid::new_v4();
            self.recorded_ops.lock().unwrap().push(id);
            Ok(id)
        }

        async fn update_sync_operation(&self, update: OperationUpdate) -> Result<()> {
            self.operations.lock().unwrap().push(update);
            Ok(())
        }

        async fn set_library_status(
            &self,
            _library_id: Uuid,
            _status: SyncStatus,
            _error: Option<String>,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ProgressEvent>>,
    }

    #[async_trait::async_trait]
    impl ProgressSink for RecordingSink {
        async fn push(&self, event: ProgressEvent) -> Result<()> {
            self.events.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct OpenGate;

    #[async_trait::async_trait]
    impl RateGate for OpenGate {
        async fn acquire(&self, _platform: &str, _weight: u32) -> std::result::Result<Duration, RateLimitError> {
            Ok(Duration::ZERO)
        }
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        dispatched: Mutex<Vec<(QueueName, JobFunction, Option<chrono::DateTime<Utc>>)>>,
    }

    #[async_trait::async_trait]
    impl JobDispatcher for RecordingDispatcher {
        async fn dispatch(
            &self,
            queue: QueueName,
            function: JobFunction,
            not_before: Option<chrono::DateTime<Utc>>,
        ) -> Result<Uuid> {
            self.dispatched
                .lock()
                .unwrap()
                .push((queue, function, not_before));
            Ok(Uuid::new_v4())
        }
    }

    struct Harness {
        worker: SyncWorker,
        state: Arc<StubState>,
        catalog: Arc<StubCatalog>,
        sink: Arc<RecordingSink>,
        dispatcher: Arc<RecordingDispatcher>,
    }

    fn harness(adapter: StubAdapter) -> Harness {
        let state = Arc::new(StubState::default());
        let catalog = Arc::new(StubCatalog {
            target_user: "76561198000000000".to_string(),
            ..Default::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let config = SyncConfig {
            workers: 1,
            upsert_batch_size: 100,
            lock_ttl: Duration::from_secs(300),
            job_timeout: Duration::from_secs(300),
            schedule_interval: Duration::from_secs(0),
        };

        let mut worker = SyncWorker::new(
            "worker-test".to_string(),
            Arc::new(OpenGate),
            state.clone(),
            catalog.clone(),
            sink.clone(),
            dispatcher.clone(),
            RealtimeBus::new(64),
            config,
        );
        worker.register_adapter(Arc::new(adapter));

        Harness {
            worker,
            state,
            catalog,
            sink,
            dispatcher,
        }
    }

    fn no_cancel() -> AtomicBool {
        AtomicBool::new(false)
    }

    // ── Scenarios ───────────────────────────────────────────────

    #[tokio::test]
    async fn happy_path_small_library() {
        let h = harness(StubAdapter::with_games(2));
        let library = Uuid::new_v4();
        let cancel = no_cancel();

        let summary = h
            .worker
            .run_sync(library, false, SyncType::ManualSync, &cancel)
            .await
            .unwrap();

        assert_eq!(summary.status, "completed");
        assert_eq!(summary.games_processed, 2);
        assert_eq!(summary.games_added, 2);
        assert_eq!(summary.games_updated, 0);

        // Second run over an unchanged remote library is a no-op.
        let summary = h
            .worker
            .run_sync(library, false, SyncType::ManualSync, &cancel)
            .await
            .unwrap();
        assert_eq!(summary.status, "completed");
        assert_eq!(summary.games_added, 0);
        assert_eq!(summary.games_updated, 0);

        // Lock released and checkpoint cleared after completion.
        assert!(!h.state.is_syncing(library).await.unwrap());
        assert!(h.state.load(library).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_library_completes_with_zero_counters() {
        let h = harness(StubAdapter::with_games(0));
        let summary = h
            .worker
            .run_sync(Uuid::new_v4(), false, SyncType::ManualSync, &no_cancel())
            .await
            .unwrap();
        assert_eq!(summary.status, "completed");
        assert_eq!(summary.games_processed, 0);

        let events = h.sink.events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.status, ProgressStatus::Completed);
        assert_eq!(last.progress_percent, 100.0);
    }

    #[tokio::test]
    async fn resume_from_checkpoint_covers_remaining_games() {
        let h = harness(StubAdapter::with_games(250));
        let library = Uuid::new_v4();

        // Simulate a prior run that committed offset 100 and crashed: the
        // first 100 games are in the catalog and the checkpoint points there.
        {
            let mut store = h.catalog.user_games.lock().unwrap();
            for i in 0..100u32 {
                store.insert(format!("{}", 1000 + i), i as i64 * 10);
            }
        }
        let mut cp = SyncCheckpoint::new(library, "steam", "76561198000000000");
        cp.advance(100, 100);
        cp.status = SyncStatus::InProgress;
        cp.operation_id = Some(Uuid::new_v4());
        h.state.save(&cp).await.unwrap();

        let summary = h
            .worker
            .run_sync(library, false, SyncType::IncrementalSync, &no_cancel())
            .await
            .unwrap();

        assert_eq!(summary.status, "completed");
        assert_eq!(summary.games_processed, 250);
        // Only the tail was inserted; no duplicates for the first 100.
        assert_eq!(summary.games_added, 150);
        assert_eq!(h.catalog.user_games.lock().unwrap().len(), 250);
        // No new operation row was opened for the resumed run.
        assert!(h.catalog.recorded_ops.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_mid_sync_defers_and_releases_lock() {
        let adapter = StubAdapter::with_games(500).fail_at(
            100,
            AdapterError::RateLimited {
                retry_after: Some(120),
            },
        );
        let h = harness(adapter);
        let library = Uuid::new_v4();

        let summary = h
            .worker
            .run_sync(library, false, SyncType::ManualSync, &no_cancel())
            .await
            .unwrap();

        assert_eq!(summary.status, "rate_limited");
        assert_eq!(summary.games_processed, 100);

        // Checkpoint retained at the committed offset with the retry hint.
        let cp = h.state.load(library).await.unwrap().unwrap();
        assert_eq!(cp.last_offset, 100);
        assert_eq!(cp.status, SyncStatus::RateLimited);
        assert_eq!(cp.retry_after, Some(120));

        // Re-enqueued on the low queue with a not_before in the future.
        let dispatched = h.dispatcher.dispatched.lock().unwrap();
        let (queue, function, not_before) = dispatched
            .iter()
            .find(|(_, f, _)| matches!(f, JobFunction::LibrarySync { .. }))
            .expect("deferred sync job");
        assert_eq!(*queue, QueueName::Low);
        assert_eq!(function.library_id(), library);
        assert!(not_before.unwrap() > Utc::now() + chrono::Duration::seconds(60));

        assert!(!h.state.is_syncing(library).await.unwrap());

        // Resumed run picks up at offset 100 and completes the rest.
        drop(dispatched);
        let summary = h
            .worker
            .run_sync(library, false, SyncType::IncrementalSync, &no_cancel())
            .await
            .unwrap();
        assert_eq!(summary.status, "completed");
        assert_eq!(summary.games_processed, 500);
        assert_eq!(h.catalog.user_games.lock().unwrap().len(), 500);
    }

    #[tokio::test]
    async fn auth_failure_is_terminal() {
        let adapter =
            StubAdapter::with_games(50).fail_at(0, AdapterError::Auth("bad key".to_string()));
        let h = harness(adapter);
        let library = Uuid::new_v4();

        let summary = h
            .worker
            .run_sync(library, false, SyncType::ManualSync, &no_cancel())
            .await
            .unwrap();
        assert_eq!(summary.status, "failed");

        // No retry was scheduled.
        assert!(h.dispatcher.dispatched.lock().unwrap().is_empty());
        let statuses = h.state.statuses.lock().unwrap();
        assert!(statuses
            .iter()
            .any(|(s, e)| *s == SyncStatus::Failed
                && e.as_deref().map(|e| e.contains("AUTH_FAILED")).unwrap_or(false)));
    }

    #[tokio::test]
    async fn cancellation_at_batch_boundary_retains_checkpoint() {
        let h = harness(StubAdapter::with_games(300));
        let library = Uuid::new_v4();
        // Lock disappears after the first heartbeat, as if the operator
        // deleted it.
        *h.state.cancel_after_heartbeats.lock().unwrap() = Some(1);

        let summary = h
            .worker
            .run_sync(library, false, SyncType::ManualSync, &no_cancel())
            .await
            .unwrap();

        assert_eq!(summary.status, "cancelled");
        assert!(summary.games_processed >= 100);
        assert!(summary.games_processed < 300);

        let cp = h.state.load(library).await.unwrap().unwrap();
        assert_eq!(cp.status, SyncStatus::Cancelled);
        assert_eq!(cp.last_offset, summary.games_processed);

        let events = h.sink.events.lock().unwrap();
        assert_eq!(events.last().unwrap().status, ProgressStatus::Cancelled);
    }

    #[tokio::test]
    async fn second_worker_on_locked_library_is_a_noop() {
        let h = harness(StubAdapter::with_games(10));
        let library = Uuid::new_v4();
        h.state
            .acquire_lock(library, "other-worker", Duration::from_secs(60))
            .await
            .unwrap();

        let summary = h
            .worker
            .run_sync(library, false, SyncType::ManualSync, &no_cancel())
            .await
            .unwrap();
        assert_eq!(summary.status, "already_syncing");
        assert_eq!(summary.games_processed, 0);

        // The original holder still owns the lock.
        assert_eq!(
            h.state.lock.lock().unwrap().as_deref(),
            Some("other-worker")
        );
    }

    #[tokio::test]
    async fn force_takes_over_a_held_lock() {
        let h = harness(StubAdapter::with_games(5));
        let library = Uuid::new_v4();
        h.state
            .acquire_lock(library, "stuck-worker", Duration::from_secs(60))
            .await
            .unwrap();

        let summary = h
            .worker
            .run_sync(library, true, SyncType::ManualSync, &no_cancel())
            .await
            .unwrap();
        assert_eq!(summary.status, "completed");
        assert_eq!(summary.games_processed, 5);
    }

    #[tokio::test]
    async fn progress_percent_is_monotonic_per_operation() {
        let h = harness(StubAdapter::with_games(350));
        h.worker
            .run_sync(Uuid::new_v4(), false, SyncType::ManualSync, &no_cancel())
            .await
            .unwrap();

        let events = h.sink.events.lock().unwrap();
        let mut last = -1.0f32;
        for event in events.iter() {
            assert!(event.progress_percent >= last);
            last = event.progress_percent;
        }
        assert_eq!(events.last().unwrap().status, ProgressStatus::Completed);
    }

    #[tokio::test]
    async fn completed_sync_queues_enrichment_jobs() {
        let h = harness(StubAdapter::with_games(3));
        let library = Uuid::new_v4();
        h.worker
            .run_sync(library, false, SyncType::ManualSync, &no_cancel())
            .await
            .unwrap();

        let dispatched = h.dispatcher.dispatched.lock().unwrap();
        assert!(dispatched.iter().any(|(queue, function, _)| *queue
            == QueueName::Low
            && matches!(function, JobFunction::MetadataSync { library_id } if *library_id == library)));
        assert!(dispatched.iter().any(|(queue, function, _)| *queue
            == QueueName::Low
            && matches!(function, JobFunction::AchievementSync { library_id } if *library_id == library)));
    }

    // ── Pure helpers ────────────────────────────────────────────

    #[test]
    fn backoff_is_bounded_and_grows() {
        let d1 = backoff_with_jitter(1, 500, 30_000, 1.0);
        let d3 = backoff_with_jitter(3, 500, 30_000, 1.0);
        assert_eq!(d1, Duration::from_millis(1000));
        assert_eq!(d3, Duration::from_millis(4000));

        // Cap holds for any attempt, and jitter never exceeds the ceiling.
        assert!(backoff_with_jitter(40, 500, 30_000, 1.0) <= Duration::from_millis(30_000));
        assert_eq!(backoff_with_jitter(3, 500, 30_000, 0.0), Duration::ZERO);
    }
}
