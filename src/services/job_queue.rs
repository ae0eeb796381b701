//! Persistent priority work queue on Redis.
//!
//! Three named queues pulled in descending priority, FIFO within a queue.
//! The sorted-set score is the instant a job becomes ready, so `not_before`
//! deferral and FIFO ordering fall out of the same structure.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Retention for finished job records, success and failure alike.
const RESULT_TTL_SECS: u64 = 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    High,
    Default,
    Low,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::High => "high",
            QueueName::Default => "default",
            QueueName::Low => "low",
        }
    }

    /// Pull order: manual syncs beat scheduled syncs beat enrichment.
    pub const PRIORITY_ORDER: [QueueName; 3] =
        [QueueName::High, QueueName::Default, QueueName::Low];

    pub fn default_max_attempts(&self) -> u32 {
        match self {
            // The user will retry a manual sync themselves.
            QueueName::High => 1,
            QueueName::Default => 3,
            QueueName::Low => 5,
        }
    }

    pub fn default_timeout_ms(&self) -> u64 {
        2 * 3600 * 1000
    }
}

/// Work a job carries. Serialized into the job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum JobFunction {
    LibrarySync {
        library_id: Uuid,
        force: bool,
        sync_type: String,
    },
    AchievementSync {
        library_id: Uuid,
    },
    MetadataSync {
        library_id: Uuid,
    },
}

impl JobFunction {
    pub fn library_id(&self) -> Uuid {
        match self {
            JobFunction::LibrarySync { library_id, .. } => *library_id,
            JobFunction::AchievementSync { library_id } => *library_id,
            JobFunction::MetadataSync { library_id } => *library_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub job_id: Uuid,
    pub queue: QueueName,
    pub function: JobFunction,
    pub enqueued_at: DateTime<Utc>,
    pub not_before: Option<DateTime<Utc>>,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub attempt: u32,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl JobEnvelope {
    pub fn new(queue: QueueName, function: JobFunction, not_before: Option<DateTime<Utc>>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            queue,
            function,
            enqueued_at: Utc::now(),
            not_before,
            timeout_ms: queue.default_timeout_ms(),
            max_attempts: queue.default_max_attempts(),
            attempt: 0,
            status: JobStatus::Pending,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }

    /// The instant this job becomes eligible; doubles as the queue score.
    pub fn ready_at(&self) -> DateTime<Utc> {
        self.not_before.unwrap_or(self.enqueued_at)
    }

    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Exponential backoff for the next retry attempt.
    pub fn retry_delay(&self) -> ChronoDuration {
        let seconds = 30u64.saturating_mul(2u64.pow(self.attempt.min(6)));
        ChronoDuration::seconds(seconds.min(3600) as i64)
    }
}

fn queue_key(queue: QueueName) -> String {
    format!("jobs:queue:{}", queue.as_str())
}

fn job_key(job_id: Uuid) -> String {
    format!("jobs:job:{}", job_id)
}

#[derive(Clone)]
pub struct RedisJobQueue {
    pool: Pool,
}

impl RedisJobQueue {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(
        &self,
        queue: QueueName,
        function: JobFunction,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<Uuid> {
        let job = JobEnvelope::new(queue, function, not_before);
        self.save(&job).await?;
        self.push(&job).await?;
        tracing::info!(
            job_id = %job.job_id,
            queue = queue.as_str(),
            ready_at = %job.ready_at(),
            "job enqueued"
        );
        Ok(job.job_id)
    }

    /// Re-queue an existing job (retry or rate-limit deferral).
    pub async fn requeue(&self, job: &mut JobEnvelope, not_before: Option<DateTime<Utc>>) -> Result<()> {
        job.status = JobStatus::Pending;
        job.not_before = not_before;
        job.started_at = None;
        self.save(job).await?;
        self.push(job).await?;
        Ok(())
    }

    /// Claim the next ready job, scanning queues by descending priority.
    /// A successful `ZREM` is the claim; losers of a race simply move on.
    pub async fn dequeue(&self) -> Result<Option<JobEnvelope>> {
        let now = Utc::now().timestamp_millis() as f64;
        let mut conn = self.pool.get().await?;

        for queue in QueueName::PRIORITY_ORDER {
            let key = queue_key(queue);
            let candidates: Vec<String> = redis::cmd("ZRANGEBYSCORE")
                .arg(&key)
                .arg("-inf")
                .arg(now)
                .arg("LIMIT")
                .arg(0)
                .arg(8)
                .query_async(&mut *conn)
                .await?;

            for raw_id in candidates {
                let removed: i32 = conn.zrem(&key, &raw_id).await?;
                if removed == 0 {
                    continue;
                }
                let job_id = Uuid::parse_str(&raw_id)
                    .map_err(|e| AppError::QueueBackend(format!("bad job id in queue: {}", e)))?;
                match self.get(job_id).await? {
                    Some(mut job) => {
                        job.status = JobStatus::Running;
                        job.attempt += 1;
                        job.started_at = Some(Utc::now());
                        self.save(&job).await?;
                        return Ok(Some(job));
                    }
                    // Record expired out from under the queue entry.
                    None => continue,
                }
            }
        }
        Ok(None)
    }

    pub async fn complete(&self, job: &mut JobEnvelope, result: serde_json::Value) -> Result<()> {
        job.status = JobStatus::Completed;
        job.finished_at = Some(Utc::now());
        job.result = Some(result);
        self.save(job).await
    }

    /// Record a failure; retries with backoff while attempts remain.
    pub async fn fail(&self, job: &mut JobEnvelope, error: &str) -> Result<()> {
        job.error = Some(error.to_string());
        if job.can_retry() {
            let delay = job.retry_delay();
            tracing::warn!(
                job_id = %job.job_id,
                attempt = job.attempt,
                delay_secs = delay.num_seconds(),
                error,
                "job failed, scheduling retry"
            );
            self.requeue(job, Some(Utc::now() + delay)).await
        } else {
            job.status = JobStatus::Failed;
            job.finished_at = Some(Utc::now());
            tracing::error!(job_id = %job.job_id, attempt = job.attempt, error, "job failed terminally");
            self.save(job).await
        }
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<JobEnvelope>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(job_key(job_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn queue_depths(&self) -> Result<HashMap<&'static str, u64>> {
        let mut conn = self.pool.get().await?;
        let mut depths = HashMap::new();
        for queue in QueueName::PRIORITY_ORDER {
            let depth: u64 = conn.zcard(queue_key(queue)).await.unwrap_or(0);
            depths.insert(queue.as_str(), depth);
        }
        Ok(depths)
    }

    async fn save(&self, job: &JobEnvelope) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let json = serde_json::to_string(job)?;
        let _: () = conn.set_ex(job_key(job.job_id), json, RESULT_TTL_SECS).await?;
        Ok(())
    }

    async fn push(&self, job: &JobEnvelope) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let score = job.ready_at().timestamp_millis() as f64;
        let _: () = conn
            .zadd(queue_key(job.queue), job.job_id.to_string(), score)
            .await?;
        Ok(())
    }
}
