//! Per-library sync checkpoint, exclusive lock, and cancellation signal.
//!
//! Lock and checkpoint are separate Redis keys: deleting the lock while a
//! worker is running is the cancellation API, while the checkpoint outlives
//! the run so the next job can resume.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{SyncCheckpoint, SyncStatus};
use crate::services::catalog::SyncCatalog;

const CHECKPOINT_TTL_SECS: i64 = 7 * 24 * 3600;

fn lock_key(library_id: Uuid) -> String {
    format!("sync:lock:{}", library_id)
}

fn checkpoint_key(library_id: Uuid) -> String {
    format!("sync:checkpoint:{}", library_id)
}

#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn is_syncing(&self, library_id: Uuid) -> Result<bool>;

    /// Take the per-library lock; false when another holder has it.
    async fn acquire_lock(&self, library_id: Uuid, holder: &str, ttl: Duration) -> Result<bool>;

    /// Delete the lock. Doubles as the cancellation signal for a running
    /// worker.
    async fn release_lock(&self, library_id: Uuid) -> Result<()>;

    /// Renew the lock TTL; false when the lock was lost or taken over.
    async fn heartbeat(&self, library_id: Uuid, holder: &str, ttl: Duration) -> Result<bool>;

    async fn initialize(
        &self,
        library_id: Uuid,
        platform_code: &str,
        user_identifier: &str,
    ) -> Result<SyncCheckpoint>;

    async fn load(&self, library_id: Uuid) -> Result<Option<SyncCheckpoint>>;

    async fn save(&self, checkpoint: &SyncCheckpoint) -> Result<()>;

    async fn update_offset(&self, library_id: Uuid, offset: u32, games_synced: u32) -> Result<()>;

    /// Update checkpoint status and mirror it into the catalog's library row.
    async fn set_status(
        &self,
        library_id: Uuid,
        status: SyncStatus,
        error: Option<String>,
    ) -> Result<()>;

    /// True when the lock disappeared mid-run (operator cancellation).
    async fn should_pause(&self, library_id: Uuid) -> Result<bool>;

    /// Drop the checkpoint after a completed run.
    async fn clear_checkpoint(&self, library_id: Uuid) -> Result<()>;
}

pub struct RedisSyncState {
    pool: Pool,
    catalog: Arc<dyn SyncCatalog>,
}

impl RedisSyncState {
    pub fn new(pool: Pool, catalog: Arc<dyn SyncCatalog>) -> Self {
        Self { pool, catalog }
    }
}

#[async_trait]
impl SyncStateStore for RedisSyncState {
    async fn is_syncing(&self, library_id: Uuid) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let exists: bool = conn.exists(lock_key(library_id)).await?;
        Ok(exists)
    }

    async fn acquire_lock(&self, library_id: Uuid, holder: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let acquired: Option<String> = redis::cmd("SET")
            .arg(lock_key(library_id))
            .arg(holder)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut *conn)
            .await?;
        Ok(acquired.is_some())
    }

    async fn release_lock(&self, library_id: Uuid) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.del(lock_key(library_id)).await?;
        Ok(())
    }

    async fn heartbeat(&self, library_id: Uuid, holder: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let current: Option<String> = conn.get(lock_key(library_id)).await?;
        if current.as_deref() != Some(holder) {
            return Ok(false);
        }
        let renewed: bool = redis::cmd("PEXPIRE")
            .arg(lock_key(library_id))
            .arg(ttl.as_millis() as u64)
            .query_async(&mut *conn)
            .await?;
        Ok(renewed)
    }

    async fn initialize(
        &self,
        library_id: Uuid,
        platform_code: &str,
        user_identifier: &str,
    ) -> Result<SyncCheckpoint> {
        let checkpoint = SyncCheckpoint::new(library_id, platform_code, user_identifier);
        self.save(&checkpoint).await?;
        Ok(checkpoint)
    }

    async fn load(&self, library_id: Uuid) -> Result<Option<SyncCheckpoint>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(checkpoint_key(library_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, checkpoint: &SyncCheckpoint) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let json = serde_json::to_string(checkpoint)?;
        let _: () = conn
            .set_ex(
                checkpoint_key(checkpoint.library_id),
                json,
                CHECKPOINT_TTL_SECS as u64,
            )
            .await?;
        Ok(())
    }

    async fn update_offset(&self, library_id: Uuid, offset: u32, games_synced: u32) -> Result<()> {
        if let Some(mut checkpoint) = self.load(library_id).await? {
            checkpoint.advance(offset, games_synced);
            self.save(&checkpoint).await?;
        }
        Ok(())
    }

    async fn set_status(
        &self,
        library_id: Uuid,
        status: SyncStatus,
        error: Option<String>,
    ) -> Result<()> {
        if let Some(mut checkpoint) = self.load(library_id).await? {
            checkpoint.status = status;
            checkpoint.error = error.clone();
            checkpoint.updated_at = chrono::Utc::now();
            self.save(&checkpoint).await?;
        }
        self.catalog
            .set_library_status(library_id, status, error)
            .await
    }

    async fn should_pause(&self, library_id: Uuid) -> Result<bool> {
        Ok(!self.is_syncing(library_id).await?)
    }

    async fn clear_checkpoint(&self, library_id: Uuid) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let _: () = conn.del(checkpoint_key(library_id)).await?;
        Ok(())
    }
}
