//! Publishes structured sync progress to the realtime bus and mirrors the
//! latest snapshot to a short-TTL key for polling clients.

use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::Result;
use crate::models::ProgressEvent;
use crate::realtime::RealtimeBus;

const SNAPSHOT_TTL_SECS: u64 = 3600;

/// Publish at most every this many games or this often, whichever comes
/// first; terminal events always flush.
const PUBLISH_EVERY_GAMES: u32 = 10;
const PUBLISH_EVERY: std::time::Duration = std::time::Duration::from_secs(2);

fn snapshot_key(library_id: Uuid) -> String {
    format!("sync:progress:{}", library_id)
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Hand the sink a progress document. Non-terminal events may be dropped
    /// by the publish cadence; the sequence number is assigned here so
    /// delivered events are monotonic per library.
    async fn push(&self, event: ProgressEvent) -> Result<()>;
}

struct PublishState {
    sequence: u64,
    last_publish: Instant,
    last_count: u32,
}

pub struct ProgressTracker {
    bus: RealtimeBus,
    pool: Pool,
    state: DashMap<Uuid, PublishState>,
}

impl ProgressTracker {
    pub fn new(bus: RealtimeBus, pool: Pool) -> Self {
        Self {
            bus,
            pool,
            state: DashMap::new(),
        }
    }

    /// Latest snapshot for polling; `None` after the TTL lapses.
    pub async fn latest(&self, library_id: Uuid) -> Result<Option<ProgressEvent>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(snapshot_key(library_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn should_publish(&self, event: &ProgressEvent) -> bool {
        if event.status.is_terminal() {
            return true;
        }
        match self.state.get(&event.library_id) {
            None => true,
            Some(state) => {
                event.games_processed >= state.last_count + PUBLISH_EVERY_GAMES
                    || state.last_publish.elapsed() >= PUBLISH_EVERY
            }
        }
    }
}

#[async_trait]
impl ProgressSink for ProgressTracker {
    async fn push(&self, mut event: ProgressEvent) -> Result<()> {
        if !self.should_publish(&event) {
            return Ok(());
        }

        let terminal = event.status.is_terminal();
        {
            let mut state = self
                .state
                .entry(event.library_id)
                .or_insert_with(|| PublishState {
                    sequence: 0,
                    last_publish: Instant::now(),
                    last_count: 0,
                });
            state.sequence += 1;
            state.last_publish = Instant::now();
            state.last_count = event.games_processed;
            event.sequence = state.sequence;
        }

        let payload = serde_json::to_value(&event)?;
        self.bus
            .publish(event.status.event_name(), Some(event.library_id), payload);

        let mut conn = self.pool.get().await?;
        let json = serde_json::to_string(&event)?;
        let _: () = conn
            .set_ex(snapshot_key(event.library_id), json, SNAPSHOT_TTL_SECS)
            .await?;

        if terminal {
            self.state.remove(&event.library_id);
        }
        Ok(())
    }
}
