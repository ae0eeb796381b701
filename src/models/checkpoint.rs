use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::library::SyncStatus;

/// Resume state of an in-progress sync. Redis-resident with a 7-day TTL; the
/// per-library lock is a separate key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub library_id: Uuid,
    pub platform_code: String,
    pub user_identifier: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_offset: u32,
    pub games_synced: u32,
    pub status: SyncStatus,
    pub error: Option<String>,
    /// Seconds to wait before resuming after an upstream rate limit.
    pub retry_after: Option<u64>,
    /// Audit row this run feeds; a resumed run keeps appending to it.
    pub operation_id: Option<Uuid>,
}

impl SyncCheckpoint {
    pub fn new(library_id: Uuid, platform_code: &str, user_identifier: &str) -> Self {
        let now = Utc::now();
        Self {
            library_id,
            platform_code: platform_code.to_string(),
            user_identifier: user_identifier.to_string(),
            started_at: now,
            updated_at: now,
            last_offset: 0,
            games_synced: 0,
            status: SyncStatus::Pending,
            error: None,
            retry_after: None,
            operation_id: None,
        }
    }

    pub fn advance(&mut self, offset: u32, games_synced: u32) {
        self.last_offset = offset;
        self.games_synced = games_synced;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_serde_round_trip() {
        let mut cp = SyncCheckpoint::new(Uuid::new_v4(), "steam", "76561198000000000");
        cp.advance(100, 100);
        cp.status = SyncStatus::InProgress;
        cp.retry_after = Some(120);

        let json = serde_json::to_string(&cp).unwrap();
        let back: SyncCheckpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cp);
    }

    #[test]
    fn advance_moves_offset_and_clock() {
        let mut cp = SyncCheckpoint::new(Uuid::new_v4(), "steam", "u");
        let before = cp.updated_at;
        cp.advance(50, 48);
        assert_eq!(cp.last_offset, 50);
        assert_eq!(cp.games_synced, 48);
        assert!(cp.updated_at >= before);
    }
}
