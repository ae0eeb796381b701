use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Live progress document published on the bus and mirrored for polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub operation_id: Uuid,
    pub library_id: Uuid,
    pub platform: String,
    pub status: ProgressStatus,
    pub progress_percent: f32,
    pub games_processed: u32,
    pub games_total: Option<u32>,
    pub games_added: u32,
    pub games_updated: u32,
    pub current_game: Option<CurrentGame>,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub errors: Vec<String>,
    /// Per-library publisher sequence; monotonic within one operation.
    pub sequence: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentGame {
    pub title: String,
    pub platform_game_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Starting,
    Syncing,
    Completed,
    Failed,
    RateLimited,
    Cancelled,
}

impl ProgressStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressStatus::Starting | ProgressStatus::Syncing)
    }

    /// Bus event name for this status transition.
    pub fn event_name(&self) -> &'static str {
        match self {
            ProgressStatus::Starting => "sync_started",
            ProgressStatus::Syncing => "sync_progress",
            ProgressStatus::Completed => "sync_completed",
            ProgressStatus::Failed => "sync_failed",
            ProgressStatus::RateLimited => "sync_rate_limited",
            ProgressStatus::Cancelled => "sync_cancelled",
        }
    }
}

pub fn progress_percent(processed: u32, total: Option<u32>) -> f32 {
    match total {
        Some(0) => 100.0,
        Some(total) => ((processed as f32 / total as f32) * 100.0).clamp(0.0, 100.0),
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_handles_empty_library() {
        assert_eq!(progress_percent(0, Some(0)), 100.0);
        assert_eq!(progress_percent(0, None), 0.0);
        assert_eq!(progress_percent(89, Some(198)).round(), 45.0);
        assert_eq!(progress_percent(250, Some(200)), 100.0);
    }

    #[test]
    fn terminal_statuses_flush() {
        assert!(ProgressStatus::Completed.is_terminal());
        assert!(ProgressStatus::RateLimited.is_terminal());
        assert!(!ProgressStatus::Syncing.is_terminal());
    }
}
