use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Audit log row for one sync run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncOperation {
    pub id: Uuid,
    pub library_id: Uuid,
    pub sync_type: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub games_processed: i32,
    pub games_added: i32,
    pub games_updated: i32,
    pub errors_count: i32,
    pub error_details: Option<String>,
    pub log: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    FullSync,
    IncrementalSync,
    ManualSync,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::FullSync => "full_sync",
            SyncType::IncrementalSync => "incremental_sync",
            SyncType::ManualSync => "manual_sync",
        }
    }

    /// Accepts the request-level aliases used by the HTTP surface.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "full" | "full_sync" => Some(SyncType::FullSync),
            "incremental" | "incremental_sync" => Some(SyncType::IncrementalSync),
            "manual" | "manual_sync" => Some(SyncType::ManualSync),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Started,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Started => "started",
            OperationStatus::InProgress => "in_progress",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
        }
    }
}

/// Summary returned by the sync worker when a job finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSummary {
    pub operation_id: Option<Uuid>,
    pub library_id: Uuid,
    pub status: String,
    pub games_processed: u32,
    pub games_added: u32,
    pub games_updated: u32,
    pub errors_count: u32,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_type_accepts_request_aliases() {
        assert_eq!(SyncType::parse("manual"), Some(SyncType::ManualSync));
        assert_eq!(SyncType::parse("full"), Some(SyncType::FullSync));
        assert_eq!(
            SyncType::parse("incremental_sync"),
            Some(SyncType::IncrementalSync)
        );
        assert_eq!(SyncType::parse("bogus"), None);
    }
}
