use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A user's connection to one external platform.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserLibrary {
    pub id: Uuid,
    pub platform_id: Uuid,
    pub user_identifier: String,
    pub display_name: String,
    /// Opaque platform credentials; never serialized out of the store layer.
    #[serde(skip_serializing, default)]
    pub credentials: Option<serde_json::Value>,
    pub sync_enabled: bool,
    pub sync_status: String,
    pub sync_error: Option<String>,
    /// Opaque resume document owned by the platform adapter family.
    pub sync_position: Option<serde_json::Value>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Library sync lifecycle states mirrored from the sync worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Queued,
    InProgress,
    Completed,
    Failed,
    RateLimited,
    Cancelled,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Queued => "queued",
            SyncStatus::InProgress => "in_progress",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::RateLimited => "rate_limited",
            SyncStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed
                | SyncStatus::Failed
                | SyncStatus::RateLimited
                | SyncStatus::Cancelled
        )
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateLibraryRequest {
    pub platform_id: Uuid,
    #[validate(length(min = 1, max = 128))]
    pub user_identifier: String,
    #[validate(length(min = 1, max = 256))]
    pub display_name: String,
    pub credentials: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateLibraryRequest {
    #[validate(length(min = 1, max = 256))]
    pub display_name: Option<String>,
    pub sync_enabled: Option<bool>,
    pub credentials: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct TriggerSyncRequest {
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_sync_type")]
    pub sync_type: String,
}

fn default_sync_type() -> String {
    "manual".to_string()
}
