use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Achievement {
    pub id: Uuid,
    pub game_id: Uuid,
    pub platform_id: Uuid,
    pub platform_achievement_id: String,
    pub title: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub points: i32,
    pub rarity: Option<f32>,
    pub hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserAchievement {
    pub user_game_id: Uuid,
    pub achievement_id: Uuid,
    pub unlocked_at: DateTime<Utc>,
    pub progress_percent: f32,
}

/// Achievement definition as fetched from a platform, before it is linked to
/// catalog rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformAchievement {
    pub platform_achievement_id: String,
    pub title: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub hidden: bool,
    /// Global unlock percentage when the platform reports one.
    pub rarity: Option<f32>,
    /// Unlock time for this user, when unlocked.
    pub unlocked_at: Option<DateTime<Utc>>,
}
