use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-library ownership and playtime fact linking a library to a catalog game.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserGame {
    pub id: Uuid,
    pub library_id: Uuid,
    pub game_id: Uuid,
    pub platform_game_id: Option<String>,
    pub owned: bool,
    pub owned_at: Option<DateTime<Utc>>,
    pub total_playtime_minutes: i64,
    pub first_played_at: Option<DateTime<Utc>>,
    pub last_played_at: Option<DateTime<Utc>>,
    pub game_status: String,
    pub user_rating: Option<i16>,
    pub user_notes: Option<String>,
    pub is_favorite: bool,
    pub platform_data: serde_json::Value,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Unplayed,
    Playing,
    Completed,
    Abandoned,
    Wishlist,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Unplayed => "unplayed",
            GameStatus::Playing => "playing",
            GameStatus::Completed => "completed",
            GameStatus::Abandoned => "abandoned",
            GameStatus::Wishlist => "wishlist",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unplayed" => Some(GameStatus::Unplayed),
            "playing" => Some(GameStatus::Playing),
            "completed" => Some(GameStatus::Completed),
            "abandoned" => Some(GameStatus::Abandoned),
            "wishlist" => Some(GameStatus::Wishlist),
            _ => None,
        }
    }
}

/// User-editable attributes on a library's game link.
#[derive(Debug, Deserialize)]
pub struct UpdateUserGameRequest {
    pub game_status: Option<String>,
    pub user_rating: Option<i16>,
    pub user_notes: Option<String>,
    pub is_favorite: Option<bool>,
}

/// Bounds checks for user-supplied attributes; the schema enforces the same
/// ranges with CHECK constraints.
pub fn validate_user_rating(rating: i16) -> bool {
    (1..=5).contains(&rating)
}

pub fn validate_metacritic_score(score: i16) -> bool {
    (0..=100).contains(&score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_bounds() {
        assert!(validate_user_rating(1));
        assert!(validate_user_rating(5));
        assert!(!validate_user_rating(0));
        assert!(!validate_user_rating(6));
    }

    #[test]
    fn metacritic_bounds() {
        assert!(validate_metacritic_score(0));
        assert!(validate_metacritic_score(100));
        assert!(!validate_metacritic_score(101));
        assert!(!validate_metacritic_score(-1));
    }

    #[test]
    fn game_status_parse_round_trips() {
        for status in [
            GameStatus::Unplayed,
            GameStatus::Playing,
            GameStatus::Completed,
            GameStatus::Abandoned,
            GameStatus::Wishlist,
        ] {
            assert_eq!(GameStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(GameStatus::parse("backlog"), None);
    }
}
