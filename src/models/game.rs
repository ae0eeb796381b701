use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Cross-platform catalog game. `search_vector` lives only in the database;
/// it is rebuilt by the store whenever the weighted text fields change.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Game {
    pub id: Uuid,
    pub title: String,
    pub normalized_title: String,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub platforms_available: Vec<String>,
    pub esrb_rating: Option<String>,
    pub esrb_descriptors: Vec<String>,
    pub pegi_rating: Option<String>,
    pub metacritic_score: Option<i16>,
    pub steam_score: Option<i16>,
    pub cover_image_url: Option<String>,
    pub screenshots: Vec<String>,
    pub videos: Vec<String>,
    pub external_ids: serde_json::Value,
    pub playtime_main_hours: Option<f32>,
    pub playtime_completionist_hours: Option<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Known external id keys inside `Game::external_ids`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExternalIds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steam_app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gog_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epic_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xbox_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub igdb_id: Option<String>,
}

impl ExternalIds {
    /// The id carried for a given platform code, if any.
    pub fn for_platform(&self, platform_code: &str) -> Option<&str> {
        match platform_code {
            "steam" => self.steam_app_id.as_deref(),
            "gog" => self.gog_id.as_deref(),
            "epic" => self.epic_id.as_deref(),
            "xbox" => self.xbox_id.as_deref(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steam_app_id.is_none()
            && self.gog_id.is_none()
            && self.epic_id.is_none()
            && self.xbox_id.is_none()
            && self.igdb_id.is_none()
    }
}

/// ESRB content ratings accepted by the catalog.
pub const ESRB_RATINGS: &[&str] = &["E", "E10+", "T", "M", "AO", "RP"];

/// Operator corrections to editorial catalog fields.
#[derive(Debug, Deserialize)]
pub struct UpdateGameRequest {
    pub description: Option<String>,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub metacritic_score: Option<i16>,
    pub steam_score: Option<i16>,
}

/// A platform game mapped to the universal shape by an adapter's `transform`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedGame {
    pub platform_game_id: String,
    pub title: String,
    pub description: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub developer: Option<String>,
    pub publisher: Option<String>,
    pub genres: Vec<String>,
    pub metacritic_score: Option<i16>,
    pub cover_image_url: Option<String>,
    pub screenshots: Vec<String>,
    pub external_ids: ExternalIds,
    pub playtime_minutes: i64,
    pub last_played_at: Option<DateTime<Utc>>,
    /// Raw platform payload retained opaquely on the user-game link.
    pub platform_data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_ids_lookup_by_platform() {
        let ids = ExternalIds {
            steam_app_id: Some("292030".to_string()),
            ..Default::default()
        };
        assert_eq!(ids.for_platform("steam"), Some("292030"));
        assert_eq!(ids.for_platform("gog"), None);
        assert!(!ids.is_empty());
        assert!(ExternalIds::default().is_empty());
    }

    #[test]
    fn external_ids_omit_absent_keys() {
        let ids = ExternalIds {
            steam_app_id: Some("570".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&ids).unwrap();
        assert_eq!(json, serde_json::json!({"steam_app_id": "570"}));
    }
}
