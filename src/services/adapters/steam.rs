//! Steam platform adapter.
//!
//! `GetOwnedGames` returns the whole library in one call; the adapter caches
//! it per user for a bounded period and slices pages out of the cache so the
//! worker sees a uniform offset/limit interface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use moka::future::Cache;
use reqwest::Client;
use serde::Deserialize;

use super::{AdapterError, PlatformAdapter};
use crate::config::SteamConfig;
use crate::models::{validate_metacritic_score, ExternalIds, NormalizedGame, PlatformAchievement};

const STEAM_CDN_BASE: &str = "https://cdn.cloudflare.steamstatic.com/steam/apps";
const STEAM_MEDIA_BASE: &str = "https://media.steampowered.com/steamcommunity/public/images/apps";

pub struct SteamAdapter {
    client: Client,
    api_key: Option<String>,
    api_base: String,
    store_api_base: String,
    /// Whole-library cache keyed by user identifier.
    library_cache: Cache<String, Arc<Vec<NormalizedGame>>>,
}

#[derive(Debug, Deserialize)]
struct OwnedGamesEnvelope {
    response: OwnedGamesResponse,
}

#[derive(Debug, Default, Deserialize)]
struct OwnedGamesResponse {
    #[serde(default)]
    game_count: Option<u32>,
    #[serde(default)]
    games: Option<Vec<OwnedGame>>,
}

#[derive(Debug, Deserialize)]
struct OwnedGame {
    appid: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    playtime_forever: i64,
    #[serde(default)]
    img_icon_url: Option<String>,
    #[serde(default)]
    rtime_last_played: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PlayerAchievementsEnvelope {
    playerstats: PlayerStats,
}

#[derive(Debug, Deserialize)]
struct PlayerStats {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    achievements: Option<Vec<PlayerAchievement>>,
}

#[derive(Debug, Deserialize)]
struct PlayerAchievement {
    apiname: String,
    achieved: u8,
    #[serde(default)]
    unlocktime: i64,
}

#[derive(Debug, Deserialize)]
struct SchemaEnvelope {
    #[serde(default)]
    game: Option<SchemaGame>,
}

#[derive(Debug, Default, Deserialize)]
struct SchemaGame {
    #[serde(rename = "availableGameStats", default)]
    available_game_stats: Option<SchemaStats>,
}

#[derive(Debug, Default, Deserialize)]
struct SchemaStats {
    #[serde(default)]
    achievements: Option<Vec<SchemaAchievement>>,
}

#[derive(Debug, Deserialize)]
struct SchemaAchievement {
    name: String,
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    hidden: u8,
}

impl SteamAdapter {
    pub fn new(config: &SteamConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key: config.api_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            store_api_base: config.store_api_base.trim_end_matches('/').to_string(),
            library_cache: Cache::builder()
                .time_to_live(config.library_cache_ttl)
                .max_capacity(1_000)
                .build(),
        }
    }

    fn api_key(&self) -> Result<&str, AdapterError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| AdapterError::Auth("STEAM_API_KEY is not configured".to_string()))
    }

    fn retry_after(response: &reqwest::Response) -> Option<u64> {
        response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        context: &str,
    ) -> Result<T, AdapterError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = Self::retry_after(&response);
            return Err(AdapterError::from_status(status.as_u16(), retry_after, context));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| AdapterError::Permanent(format!("{}: bad payload: {}", context, e)))
    }

    /// Fetch the full owned-games list, through the cache.
    async fn owned_games(
        &self,
        user_identifier: &str,
    ) -> Result<Arc<Vec<NormalizedGame>>, AdapterError> {
        if let Some(cached) = self.library_cache.get(user_identifier).await {
            return Ok(cached);
        }

        let key = self.api_key()?;
        let url = format!(
            "{}/IPlayerService/GetOwnedGames/v1/?key={}&steamid={}&include_appinfo=1&include_played_free_games=1&format=json",
            self.api_base,
            urlencoding::encode(key),
            urlencoding::encode(user_identifier),
        );

        let envelope: OwnedGamesEnvelope = self.get_json(&url, "GetOwnedGames").await?;

        // Steam answers unknown or private profiles with an empty response
        // object rather than an error status.
        let games = match (envelope.response.game_count, envelope.response.games) {
            (Some(_), Some(games)) => games,
            (Some(0), None) => Vec::new(),
            _ => {
                return Err(AdapterError::NotFound(format!(
                    "steam user {} has no visible library",
                    user_identifier
                )))
            }
        };

        let normalized: Vec<NormalizedGame> =
            games.into_iter().map(transform_owned_game).collect();
        let shared = Arc::new(normalized);
        self.library_cache
            .insert(user_identifier.to_string(), shared.clone())
            .await;
        Ok(shared)
    }
}

/// Map one `GetOwnedGames` entry to the universal shape.
fn transform_owned_game(raw: OwnedGame) -> NormalizedGame {
    let appid = raw.appid.to_string();
    let title = raw.name.clone().unwrap_or_else(|| format!("App {}", appid));

    let cover_image_url = Some(format!("{}/{}/library_600x900.jpg", STEAM_CDN_BASE, appid));
    let mut screenshots = vec![format!("{}/{}/header.jpg", STEAM_CDN_BASE, appid)];
    if let Some(hash) = raw.img_icon_url.as_deref().filter(|h| !h.is_empty()) {
        screenshots.push(format!("{}/{}/{}.jpg", STEAM_MEDIA_BASE, appid, hash));
    }

    let last_played_at = raw
        .rtime_last_played
        .filter(|&ts| ts > 0)
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));

    let platform_data = serde_json::json!({
        "appid": raw.appid,
        "img_icon_url": raw.img_icon_url,
        "rtime_last_played": raw.rtime_last_played,
    });

    NormalizedGame {
        platform_game_id: appid.clone(),
        title,
        description: None,
        release_date: None,
        developer: None,
        publisher: None,
        genres: Vec::new(),
        metacritic_score: None,
        cover_image_url,
        screenshots,
        external_ids: ExternalIds {
            steam_app_id: Some(appid),
            ..Default::default()
        },
        playtime_minutes: raw.playtime_forever.max(0),
        last_played_at,
        platform_data,
    }
}

#[async_trait]
impl PlatformAdapter for SteamAdapter {
    fn platform_code(&self) -> &str {
        "steam"
    }

    async fn count_games(&self, user_identifier: &str) -> Result<u32, AdapterError> {
        let games = self.owned_games(user_identifier).await?;
        Ok(games.len() as u32)
    }

    async fn fetch_batch(
        &self,
        user_identifier: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<NormalizedGame>, AdapterError> {
        let games = self.owned_games(user_identifier).await?;
        let start = (offset as usize).min(games.len());
        let end = (start + limit as usize).min(games.len());
        Ok(games[start..end].to_vec())
    }

    async fn game_details(
        &self,
        platform_game_id: &str,
    ) -> Result<Option<NormalizedGame>, AdapterError> {
        let url = format!(
            "{}/api/appdetails?appids={}",
            self.store_api_base,
            urlencoding::encode(platform_game_id),
        );

        let body: serde_json::Value = self.get_json(&url, "appdetails").await?;
        let entry = &body[platform_game_id];
        if entry["success"] != serde_json::Value::Bool(true) {
            return Ok(None);
        }

        let data = &entry["data"];
        let title = match data["name"].as_str() {
            Some(name) => name.to_string(),
            None => return Ok(None),
        };

        let genres = data["genres"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|g| g["description"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let release_date = data["release_date"]["date"]
            .as_str()
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%e %b, %Y").ok());

        // Boundary ingress check: an out-of-range score from upstream is
        // dropped rather than stored.
        let metacritic_score = data["metacritic"]["score"]
            .as_i64()
            .map(|score| score as i16)
            .filter(|score| validate_metacritic_score(*score));

        Ok(Some(NormalizedGame {
            platform_game_id: platform_game_id.to_string(),
            title,
            description: data["short_description"].as_str().map(String::from),
            release_date,
            developer: data["developers"][0].as_str().map(String::from),
            publisher: data["publishers"][0].as_str().map(String::from),
            genres,
            metacritic_score,
            cover_image_url: Some(format!(
                "{}/{}/library_600x900.jpg",
                STEAM_CDN_BASE, platform_game_id
            )),
            screenshots: Vec::new(),
            external_ids: ExternalIds {
                steam_app_id: Some(platform_game_id.to_string()),
                ..Default::default()
            },
            playtime_minutes: 0,
            last_played_at: None,
            platform_data: serde_json::json!({}),
        }))
    }

    async fn fetch_achievements(
        &self,
        user_identifier: &str,
        platform_game_id: &str,
    ) -> Result<Vec<PlatformAchievement>, AdapterError> {
        let key = self.api_key()?;

        let schema_url = format!(
            "{}/ISteamUserStats/GetSchemaForGame/v2/?key={}&appid={}",
            self.api_base,
            urlencoding::encode(key),
            urlencoding::encode(platform_game_id),
        );
        let schema: SchemaEnvelope = self.get_json(&schema_url, "GetSchemaForGame").await?;
        let definitions = schema
            .game
            .and_then(|g| g.available_game_stats)
            .and_then(|s| s.achievements)
            .unwrap_or_default();
        if definitions.is_empty() {
            return Ok(Vec::new());
        }

        let player_url = format!(
            "{}/ISteamUserStats/GetPlayerAchievements/v1/?key={}&steamid={}&appid={}",
            self.api_base,
            urlencoding::encode(key),
            urlencoding::encode(user_identifier),
            urlencoding::encode(platform_game_id),
        );
        let player: PlayerAchievementsEnvelope =
            self.get_json(&player_url, "GetPlayerAchievements").await?;
        let unlocks = if player.playerstats.success {
            player.playerstats.achievements.unwrap_or_default()
        } else {
            Vec::new()
        };

        let achievements = definitions
            .into_iter()
            .map(|def| {
                let unlocked_at = unlocks
                    .iter()
                    .find(|u| u.apiname == def.name && u.achieved == 1)
                    .and_then(|u| {
                        Some(u.unlocktime)
                            .filter(|&ts| ts > 0)
                            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
                    });
                PlatformAchievement {
                    platform_achievement_id: def.name,
                    title: def.display_name,
                    description: def.description,
                    icon_url: def.icon,
                    hidden: def.hidden == 1,
                    rarity: None,
                    unlocked_at,
                }
            })
            .collect();

        Ok(achievements)
    }
}
