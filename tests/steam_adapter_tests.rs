//! Steam adapter behavior against a mocked Steam Web API.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use game_library_backend::config::SteamConfig;
use game_library_backend::services::adapters::{AdapterError, PlatformAdapter, SteamAdapter};

const USER: &str = "76561198000000000";

fn config(server: &MockServer) -> SteamConfig {
    SteamConfig {
        api_key: Some("test-key".to_string()),
        api_base: server.uri(),
        store_api_base: server.uri(),
        library_cache_ttl: Duration::from_secs(3600),
    }
}

fn owned_games_body() -> serde_json::Value {
    json!({
        "response": {
            "game_count": 2,
            "games": [
                {
                    "appid": 292030,
                    "name": "The Witcher 3: Wild Hunt",
                    "playtime_forever": 7620,
                    "img_icon_url": "abc123",
                    "rtime_last_played": 1_690_000_000
                },
                {
                    "appid": 1145360,
                    "name": "Hades",
                    "playtime_forever": 2280,
                    "img_icon_url": "def456",
                    "rtime_last_played": 0
                }
            ]
        }
    })
}

#[tokio::test]
async fn whole_library_is_fetched_once_and_sliced_per_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/IPlayerService/GetOwnedGames/v1/"))
        .and(query_param("steamid", USER))
        .respond_with(ResponseTemplate::new(200).set_body_json(owned_games_body()))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = SteamAdapter::new(&config(&server));

    assert_eq!(adapter.count_games(USER).await.unwrap(), 2);

    // Page slicing out of the cache; no second upstream call.
    let first = adapter.fetch_batch(USER, 0, 1).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].platform_game_id, "292030");
    assert_eq!(first[0].playtime_minutes, 7620);
    assert_eq!(first[0].external_ids.steam_app_id.as_deref(), Some("292030"));

    let second = adapter.fetch_batch(USER, 1, 10).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].title, "Hades");
    assert!(second[0].last_played_at.is_none());

    let past_end = adapter.fetch_batch(USER, 5, 10).await.unwrap();
    assert!(past_end.is_empty());
}

#[tokio::test]
async fn private_profile_is_classified_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/IPlayerService/GetOwnedGames/v1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": {} })))
        .mount(&server)
        .await;

    let adapter = SteamAdapter::new(&config(&server));
    assert!(matches!(
        adapter.count_games(USER).await,
        Err(AdapterError::NotFound(_))
    ));
}

#[tokio::test]
async fn http_429_maps_to_rate_limited_with_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/IPlayerService/GetOwnedGames/v1/"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "120"))
        .mount(&server)
        .await;

    let adapter = SteamAdapter::new(&config(&server));
    match adapter.count_games(USER).await {
        Err(AdapterError::RateLimited { retry_after }) => assert_eq!(retry_after, Some(120)),
        other => panic!("expected rate limited, got {:?}", other),
    }
}

#[tokio::test]
async fn http_403_maps_to_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/IPlayerService/GetOwnedGames/v1/"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let adapter = SteamAdapter::new(&config(&server));
    assert!(matches!(
        adapter.count_games(USER).await,
        Err(AdapterError::Auth(_))
    ));
}

#[tokio::test]
async fn missing_api_key_is_an_auth_error_without_a_request() {
    let server = MockServer::start().await;
    let mut config = config(&server);
    config.api_key = None;

    let adapter = SteamAdapter::new(&config);
    assert!(matches!(
        adapter.count_games(USER).await,
        Err(AdapterError::Auth(_))
    ));
}

#[tokio::test]
async fn achievements_join_schema_with_player_unlocks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ISteamUserStats/GetSchemaForGame/v2/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "game": {
                "availableGameStats": {
                    "achievements": [
                        {"name": "ACH_WIN", "displayName": "Winner", "description": "Win once", "icon": "https://example/icon.jpg", "hidden": 0},
                        {"name": "ACH_SECRET", "displayName": "Secret", "hidden": 1}
                    ]
                }
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ISteamUserStats/GetPlayerAchievements/v1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "playerstats": {
                "success": true,
                "achievements": [
                    {"apiname": "ACH_WIN", "achieved": 1, "unlocktime": 1_690_000_000},
                    {"apiname": "ACH_SECRET", "achieved": 0, "unlocktime": 0}
                ]
            }
        })))
        .mount(&server)
        .await;

    let adapter = SteamAdapter::new(&config(&server));
    let achievements = adapter.fetch_achievements(USER, "292030").await.unwrap();

    assert_eq!(achievements.len(), 2);
    let winner = achievements
        .iter()
        .find(|a| a.platform_achievement_id == "ACH_WIN")
        .unwrap();
    assert_eq!(winner.title, "Winner");
    assert!(winner.unlocked_at.is_some());
    assert!(!winner.hidden);

    let secret = achievements
        .iter()
        .find(|a| a.platform_achievement_id == "ACH_SECRET")
        .unwrap();
    assert!(secret.unlocked_at.is_none());
    assert!(secret.hidden);
}

#[tokio::test]
async fn store_details_are_transformed_when_present() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/appdetails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "292030": {
                "success": true,
                "data": {
                    "name": "The Witcher 3: Wild Hunt",
                    "short_description": "An open world RPG.",
                    "developers": ["CD PROJEKT RED"],
                    "publishers": ["CD PROJEKT RED"],
                    "genres": [{"id": "3", "description": "RPG"}],
                    "metacritic": {"score": 92},
                    "release_date": {"coming_soon": false, "date": "18 May, 2015"}
                }
            }
        })))
        .mount(&server)
        .await;

    let adapter = SteamAdapter::new(&config(&server));
    let details = adapter.game_details("292030").await.unwrap().unwrap();

    assert_eq!(details.title, "The Witcher 3: Wild Hunt");
    assert_eq!(details.developer.as_deref(), Some("CD PROJEKT RED"));
    assert_eq!(details.genres, vec!["RPG"]);
    assert_eq!(details.metacritic_score, Some(92));
    assert_eq!(
        details.release_date.unwrap().to_string(),
        "2015-05-18".to_string()
    );

    // Unknown app ids come back success=false.
    let server2 = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/appdetails"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "999999": { "success": false } })),
        )
        .mount(&server2)
        .await;
    let adapter2 = SteamAdapter::new(&config(&server2));
    assert!(adapter2.game_details("999999").await.unwrap().is_none());
}

#[tokio::test]
async fn out_of_range_metacritic_is_dropped_at_ingress() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/appdetails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "10": {
                "success": true,
                "data": {
                    "name": "Counter-Strike",
                    "metacritic": {"score": 101}
                }
            }
        })))
        .mount(&server)
        .await;

    let adapter = SteamAdapter::new(&config(&server));
    let details = adapter.game_details("10").await.unwrap().unwrap();
    assert_eq!(details.title, "Counter-Strike");
    assert_eq!(details.metacritic_score, None);
}
