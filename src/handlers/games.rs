//! Catalog read surface: listing, weighted search, and detail lookup.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::libraries::{PageQuery, Paginated};
use crate::error::{AppError, Result};
use crate::models::{
    validate_metacritic_score, validate_user_rating, Game, GameStatus, UpdateGameRequest,
    UpdateUserGameRequest, UserGame,
};
use crate::services::catalog::{GameWithUserData, SearchQuery};
use crate::AppState;

pub async fn list_games(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Paginated<Game>>> {
    let limit = query.limit.clamp(1, 100);
    let (games, total) = state.store.list_games(query.page.max(1), limit).await?;
    Ok(Json(Paginated::new(games, query.page.max(1), limit, total)))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    /// Comma-separated platform codes.
    pub platforms: Option<String>,
    /// Comma-separated user game statuses.
    pub statuses: Option<String>,
    /// Comma-separated genres.
    pub genres: Option<String>,
    pub min_metacritic: Option<i16>,
    pub max_metacritic: Option<i16>,
    #[serde(default)]
    pub owned: bool,
    pub library_id: Option<Uuid>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    20
}

fn split_csv(raw: &Option<String>) -> Vec<String> {
    raw.as_deref()
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn check_score(field: &str, score: Option<i16>) -> Result<()> {
    if let Some(score) = score {
        if !validate_metacritic_score(score) {
            return Err(AppError::InvalidField {
                field: field.to_string(),
                message: format!("{} is outside 0..=100", score),
            });
        }
    }
    Ok(())
}

pub async fn search_games(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Paginated<Game>>> {
    check_score("min_metacritic", params.min_metacritic)?;
    check_score("max_metacritic", params.max_metacritic)?;

    let query = SearchQuery {
        q: params.q.clone(),
        platforms: split_csv(&params.platforms),
        statuses: split_csv(&params.statuses),
        genres: split_csv(&params.genres),
        min_metacritic: params.min_metacritic,
        max_metacritic: params.max_metacritic,
        owned_only: params.owned,
        library_id: params.library_id,
        page: params.page.max(1),
        limit: params.limit.clamp(1, 100),
    };

    let (games, total) = state.store.search_games(&query).await?;
    Ok(Json(Paginated::new(games, query.page, query.limit, total)))
}

#[derive(Debug, Deserialize)]
pub struct DetailsQuery {
    pub library_id: Option<Uuid>,
}

pub async fn game_details(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DetailsQuery>,
) -> Result<Json<GameWithUserData>> {
    Ok(Json(state.store.game_details(id, query.library_id).await?))
}

/// Operator corrections to editorial catalog fields.
pub async fn update_game(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateGameRequest>,
) -> Result<Json<Game>> {
    check_score("metacritic_score", request.metacritic_score)?;
    check_score("steam_score", request.steam_score)?;
    Ok(Json(state.store.update_game_editorial(id, &request).await?))
}

/// User-editable attributes on one library's game link.
pub async fn update_user_game(
    State(state): State<AppState>,
    Path((library_id, game_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateUserGameRequest>,
) -> Result<Json<UserGame>> {
    if let Some(rating) = request.user_rating {
        if !validate_user_rating(rating) {
            return Err(AppError::InvalidField {
                field: "user_rating".to_string(),
                message: format!("{} is outside 1..=5", rating),
            });
        }
    }
    if let Some(status) = request.game_status.as_deref() {
        if GameStatus::parse(status).is_none() {
            return Err(AppError::InvalidField {
                field: "game_status".to_string(),
                message: format!("unknown status {:?}", status),
            });
        }
    }
    Ok(Json(
        state
            .store
            .update_user_game(library_id, game_id, &request)
            .await?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_splitting() {
        assert_eq!(
            split_csv(&Some("steam, gog ,epic".to_string())),
            vec!["steam", "gog", "epic"]
        );
        assert!(split_csv(&Some(" ,".to_string())).is_empty());
        assert!(split_csv(&None).is_empty());
    }

    #[test]
    fn score_filter_bounds() {
        assert!(check_score("min", Some(0)).is_ok());
        assert!(check_score("min", Some(100)).is_ok());
        assert!(check_score("min", Some(101)).is_err());
        assert!(check_score("min", Some(-1)).is_err());
        assert!(check_score("min", None).is_ok());
    }
}
