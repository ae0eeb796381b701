use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::error::Result;
use crate::models::Platform;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PlatformsQuery {
    #[serde(default)]
    pub enabled: bool,
}

pub async fn list_platforms(
    State(state): State<AppState>,
    Query(query): Query<PlatformsQuery>,
) -> Result<Json<Vec<Platform>>> {
    let platforms = state.store.list_platforms(query.enabled).await?;
    Ok(Json(platforms))
}
