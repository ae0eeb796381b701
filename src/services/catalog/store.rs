//! Postgres-backed catalog store with idempotent upserts and weighted
//! full-text search.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    orient_edge, Achievement, CreateLibraryRequest, Game, MatchMethod, NormalizedGame,
    OperationStatus, Platform, PlatformAchievement, SyncOperation, SyncStatus, SyncType,
    UpdateGameRequest, UpdateLibraryRequest, UpdateUserGameRequest, UserGame, UserLibrary,
};

use super::identity::{self, GameCandidate, Resolution};

/// The catalog surface the sync worker drives. Narrow on purpose so scenario
/// tests can substitute an in-memory implementation.
#[async_trait]
pub trait SyncCatalog: Send + Sync {
    async fn library_sync_target(&self, library_id: Uuid) -> Result<SyncTarget>;

    async fn upsert_games_batch(
        &self,
        library_id: Uuid,
        platform_code: &str,
        games: &[NormalizedGame],
    ) -> Result<BatchOutcome>;

    async fn record_sync_operation(&self, library_id: Uuid, sync_type: SyncType) -> Result<Uuid>;

    async fn update_sync_operation(&self, update: OperationUpdate) -> Result<()>;

    async fn set_library_status(
        &self,
        library_id: Uuid,
        status: SyncStatus,
        error: Option<String>,
    ) -> Result<()>;
}

/// What the worker needs to know about a library before syncing it.
#[derive(Debug, Clone)]
pub struct SyncTarget {
    pub library_id: Uuid,
    pub platform_id: Uuid,
    pub platform_code: String,
    pub user_identifier: String,
    pub sync_enabled: bool,
}

/// Counters and notifications from one upsert batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub added: u32,
    pub updated: u32,
    pub unchanged: u32,
    /// Operation-log notes, e.g. playtime regressions flagged for review.
    pub notes: Vec<String>,
    pub events: Vec<LibraryGameEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LibraryGameEvent {
    pub kind: GameEventKind,
    pub game_id: Uuid,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameEventKind {
    GameAdded,
    GameUpdated,
}

/// Counter/status update for a sync operation row. Counters only move forward.
#[derive(Debug, Clone)]
pub struct OperationUpdate {
    pub operation_id: Uuid,
    pub status: OperationStatus,
    pub games_processed: u32,
    pub games_added: u32,
    pub games_updated: u32,
    pub errors_count: u32,
    pub error_details: Option<String>,
    pub log_notes: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub platforms: Vec<String>,
    pub statuses: Vec<String>,
    pub genres: Vec<String>,
    pub min_metacritic: Option<i16>,
    pub max_metacritic: Option<i16>,
    pub owned_only: bool,
    pub library_id: Option<Uuid>,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Serialize)]
pub struct GameWithUserData {
    #[serde(flatten)]
    pub game: Game,
    pub user_game: Option<UserGame>,
}

const GAME_COLUMNS: &str = "id, title, normalized_title, slug, description, release_date, \
     developer, publisher, genres, tags, platforms_available, esrb_rating, esrb_descriptors, \
     pegi_rating, metacritic_score, steam_score, cover_image_url, screenshots, videos, \
     external_ids, playtime_main_hours, playtime_completionist_hours, created_at, updated_at";

/// JSONB key inside `games.external_ids` for a platform code.
fn external_id_key(platform_code: &str) -> Option<&'static str> {
    match platform_code {
        "steam" => Some("steam_app_id"),
        "gog" => Some("gog_id"),
        "epic" => Some("epic_id"),
        "xbox" => Some("xbox_id"),
        _ => None,
    }
}

#[derive(Clone)]
pub struct CatalogStore {
    pool: PgPool,
}

impl CatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ── Platforms ───────────────────────────────────────────────

    pub async fn list_platforms(&self, enabled_only: bool) -> Result<Vec<Platform>> {
        let sql = if enabled_only {
            "SELECT * FROM platforms WHERE api_available ORDER BY code"
        } else {
            "SELECT * FROM platforms ORDER BY code"
        };
        Ok(sqlx::query_as::<_, Platform>(sql).fetch_all(&self.pool).await?)
    }

    pub async fn platform_by_id(&self, id: Uuid) -> Result<Platform> {
        sqlx::query_as::<_, Platform>("SELECT * FROM platforms WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Platform"))
    }

    /// Idempotent by the unique lowercase code; used to extend the seeded
    /// platform catalog.
    pub async fn upsert_platform(
        &self,
        code: &str,
        name: &str,
        api_available: bool,
    ) -> Result<Platform> {
        Ok(sqlx::query_as::<_, Platform>(
            "INSERT INTO platforms (code, name, api_available)
             VALUES (lower($1), $2, $3)
             ON CONFLICT (code) DO UPDATE SET
                 name = EXCLUDED.name,
                 api_available = EXCLUDED.api_available
             RETURNING *",
        )
        .bind(code)
        .bind(name)
        .bind(api_available)
        .fetch_one(&self.pool)
        .await?)
    }

    // ── Libraries ───────────────────────────────────────────────

    pub async fn create_library(&self, req: &CreateLibraryRequest) -> Result<UserLibrary> {
        // Validates the platform exists up front for a clean 404.
        self.platform_by_id(req.platform_id).await?;

        let result = sqlx::query_as::<_, UserLibrary>(
            "INSERT INTO user_libraries (platform_id, user_identifier, display_name, credentials)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(req.platform_id)
        .bind(&req.user_identifier)
        .bind(&req.display_name)
        .bind(&req.credentials)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(library) => Ok(library),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(AppError::LibraryAlreadyExists)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn list_libraries(&self, page: u32, limit: u32) -> Result<(Vec<UserLibrary>, i64)> {
        let offset = (page.saturating_sub(1) as i64) * limit as i64;
        let libraries = sqlx::query_as::<_, UserLibrary>(
            "SELECT * FROM user_libraries ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT count(*) FROM user_libraries")
            .fetch_one(&self.pool)
            .await?;
        Ok((libraries, total))
    }

    pub async fn get_library(&self, id: Uuid) -> Result<UserLibrary> {
        sqlx::query_as::<_, UserLibrary>("SELECT * FROM user_libraries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found("Library"))
    }

    pub async fn update_library(&self, id: Uuid, req: &UpdateLibraryRequest) -> Result<UserLibrary> {
        sqlx::query_as::<_, UserLibrary>(
            "UPDATE user_libraries SET
                 display_name = COALESCE($2, display_name),
                 sync_enabled = COALESCE($3, sync_enabled),
                 credentials = COALESCE($4, credentials),
                 updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(&req.display_name)
        .bind(req.sync_enabled)
        .bind(&req.credentials)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("Library"))
    }

    /// Deletes a library; user games and achievements cascade, catalog games
    /// are retained.
    pub async fn delete_library(&self, id: Uuid) -> Result<()> {
        let rows = sqlx::query("DELETE FROM user_libraries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if rows == 0 {
            return Err(AppError::not_found("Library"));
        }
        Ok(())
    }

    /// Libraries eligible for a scheduled incremental sync.
    pub async fn libraries_for_scheduled_sync(&self) -> Result<Vec<UserLibrary>> {
        Ok(sqlx::query_as::<_, UserLibrary>(
            "SELECT * FROM user_libraries
             WHERE sync_enabled AND sync_status NOT IN ('queued', 'in_progress')
             ORDER BY last_sync_at ASC NULLS FIRST",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    // ── Games: upsert path ──────────────────────────────────────

    /// Candidates for identity resolution of one incoming listing.
    async fn match_candidates(
        &self,
        platform_code: &str,
        incoming: &NormalizedGame,
    ) -> Result<Vec<GameCandidate>> {
        let normalized = identity::normalize_title(&incoming.title);
        let mut rows: Vec<Game> = Vec::new();

        if let (Some(key), Some(value)) = (
            external_id_key(platform_code),
            incoming.external_ids.for_platform(platform_code),
        ) {
            rows.extend(
                sqlx::query_as::<_, Game>(&format!(
                    "SELECT {} FROM games WHERE external_ids->>'{}' = $1",
                    GAME_COLUMNS, key
                ))
                .bind(value)
                .fetch_all(&self.pool)
                .await?,
            );
        }

        rows.extend(
            sqlx::query_as::<_, Game>(&format!(
                "SELECT {} FROM games WHERE normalized_title = $1",
                GAME_COLUMNS
            ))
            .bind(&normalized)
            .fetch_all(&self.pool)
            .await?,
        );

        // Fuzzy pool: share the leading token, capped to keep the scan cheap.
        if let Some(first_token) = normalized.split_whitespace().next() {
            rows.extend(
                sqlx::query_as::<_, Game>(&format!(
                    "SELECT {} FROM games
                     WHERE split_part(normalized_title, ' ', 1) = $1 AND normalized_title <> $2
                     LIMIT 25",
                    GAME_COLUMNS
                ))
                .bind(first_token)
                .bind(&normalized)
                .fetch_all(&self.pool)
                .await?,
            );
        }

        let mut seen = std::collections::HashSet::new();
        let candidates = rows
            .into_iter()
            .filter(|game| seen.insert(game.id))
            .map(|game| GameCandidate {
                game_id: game.id,
                normalized_title: game.normalized_title,
                developer: game.developer,
                publisher: game.publisher,
                external_ids: serde_json::from_value(game.external_ids).unwrap_or_default(),
            })
            .collect();
        Ok(candidates)
    }

    async fn insert_game(
        &self,
        platform_code: &str,
        incoming: &NormalizedGame,
    ) -> Result<Uuid> {
        let normalized = identity::normalize_title(&incoming.title);
        let external_ids = serde_json::to_value(&incoming.external_ids)?;

        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO games (title, normalized_title, description, release_date, developer,
                                publisher, genres, platforms_available, cover_image_url,
                                screenshots, external_ids, metacritic_score, search_vector)
             VALUES ($1, $2, $3, $4, $5, $6, $7, ARRAY[$8], $9, $10, $11, $12,
                     setweight(to_tsvector('english', coalesce($1, '')), 'A') ||
                     setweight(to_tsvector('english', coalesce($5, '') || ' ' || coalesce($6, '')), 'B') ||
                     setweight(to_tsvector('english', coalesce($3, '')), 'C'))
             RETURNING id",
        )
        .bind(&incoming.title)
        .bind(&normalized)
        .bind(&incoming.description)
        .bind(incoming.release_date)
        .bind(&incoming.developer)
        .bind(&incoming.publisher)
        .bind(&incoming.genres)
        .bind(platform_code)
        .bind(&incoming.cover_image_url)
        .bind(&incoming.screenshots)
        .bind(external_ids)
        .bind(incoming.metacritic_score)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Merge the incoming listing into an existing catalog row: absent
    /// metadata is filled, external ids and platform availability are unioned,
    /// and the search vector is rebuilt from the resulting text fields.
    async fn merge_game(
        &self,
        game_id: Uuid,
        platform_code: &str,
        incoming: &NormalizedGame,
    ) -> Result<()> {
        let external_ids = serde_json::to_value(&incoming.external_ids)?;

        sqlx::query(
            "UPDATE games SET
                 description = COALESCE(description, $3),
                 release_date = COALESCE(release_date, $4),
                 developer = COALESCE(developer, $5),
                 publisher = COALESCE(publisher, $6),
                 cover_image_url = COALESCE(cover_image_url, $7),
                 metacritic_score = COALESCE(metacritic_score, $9),
                 genres = CASE WHEN genres = '{}' THEN $10 ELSE genres END,
                 external_ids = $8::jsonb || external_ids,
                 platforms_available = CASE
                     WHEN $2 = ANY(platforms_available) THEN platforms_available
                     ELSE array_append(platforms_available, $2)
                 END,
                 updated_at = now(),
                 search_vector =
                     setweight(to_tsvector('english', coalesce(title, '')), 'A') ||
                     setweight(to_tsvector('english', coalesce(COALESCE(developer, $5), '') || ' ' ||
                                                      coalesce(COALESCE(publisher, $6), '')), 'B') ||
                     setweight(to_tsvector('english', coalesce(COALESCE(description, $3), '')), 'C')
             WHERE id = $1",
        )
        .bind(game_id)
        .bind(platform_code)
        .bind(&incoming.description)
        .bind(incoming.release_date)
        .bind(&incoming.developer)
        .bind(&incoming.publisher)
        .bind(&incoming.cover_image_url)
        .bind(external_ids)
        .bind(incoming.metacritic_score)
        .bind(&incoming.genres)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fill a catalog row from an adapter's lazy detail fetch. Same merge
    /// semantics as the sync path: absent metadata is filled, present
    /// metadata is kept.
    pub async fn apply_game_details(
        &self,
        game_id: Uuid,
        platform_code: &str,
        details: &NormalizedGame,
    ) -> Result<()> {
        self.merge_game(game_id, platform_code, details).await
    }

    /// Games in a library still missing descriptive metadata, for the
    /// enrichment job.
    pub async fn games_missing_metadata(
        &self,
        library_id: Uuid,
        limit: usize,
    ) -> Result<Vec<(Uuid, String)>> {
        Ok(sqlx::query_as::<_, (Uuid, String)>(
            "SELECT g.id, ug.platform_game_id
             FROM user_games ug
             JOIN games g ON g.id = ug.game_id
             WHERE ug.library_id = $1
               AND ug.platform_game_id IS NOT NULL
               AND (g.description IS NULL OR g.developer IS NULL
                    OR g.publisher IS NULL OR g.release_date IS NULL)
             ORDER BY ug.total_playtime_minutes DESC
             LIMIT $2",
        )
        .bind(library_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_match_record(
        &self,
        game_id: Uuid,
        method: MatchMethod,
        confidence: f32,
    ) -> Result<()> {
        let (primary, matched) = orient_edge(game_id, game_id);
        sqlx::query(
            "INSERT INTO game_matches (primary_game_id, matched_game_id, confidence, method, verified)
             VALUES ($1, $2, $3, $4, FALSE)
             ON CONFLICT (primary_game_id, matched_game_id) DO NOTHING",
        )
        .bind(primary)
        .bind(matched)
        .bind(confidence)
        .bind(method.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or update one user-game link; returns (kind, playtime note).
    async fn upsert_user_game(
        &self,
        library_id: Uuid,
        game_id: Uuid,
        incoming: &NormalizedGame,
    ) -> Result<(Option<GameEventKind>, Option<String>)> {
        let existing = sqlx::query_as::<_, UserGame>(
            "SELECT * FROM user_games WHERE library_id = $1 AND game_id = $2",
        )
        .bind(library_id)
        .bind(game_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(existing) = existing else {
            let status = if incoming.playtime_minutes > 0 {
                "playing"
            } else {
                "unplayed"
            };
            sqlx::query(
                "INSERT INTO user_games (library_id, game_id, platform_game_id, owned,
                                         total_playtime_minutes, first_played_at, last_played_at,
                                         game_status, platform_data, last_synced_at)
                 VALUES ($1, $2, $3, TRUE, $4, $5, $5, $6, $7, now())
                 ON CONFLICT (library_id, game_id) DO UPDATE SET
                     total_playtime_minutes = EXCLUDED.total_playtime_minutes,
                     last_played_at = EXCLUDED.last_played_at,
                     platform_data = EXCLUDED.platform_data,
                     last_synced_at = now(),
                     updated_at = now()",
            )
            .bind(library_id)
            .bind(game_id)
            .bind(&incoming.platform_game_id)
            .bind(incoming.playtime_minutes)
            .bind(incoming.last_played_at)
            .bind(status)
            .bind(&incoming.platform_data)
            .execute(&self.pool)
            .await?;
            return Ok((Some(GameEventKind::GameAdded), None));
        };

        let playtime_changed = existing.total_playtime_minutes != incoming.playtime_minutes;
        let last_played_changed = existing.last_played_at != incoming.last_played_at;
        let platform_data_changed = existing.platform_data != incoming.platform_data;

        if !playtime_changed && !last_played_changed && !platform_data_changed {
            sqlx::query("UPDATE user_games SET last_synced_at = now() WHERE id = $1")
                .bind(existing.id)
                .execute(&self.pool)
                .await?;
            return Ok((None, None));
        }

        // A lower remote playtime is recorded as-is but flagged for review in
        // the operation log.
        let note = (incoming.playtime_minutes < existing.total_playtime_minutes).then(|| {
            format!(
                "playtime regression for game {}: {} -> {} minutes",
                game_id, existing.total_playtime_minutes, incoming.playtime_minutes
            )
        });

        sqlx::query(
            "UPDATE user_games SET
                 total_playtime_minutes = $2,
                 last_played_at = COALESCE($3, last_played_at),
                 first_played_at = COALESCE(first_played_at, $3),
                 game_status = CASE
                     WHEN game_status = 'unplayed' AND $2 > 0 THEN 'playing'
                     ELSE game_status
                 END,
                 platform_data = $4,
                 last_synced_at = now(),
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(existing.id)
        .bind(incoming.playtime_minutes)
        .bind(incoming.last_played_at)
        .bind(&incoming.platform_data)
        .execute(&self.pool)
        .await?;

        Ok((Some(GameEventKind::GameUpdated), note))
    }

    // ── Games: read side ────────────────────────────────────────

    pub async fn list_games(&self, page: u32, limit: u32) -> Result<(Vec<Game>, i64)> {
        let offset = (page.saturating_sub(1) as i64) * limit as i64;
        let games = sqlx::query_as::<_, Game>(&format!(
            "SELECT {} FROM games ORDER BY title ASC LIMIT $1 OFFSET $2",
            GAME_COLUMNS
        ))
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT count(*) FROM games")
            .fetch_one(&self.pool)
            .await?;
        Ok((games, total))
    }

    fn push_search_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, query: &'a SearchQuery) {
        if let Some(q) = query.q.as_deref().filter(|q| !q.is_empty()) {
            qb.push(" AND g.search_vector @@ websearch_to_tsquery('english', ");
            qb.push_bind(q);
            qb.push(")");
        }
        if !query.platforms.is_empty() {
            qb.push(" AND g.platforms_available && ");
            qb.push_bind(&query.platforms);
        }
        if !query.genres.is_empty() {
            qb.push(" AND g.genres && ");
            qb.push_bind(&query.genres);
        }
        if let Some(min) = query.min_metacritic {
            qb.push(" AND g.metacritic_score >= ");
            qb.push_bind(min);
        }
        if let Some(max) = query.max_metacritic {
            qb.push(" AND g.metacritic_score <= ");
            qb.push_bind(max);
        }
        if query.owned_only || query.library_id.is_some() || !query.statuses.is_empty() {
            qb.push(" AND EXISTS (SELECT 1 FROM user_games ug WHERE ug.game_id = g.id");
            if let Some(library_id) = query.library_id {
                qb.push(" AND ug.library_id = ");
                qb.push_bind(library_id);
            }
            if query.owned_only {
                qb.push(" AND ug.owned");
            }
            if !query.statuses.is_empty() {
                qb.push(" AND ug.game_status = ANY(");
                qb.push_bind(&query.statuses);
                qb.push(")");
            }
            qb.push(")");
        }
    }

    /// Weighted full-text search: title A, developer/publisher B, description
    /// C; ties broken by release date desc then title asc.
    pub async fn search_games(&self, query: &SearchQuery) -> Result<(Vec<Game>, i64)> {
        let limit = query.limit.clamp(1, 100) as i64;
        let offset = (query.page.max(1) as i64 - 1) * limit;

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM games g WHERE TRUE", GAME_COLUMNS));
        Self::push_search_filters(&mut qb, query);
        qb.push(" ORDER BY ");
        if let Some(q) = query.q.as_deref().filter(|q| !q.is_empty()) {
            qb.push("ts_rank(g.search_vector, websearch_to_tsquery('english', ");
            qb.push_bind(q);
            qb.push(")) DESC, ");
        }
        qb.push("g.release_date DESC NULLS LAST, g.title ASC");
        qb.push(" LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let games = qb.build_query_as::<Game>().fetch_all(&self.pool).await?;

        let mut count_qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT count(*) FROM games g WHERE TRUE");
        Self::push_search_filters(&mut count_qb, query);
        let total: i64 = count_qb
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get(0)?;

        Ok((games, total))
    }

    pub async fn game_details(
        &self,
        game_id: Uuid,
        library_id: Option<Uuid>,
    ) -> Result<GameWithUserData> {
        let game = sqlx::query_as::<_, Game>(&format!(
            "SELECT {} FROM games WHERE id = $1",
            GAME_COLUMNS
        ))
        .bind(game_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("Game"))?;

        let user_game = match library_id {
            Some(library_id) => {
                sqlx::query_as::<_, UserGame>(
                    "SELECT * FROM user_games WHERE library_id = $1 AND game_id = $2",
                )
                .bind(library_id)
                .bind(game_id)
                .fetch_optional(&self.pool)
                .await?
            }
            None => None,
        };

        Ok(GameWithUserData { game, user_game })
    }

    /// Update user-editable attributes on a library's game link. Range checks
    /// happen at the handler boundary; the schema CHECKs are the backstop.
    pub async fn update_user_game(
        &self,
        library_id: Uuid,
        game_id: Uuid,
        req: &UpdateUserGameRequest,
    ) -> Result<UserGame> {
        sqlx::query_as::<_, UserGame>(
            "UPDATE user_games SET
                 game_status = COALESCE($3, game_status),
                 user_rating = COALESCE($4, user_rating),
                 user_notes = COALESCE($5, user_notes),
                 is_favorite = COALESCE($6, is_favorite),
                 updated_at = now()
             WHERE library_id = $1 AND game_id = $2
             RETURNING *",
        )
        .bind(library_id)
        .bind(game_id)
        .bind(&req.game_status)
        .bind(req.user_rating)
        .bind(&req.user_notes)
        .bind(req.is_favorite)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("User game"))
    }

    /// Operator corrections to editorial fields; rebuilds the search vector
    /// from the resulting text fields.
    pub async fn update_game_editorial(
        &self,
        game_id: Uuid,
        req: &UpdateGameRequest,
    ) -> Result<Game> {
        sqlx::query_as::<_, Game>(&format!(
            "UPDATE games SET
                 description = COALESCE($2, description),
                 developer = COALESCE($3, developer),
                 publisher = COALESCE($4, publisher),
                 metacritic_score = COALESCE($5, metacritic_score),
                 steam_score = COALESCE($6, steam_score),
                 updated_at = now(),
                 search_vector =
                     setweight(to_tsvector('english', coalesce(title, '')), 'A') ||
                     setweight(to_tsvector('english', coalesce(COALESCE($3, developer), '') || ' ' ||
                                                      coalesce(COALESCE($4, publisher), '')), 'B') ||
                     setweight(to_tsvector('english', coalesce(COALESCE($2, description), '')), 'C')
             WHERE id = $1
             RETURNING {}",
            GAME_COLUMNS
        ))
        .bind(game_id)
        .bind(&req.description)
        .bind(&req.developer)
        .bind(&req.publisher)
        .bind(req.metacritic_score)
        .bind(req.steam_score)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("Game"))
    }

    // ── Sync operations ─────────────────────────────────────────

    pub async fn latest_operation(&self, library_id: Uuid) -> Result<Option<SyncOperation>> {
        Ok(sqlx::query_as::<_, SyncOperation>(
            "SELECT * FROM sync_operations WHERE library_id = $1
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(library_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// The id of a currently running operation, if any.
    pub async fn running_operation(&self, library_id: Uuid) -> Result<Option<Uuid>> {
        Ok(sqlx::query_scalar(
            "SELECT id FROM sync_operations
             WHERE library_id = $1 AND status IN ('started', 'in_progress')
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(library_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    // ── Achievements ────────────────────────────────────────────

    /// Upsert achievement definitions for a game; returns the stored rows.
    pub async fn upsert_achievements(
        &self,
        game_id: Uuid,
        platform_id: Uuid,
        definitions: &[PlatformAchievement],
    ) -> Result<Vec<Achievement>> {
        let mut stored = Vec::with_capacity(definitions.len());
        for def in definitions {
            let achievement = sqlx::query_as::<_, Achievement>(
                "INSERT INTO achievements (game_id, platform_id, platform_achievement_id, title,
                                           description, icon_url, rarity, hidden)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (game_id, platform_id, platform_achievement_id) DO UPDATE SET
                     title = EXCLUDED.title,
                     description = EXCLUDED.description,
                     icon_url = EXCLUDED.icon_url,
                     rarity = EXCLUDED.rarity,
                     hidden = EXCLUDED.hidden
                 RETURNING *",
            )
            .bind(game_id)
            .bind(platform_id)
            .bind(&def.platform_achievement_id)
            .bind(&def.title)
            .bind(&def.description)
            .bind(&def.icon_url)
            .bind(def.rarity)
            .bind(def.hidden)
            .fetch_one(&self.pool)
            .await?;
            stored.push(achievement);
        }
        Ok(stored)
    }

    /// Record an unlock; returns true when it was newly unlocked.
    pub async fn upsert_user_achievement(
        &self,
        user_game_id: Uuid,
        achievement_id: Uuid,
        unlocked_at: chrono::DateTime<Utc>,
    ) -> Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO user_achievements (user_game_id, achievement_id, unlocked_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (user_game_id, achievement_id) DO NOTHING",
        )
        .bind(user_game_id)
        .bind(achievement_id)
        .bind(unlocked_at)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    /// Played user games in a library, for achievement enrichment.
    pub async fn played_user_games(&self, library_id: Uuid) -> Result<Vec<UserGame>> {
        Ok(sqlx::query_as::<_, UserGame>(
            "SELECT * FROM user_games
             WHERE library_id = $1 AND total_playtime_minutes > 0
             ORDER BY total_playtime_minutes DESC",
        )
        .bind(library_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[async_trait]
impl SyncCatalog for CatalogStore {
    async fn library_sync_target(&self, library_id: Uuid) -> Result<SyncTarget> {
        let library = self.get_library(library_id).await?;
        let platform = self.platform_by_id(library.platform_id).await?;
        Ok(SyncTarget {
            library_id,
            platform_id: platform.id,
            platform_code: platform.code,
            user_identifier: library.user_identifier,
            sync_enabled: library.sync_enabled,
        })
    }

    async fn upsert_games_batch(
        &self,
        library_id: Uuid,
        platform_code: &str,
        games: &[NormalizedGame],
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        for incoming in games {
            let candidates = self.match_candidates(platform_code, incoming).await?;
            let game_id = match identity::resolve(platform_code, incoming, &candidates) {
                Resolution::New => self.insert_game(platform_code, incoming).await?,
                Resolution::Existing {
                    game_id,
                    match_record,
                } => {
                    self.merge_game(game_id, platform_code, incoming).await?;
                    if let Some(record) = match_record {
                        self.insert_match_record(game_id, record.method, record.confidence)
                            .await?;
                    }
                    game_id
                }
            };

            let (event_kind, note) = self
                .upsert_user_game(library_id, game_id, incoming)
                .await?;
            match event_kind {
                Some(GameEventKind::GameAdded) => {
                    outcome.added += 1;
                    outcome.events.push(LibraryGameEvent {
                        kind: GameEventKind::GameAdded,
                        game_id,
                        title: incoming.title.clone(),
                    });
                }
                Some(GameEventKind::GameUpdated) => {
                    outcome.updated += 1;
                    outcome.events.push(LibraryGameEvent {
                        kind: GameEventKind::GameUpdated,
                        game_id,
                        title: incoming.title.clone(),
                    });
                }
                None => outcome.unchanged += 1,
            }
            if let Some(note) = note {
                outcome.notes.push(note);
            }
        }

        Ok(outcome)
    }

    async fn record_sync_operation(&self, library_id: Uuid, sync_type: SyncType) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO sync_operations (library_id, sync_type, status)
             VALUES ($1, $2, 'started')
             RETURNING id",
        )
        .bind(library_id)
        .bind(sync_type.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn update_sync_operation(&self, update: OperationUpdate) -> Result<()> {
        let completed = matches!(
            update.status,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        );
        let log_notes = serde_json::to_value(&update.log_notes)?;

        sqlx::query(
            "UPDATE sync_operations SET
                 status = $2,
                 games_processed = GREATEST(games_processed, $3),
                 games_added = GREATEST(games_added, $4),
                 games_updated = GREATEST(games_updated, $5),
                 errors_count = GREATEST(errors_count, $6),
                 error_details = COALESCE($7, error_details),
                 log = log || $8::jsonb,
                 completed_at = CASE WHEN $9 THEN now() ELSE completed_at END
             WHERE id = $1",
        )
        .bind(update.operation_id)
        .bind(update.status.as_str())
        .bind(update.games_processed as i32)
        .bind(update.games_added as i32)
        .bind(update.games_updated as i32)
        .bind(update.errors_count as i32)
        .bind(&update.error_details)
        .bind(log_notes)
        .bind(completed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_library_status(
        &self,
        library_id: Uuid,
        status: SyncStatus,
        error: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE user_libraries SET
                 sync_status = $2,
                 sync_error = $3,
                 last_sync_at = CASE WHEN $2 = 'completed' THEN now() ELSE last_sync_at END,
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(library_id)
        .bind(status.as_str())
        .bind(&error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
