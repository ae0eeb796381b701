//! Unified game library backend.
//!
//! Pulls each user's games from external platform APIs through a durable,
//! resumable, rate-limited sync engine, normalizes them into a cross-platform
//! catalog, and streams live progress to subscribers.

use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    routing::{delete, get, patch, post},
    Router,
};
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod realtime;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, Result};
pub use middleware::AuthService;
pub use realtime::RealtimeBus;
pub use services::catalog::CatalogStore;
pub use services::job_queue::RedisJobQueue;
pub use services::progress::ProgressTracker;
pub use services::sync_state::SyncStateStore;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub redis_pool: deadpool_redis::Pool,
    pub store: CatalogStore,
    pub queue: RedisJobQueue,
    pub sync_state: Arc<dyn SyncStateStore>,
    pub progress: Arc<ProgressTracker>,
    pub bus: RealtimeBus,
    pub auth: Arc<AuthService>,
}

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/platforms", get(handlers::platforms::list_platforms))
        .route("/libraries", get(handlers::libraries::list_libraries))
        .route("/libraries", post(handlers::libraries::create_library))
        .route("/libraries/:id", get(handlers::libraries::get_library))
        .route("/libraries/:id", patch(handlers::libraries::update_library))
        .route("/libraries/:id", delete(handlers::libraries::delete_library))
        .route("/libraries/:id/sync", post(handlers::libraries::trigger_sync))
        .route(
            "/libraries/:id/sync/status",
            get(handlers::libraries::sync_status),
        )
        .route(
            "/libraries/:id/sync/cancel",
            post(handlers::libraries::cancel_sync),
        )
        .route("/games", get(handlers::games::list_games))
        .route("/games/search", get(handlers::games::search_games))
        .route("/games/:id", get(handlers::games::game_details))
        .route("/games/:id", patch(handlers::games::update_game))
        .route(
            "/libraries/:id/games/:game_id",
            patch(handlers::games::update_user_game),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.auth.clone(),
            crate::middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/login", post(handlers::auth::login))
        // WebSocket authentication happens in-protocol.
        .route("/ws", get(handlers::realtime::ws_upgrade))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let db_ok = sqlx::query("SELECT 1")
        .execute(&state.db_pool)
        .await
        .is_ok();

    let redis_ok = match state.redis_pool.get().await {
        Ok(mut conn) => redis::cmd("PING")
            .query_async::<_, String>(&mut *conn)
            .await
            .is_ok(),
        Err(_) => false,
    };

    Ok(Json(serde_json::json!({
        "status": if db_ok && redis_ok { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "services": {
            "database": if db_ok { "up" } else { "down" },
            "redis": if redis_ok { "up" } else { "down" },
            "realtime_subscribers": state.bus.receiver_count(),
        }
    })))
}
