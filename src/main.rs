use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use game_library_backend::config::AppConfig;
use game_library_backend::database::{create_pg_pool, run_migrations, RedisPools};
use game_library_backend::middleware::AuthService;
use game_library_backend::realtime::RealtimeBus;
use game_library_backend::services::{
    scheduler, AchievementSyncService, CatalogStore, MetadataSyncService, ProgressTracker,
    RedisJobQueue, RedisRateLimiter, RedisSyncState, SteamAdapter, SyncWorker, WorkerPool,
};
use game_library_backend::services::sync_state::SyncStateStore;
use game_library_backend::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.server.log_level.clone())),
        )
        .init();

    tracing::info!("starting game library backend");

    let db_pool = create_pg_pool(&config.database).await?;
    run_migrations(&db_pool).await?;
    let redis = RedisPools::from_settings(&config.redis)?;

    let store = CatalogStore::new(db_pool.clone());
    let bus = RealtimeBus::new(256);
    let rate_limiter = Arc::new(RedisRateLimiter::new(redis.queue.clone()));
    let sync_state: Arc<dyn SyncStateStore> = Arc::new(RedisSyncState::new(
        redis.queue.clone(),
        Arc::new(store.clone()),
    ));
    let progress = Arc::new(ProgressTracker::new(bus.clone(), redis.bus.clone()));
    let queue = RedisJobQueue::new(redis.queue.clone());

    let steam: Arc<SteamAdapter> = Arc::new(SteamAdapter::new(&config.steam));
    if config.steam.api_key.is_none() {
        tracing::warn!("STEAM_API_KEY not set; steam syncs will fail until it is configured");
    }

    let mut worker = SyncWorker::new(
        format!("worker-{}", Uuid::new_v4()),
        rate_limiter.clone(),
        sync_state.clone(),
        Arc::new(store.clone()),
        progress.clone(),
        Arc::new(queue.clone()),
        bus.clone(),
        config.sync.clone(),
    );
    worker.register_adapter(steam.clone());

    let mut achievements =
        AchievementSyncService::new(store.clone(), rate_limiter.clone(), bus.clone());
    achievements.register_adapter(steam.clone());

    let mut metadata = MetadataSyncService::new(store.clone(), rate_limiter.clone());
    metadata.register_adapter(steam);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pool = Arc::new(WorkerPool {
        queue: queue.clone(),
        worker: Arc::new(worker),
        achievements: Arc::new(achievements),
        metadata: Arc::new(metadata),
        state: sync_state.clone(),
    });
    pool.spawn(config.sync.workers, shutdown_rx.clone());

    tokio::spawn(scheduler::run_schedule_loop(
        store.clone(),
        queue.clone(),
        config.sync.schedule_interval,
        shutdown_rx.clone(),
    ));

    let auth = Arc::new(AuthService::new(config.auth.clone()));
    if auth.enabled() {
        tracing::info!("admin authentication enabled");
    } else {
        tracing::info!("authentication bypassed (reverse-proxy deployment)");
    }

    let state = AppState {
        db_pool,
        redis_pool: redis.bus.clone(),
        store,
        queue,
        sync_state,
        progress,
        bus,
        auth,
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, workers = config.sync.workers, "listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, draining workers");
            let _ = shutdown_tx.send(true);
            // Drain window: in-flight jobs checkpoint and exit.
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        })
        .await?;

    tracing::info!("shutdown complete");
    Ok(())
}
