use std::time::Duration;

use deadpool_redis::{Config as RedisPoolConfig, Pool as RedisPool, Runtime};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::{DatabaseSettings, RedisSettings};

pub async fn create_pg_pool(settings: &DatabaseSettings) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&settings.url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub fn create_redis_pool(url: &str) -> anyhow::Result<RedisPool> {
    let config = RedisPoolConfig::from_url(url);
    Ok(config.create_pool(Some(Runtime::Tokio1))?)
}

/// Queue and bus pools; they coincide when the URLs do.
pub struct RedisPools {
    pub queue: RedisPool,
    pub bus: RedisPool,
}

impl RedisPools {
    pub fn from_settings(settings: &RedisSettings) -> anyhow::Result<Self> {
        let queue = create_redis_pool(&settings.queue_url)?;
        let bus = if settings.bus_url == settings.queue_url {
            queue.clone()
        } else {
            create_redis_pool(&settings.bus_url)?
        };
        Ok(Self { queue, bus })
    }
}
