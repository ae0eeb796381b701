pub mod achievements;
pub mod adapters;
pub mod catalog;
pub mod job_queue;
pub mod metadata;
pub mod progress;
pub mod rate_limiter;
pub mod runner;
pub mod scheduler;
pub mod sync_state;
pub mod sync_worker;

pub use achievements::AchievementSyncService;
pub use metadata::MetadataSyncService;
pub use adapters::{AdapterError, PlatformAdapter, SteamAdapter};
pub use catalog::{CatalogStore, SyncCatalog};
pub use job_queue::{JobFunction, QueueName, RedisJobQueue};
pub use progress::{ProgressSink, ProgressTracker};
pub use rate_limiter::{RateGate, RateLimitPolicy, RedisRateLimiter};
pub use runner::WorkerPool;
pub use sync_state::{RedisSyncState, SyncStateStore};
pub use sync_worker::SyncWorker;
