//! Periodic scheduler that enqueues incremental syncs for enabled libraries.

use std::time::Duration;

use tokio::sync::watch;

use crate::services::catalog::CatalogStore;
use crate::services::job_queue::{JobFunction, QueueName, RedisJobQueue};

pub async fn run_schedule_loop(
    store: CatalogStore,
    queue: RedisJobQueue,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    if interval.is_zero() {
        tracing::info!("scheduled syncs disabled");
        return;
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so startup isn't a sync storm.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if let Err(err) = enqueue_due_libraries(&store, &queue).await {
                    tracing::error!(error = %err, "scheduled sync sweep failed");
                }
            }
        }
    }
    tracing::info!("scheduler stopped");
}

async fn enqueue_due_libraries(
    store: &CatalogStore,
    queue: &RedisJobQueue,
) -> crate::error::Result<()> {
    let libraries = store.libraries_for_scheduled_sync().await?;
    for library in libraries {
        queue
            .enqueue(
                QueueName::Default,
                JobFunction::LibrarySync {
                    library_id: library.id,
                    force: false,
                    sync_type: "incremental".to_string(),
                },
                None,
            )
            .await?;
        tracing::debug!(library_id = %library.id, "scheduled incremental sync enqueued");
    }
    Ok(())
}
