//! Metadata enrichment: a low-priority job behind each completed sync pulls
//! lazy per-game details (description, attribution, release date, score)
//! through the adapter and folds them into the catalog rows.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;
use crate::services::adapters::{AdapterError, PlatformAdapter};
use crate::services::catalog::{CatalogStore, SyncCatalog};
use crate::services::rate_limiter::RateGate;

/// Detail fetches per run; each is one rate-limited upstream call, and the
/// job re-queues with every sync, so large libraries converge over time.
const GAMES_PER_RUN: usize = 25;

pub struct MetadataSyncService {
    store: CatalogStore,
    adapters: HashMap<String, Arc<dyn PlatformAdapter>>,
    rate_gate: Arc<dyn RateGate>,
}

impl MetadataSyncService {
    pub fn new(store: CatalogStore, rate_gate: Arc<dyn RateGate>) -> Self {
        Self {
            store,
            adapters: HashMap::new(),
            rate_gate,
        }
    }

    pub fn register_adapter(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters
            .insert(adapter.platform_code().to_string(), adapter);
    }

    pub async fn run(&self, library_id: Uuid) -> Result<serde_json::Value> {
        let target = self.store.library_sync_target(library_id).await?;
        let Some(adapter) = self.adapters.get(&target.platform_code) else {
            return Ok(serde_json::json!({"skipped": "no adapter"}));
        };

        let pending = self
            .store
            .games_missing_metadata(library_id, GAMES_PER_RUN)
            .await?;
        let checked = pending.len() as u32;
        let mut enriched = 0u32;

        for (game_id, platform_game_id) in pending {
            if let Err(err) = self.rate_gate.acquire(&target.platform_code, 1).await {
                tracing::warn!(library_id = %library_id, error = %err, "metadata sync stopped by rate gate");
                break;
            }

            match adapter.game_details(&platform_game_id).await {
                Ok(Some(details)) => {
                    self.store
                        .apply_game_details(game_id, &target.platform_code, &details)
                        .await?;
                    enriched += 1;
                }
                // Delisted or region-locked titles have no store page.
                Ok(None) | Err(AdapterError::NotFound(_)) => continue,
                Err(AdapterError::Auth(err)) => {
                    tracing::warn!(library_id = %library_id, error = %err, "metadata sync auth failure");
                    break;
                }
                Err(err) => {
                    tracing::debug!(
                        library_id = %library_id,
                        platform_game_id,
                        error = %err,
                        "detail fetch failed, continuing"
                    );
                    continue;
                }
            }
        }

        tracing::info!(
            library_id = %library_id,
            checked,
            enriched,
            "metadata enrichment finished"
        );
        Ok(serde_json::json!({
            "checked": checked,
            "enriched": enriched,
        }))
    }
}
