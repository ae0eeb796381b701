//! Achievement enrichment: after a library sync completes, a low-priority job
//! pulls achievement schemas and player unlocks for played games.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::Result;
use crate::realtime::RealtimeBus;
use crate::services::adapters::{AdapterError, PlatformAdapter};
use crate::services::catalog::{CatalogStore, SyncCatalog};
use crate::services::rate_limiter::RateGate;

/// Played games scanned per enrichment run; the job re-runs on the low queue
/// so large libraries converge over successive syncs.
const GAMES_PER_RUN: usize = 50;

pub struct AchievementSyncService {
    store: CatalogStore,
    adapters: HashMap<String, Arc<dyn PlatformAdapter>>,
    rate_gate: Arc<dyn RateGate>,
    bus: RealtimeBus,
}

impl AchievementSyncService {
    pub fn new(store: CatalogStore, rate_gate: Arc<dyn RateGate>, bus: RealtimeBus) -> Self {
        Self {
            store,
            adapters: HashMap::new(),
            rate_gate,
            bus,
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

        let user_games = self.store.played_user_games(library_id).await?;
        let mut games_scanned = 0u32;
        let mut achievements_seen = 0u32;
        let mut newly_unlocked = 0u32;

        for user_game in user_games.iter().take(GAMES_PER_RUN) {
            let Some(platform_game_id) = user_game.platform_game_id.as_deref() else {
                continue;
            };

            if let Err(err) = self.rate_gate.acquire(&target.platform_code, 1).await {
                tracing::warn!(library_id = %library_id, error = %err, "achievement sync stopped by rate gate");
                break;
            }

            let fetched = adapter
                .fetch_achievements(&target.user_identifier, platform_game_id)
                .await;
            let definitions = match fetched {
                Ok(definitions) => definitions,
                // Missing stats pages are common; skip quietly.
                Err(AdapterError::NotFound(_)) => continue,
                Err(AdapterError::Auth(err)) => {
                    tracing::warn!(library_id = %library_id, error = %err, "achievement sync auth failure");
                    break;
                }
                Err(err) => {
                    tracing::debug!(
                        library_id = %library_id,
                        platform_game_id,
                        error = %err,
                        "achievement fetch failed, continuing"
                    );
                    continue;
                }
            };
            games_scanned += 1;
            if definitions.is_empty() {
                continue;
            }

            let stored = self
                .store
                .upsert_achievements(user_game.game_id, target.platform_id, &definitions)
                .await?;
            achievements_seen += stored.len() as u32;

            let by_platform_id: HashMap<&str, Uuid> = stored
                .iter()
                .map(|a| (a.platform_achievement_id.as_str(), a.id))
                .collect();

            for definition in &definitions {
                let Some(unlocked_at) = definition.unlocked_at else {
                    continue;
                };
                let Some(&achievement_id) =
                    by_platform_id.get(definition.platform_achievement_id.as_str())
                else {
                    continue;
                };
                let is_new = self
                    .store
                    .upsert_user_achievement(user_game.id, achievement_id, unlocked_at)
                    .await?;
                if is_new {
                    newly_unlocked += 1;
                    self.bus.publish(
                        "achievement_unlocked",
                        Some(library_id),
                        serde_json::json!({
                            "library_id": library_id,
                            "game_id": user_game.game_id,
                            "achievement_id": achievement_id,
                            "title": definition.title,
                            "unlocked_at": unlocked_at,
                        }),
                    );
                }
            }
        }

        tracing::info!(
            library_id = %library_id,
            games_scanned,
            achievements_seen,
            newly_unlocked,
            "achievement enrichment finished"
        );
        Ok(serde_json::json!({
            "games_scanned": games_scanned,
            "achievements_seen": achievements_seen,
            "newly_unlocked": newly_unlocked,
        }))
    }
}
