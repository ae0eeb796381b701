use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An external gaming platform. Immutable catalog seeded by migration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Platform {
    pub id: Uuid,
    /// Unique lowercase code, e.g. `steam`.
    pub code: String,
    pub name: String,
    pub api_available: bool,
    pub icon_url: Option<String>,
    pub base_url: Option<String>,
}
