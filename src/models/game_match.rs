use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Weighted undirected edge between two catalog games believed to be the same
/// title. Stored with `primary_game_id <= matched_game_id`; a self-edge
/// records a title-based absorption awaiting review.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GameMatch {
    pub primary_game_id: Uuid,
    pub matched_game_id: Uuid,
    pub confidence: f32,
    pub method: String,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    TitleExact,
    TitleFuzzy,
    ExternalId,
    Manual,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::TitleExact => "title_exact",
            MatchMethod::TitleFuzzy => "title_fuzzy",
            MatchMethod::ExternalId => "external_id",
            MatchMethod::Manual => "manual",
        }
    }
}

/// Orders an edge so the smaller id is primary.
pub fn orient_edge(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_are_oriented_small_to_large() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (p, m) = orient_edge(a, b);
        assert!(p < m);
        let (p2, m2) = orient_edge(b, a);
        assert_eq!((p, m), (p2, m2));
    }
}
