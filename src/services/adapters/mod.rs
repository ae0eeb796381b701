//! Uniform fetch contract over external platform APIs.

pub mod steam;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{NormalizedGame, PlatformAchievement};

pub use steam::SteamAdapter;

/// Classified adapter failure; the sync worker's state machine keys off the
/// variant, never the underlying cause.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("upstream rate limited")]
    RateLimited { retry_after: Option<u64> },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("unknown user or resource: {0}")]
    NotFound(String),

    #[error("permanent upstream failure: {0}")]
    Permanent(String),
}

impl AdapterError {
    /// Map an HTTP status to the adapter taxonomy. `retry_after` comes from
    /// the response header when present.
    pub fn from_status(status: u16, retry_after: Option<u64>, context: &str) -> Self {
        match status {
            429 => AdapterError::RateLimited { retry_after },
            401 | 403 => AdapterError::Auth(context.to_string()),
            404 => AdapterError::NotFound(context.to_string()),
            500..=599 => AdapterError::Transient(format!("{}: http {}", context, status)),
            _ => AdapterError::Permanent(format!("{}: http {}", context, status)),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            AdapterError::Transient(err.to_string())
        } else if let Some(status) = err.status() {
            AdapterError::from_status(status.as_u16(), None, "request")
        } else {
            AdapterError::Transient(err.to_string())
        }
    }
}

/// Per-platform driver. Page fetches must be restartable at any offset so the
/// worker can resume from a checkpoint.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Lowercase platform code matching the `platforms` catalog.
    fn platform_code(&self) -> &str;

    /// Total games in the user's remote library.
    async fn count_games(&self, user_identifier: &str) -> Result<u32, AdapterError>;

    /// One page of the user's library, already mapped to the universal shape.
    async fn fetch_batch(
        &self,
        user_identifier: &str,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<NormalizedGame>, AdapterError>;

    /// Lazy detail fetch for one platform game; enrichment path.
    async fn game_details(
        &self,
        platform_game_id: &str,
    ) -> Result<Option<NormalizedGame>, AdapterError>;

    /// Achievement schema plus the user's unlocks for one game. Platforms
    /// without achievement APIs return an empty list.
    async fn fetch_achievements(
        &self,
        _user_identifier: &str,
        _platform_game_id: &str,
    ) -> Result<Vec<PlatformAchievement>, AdapterError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            AdapterError::from_status(429, Some(120), "x"),
            AdapterError::RateLimited {
                retry_after: Some(120)
            }
        ));
        assert!(matches!(
            AdapterError::from_status(401, None, "x"),
            AdapterError::Auth(_)
        ));
        assert!(matches!(
            AdapterError::from_status(404, None, "x"),
            AdapterError::NotFound(_)
        ));
        assert!(matches!(
            AdapterError::from_status(503, None, "x"),
            AdapterError::Transient(_)
        ));
        assert!(matches!(
            AdapterError::from_status(400, None, "x"),
            AdapterError::Permanent(_)
        ));
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(AdapterError::Transient("t".into()).is_retryable());
        assert!(!AdapterError::RateLimited { retry_after: None }.is_retryable());
        assert!(!AdapterError::Auth("a".into()).is_retryable());
    }
}
