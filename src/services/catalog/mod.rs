//! Durable catalog: cross-platform game identity, user libraries, ownership,
//! playtime, achievements, and the sync audit log.

pub mod identity;
pub mod store;

pub use identity::{normalize_title, resolve, GameCandidate, PendingMatch, Resolution};
pub use store::{
    BatchOutcome, CatalogStore, GameEventKind, GameWithUserData, LibraryGameEvent,
    OperationUpdate, SearchQuery, SyncCatalog, SyncTarget,
};
