use super::{CatalogRef, ChatScope, Score, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedRating {
    pub user: UserId,
    pub score: Score,
}

/// A movie the club watched before it kept records here, entered by an admin
/// as an already completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchedImport {
    pub scope: ChatScope,
    pub catalog_ref: CatalogRef,
    pub catalog_url: Option<String>,
    pub title: String,
    /// Falls back to the importing admin when unknown.
    pub proposed_by: Option<UserId>,
    pub watched_at: DateTime<Utc>,
    #[serde(default)]
    pub ratings: Vec<ImportedRating>,
}
