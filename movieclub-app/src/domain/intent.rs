use super::{Actor, CatalogRef, ChatScope, ImportedRating, Score, UserId, WatchedImport};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A classified request for the session state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    CreateSession {
        scope: ChatScope,
        actor: Actor,
    },
    Propose {
        session_id: Uuid,
        proposer: UserId,
        catalog_ref: CatalogRef,
        catalog_url: Option<String>,
        title: String,
        slot: Option<u8>,
    },
    StartVoting {
        session_id: Uuid,
        actor: Actor,
    },
    CastVote {
        session_id: Uuid,
        user: UserId,
        proposal_id: Uuid,
    },
    RetractVote {
        session_id: Uuid,
        user: UserId,
    },
    CloseVoting {
        session_id: Uuid,
        actor: Actor,
        forced: bool,
    },
    CastRating {
        proposal_id: Uuid,
        user: UserId,
        score: Score,
    },
    CloseRating {
        session_id: Uuid,
        actor: Actor,
        forced: bool,
    },
    CancelSession {
        session_id: Uuid,
        actor: Actor,
    },
    ImportWatched {
        import: WatchedImport,
        actor: Actor,
    },
    /// Add ratings to the winner of a finished session, as collected outside the chat.
    ImportRatings {
        proposal_id: Uuid,
        ratings: Vec<ImportedRating>,
        actor: Actor,
    },
}
