mod actor;
mod group;
mod import;
mod intent;
mod leaderboard;
mod outcome;
mod proposal;
mod rating;
mod session;
mod vote;

pub use actor::Actor;
pub use group::{ChatScope, Group, UserId};
pub use import::{ImportedRating, WatchedImport};
pub use intent::Intent;
pub use leaderboard::{
    ClubStats, LeaderboardEntry, LeaderboardPage, LeaderboardQuery, LeaderboardRow,
    DEFAULT_PAGE_SIZE,
};
pub use outcome::{AdvancePayload, Outcome, Recorded, SessionAdvanced, VoteTally, WinnerResult};
pub use proposal::{check_slot, CatalogRef, NewProposal, Proposal, DEFAULT_SLOT, PROPOSAL_SLOTS};
pub use rating::{Aggregate, Rating, Score, MAX_SCORE, MIN_SCORE};
pub use session::{Session, SessionStatus, Trigger};
pub use vote::Vote;
