//! Persistence port for the club core.
//!
//! Reads that only inform a decision go through `ClubStore`. Anything that
//! reads and then writes happens inside a `ClubTx`, which is the single
//! serialization point between concurrent events. Dropping a `ClubTx`
//! without calling `commit` discards every write made through it.

use crate::domain::{
    Aggregate, ChatScope, ClubStats, Group, LeaderboardEntry, Proposal, Rating, Session,
    SessionStatus, UserId, Vote,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use movieclub_errors::ClubResult;
use uuid::Uuid;

#[async_trait]
pub trait ClubStore: Send + Sync {
    async fn begin(&self) -> ClubResult<Box<dyn ClubTx>>;

    async fn find_group(&self, scope: &ChatScope) -> ClubResult<Option<Group>>;

    async fn find_session(&self, id: Uuid) -> ClubResult<Option<Session>>;

    async fn active_session(&self, group_id: Uuid) -> ClubResult<Option<Session>>;

    /// Proposals of a session ordered by ordinal.
    async fn list_proposals(&self, session_id: Uuid) -> ClubResult<Vec<Proposal>>;

    async fn find_proposal(&self, id: Uuid) -> ClubResult<Option<Proposal>>;

    /// Winners of completed, non-aborted sessions, optionally for one group.
    async fn leaderboard_entries(
        &self,
        group_id: Option<Uuid>,
    ) -> ClubResult<Vec<LeaderboardEntry>>;

    async fn stats(&self, group_id: Uuid) -> ClubResult<ClubStats>;

    /// Sessions still in Rating whose deadline is at or before `now`.
    async fn overdue_sessions(&self, now: DateTime<Utc>) -> ClubResult<Vec<Session>>;
}

#[async_trait]
pub trait ClubTx: Send {
    /// Find the group for `scope`, creating it if this is its first session.
    async fn upsert_group(&mut self, scope: &ChatScope, now: DateTime<Utc>) -> ClubResult<Group>;

    /// The group's non-completed session, locked for the rest of the transaction.
    async fn lock_active_session(&mut self, group_id: Uuid) -> ClubResult<Option<Session>>;

    async fn insert_session(&mut self, session: &Session) -> ClubResult<()>;

    /// Load and lock one session; `NotFound` when it does not exist.
    async fn lock_session(&mut self, id: Uuid) -> ClubResult<Session>;

    /// Overwrite the session row only if its stored status is still
    /// `expected`. Returns `false` when another writer got there first.
    async fn save_session_if(
        &mut self,
        expected: SessionStatus,
        session: &Session,
    ) -> ClubResult<bool>;

    async fn proposals(&mut self, session_id: Uuid) -> ClubResult<Vec<Proposal>>;

    async fn find_proposal(&mut self, id: Uuid) -> ClubResult<Option<Proposal>>;

    /// Fails with `DuplicateProposal` if the session already has the catalog ref.
    async fn insert_proposal(&mut self, proposal: &Proposal) -> ClubResult<()>;

    async fn delete_proposal(&mut self, id: Uuid) -> ClubResult<()>;

    /// Insert or overwrite the vote keyed by (session, user).
    async fn upsert_vote(&mut self, vote: &Vote) -> ClubResult<()>;

    async fn delete_vote(&mut self, session_id: Uuid, user_id: UserId) -> ClubResult<bool>;

    async fn votes(&mut self, session_id: Uuid) -> ClubResult<Vec<Vote>>;

    /// Insert or overwrite the rating keyed by (proposal, user).
    async fn upsert_rating(&mut self, rating: &Rating) -> ClubResult<()>;

    async fn ratings(&mut self, proposal_id: Uuid) -> ClubResult<Vec<Rating>>;

    async fn store_aggregate(
        &mut self,
        proposal_id: Uuid,
        aggregate: &Aggregate,
    ) -> ClubResult<()>;

    async fn commit(self: Box<Self>) -> ClubResult<()>;
}
