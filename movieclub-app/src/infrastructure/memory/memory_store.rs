use crate::application::{ClubStore, ClubTx};
use crate::domain::{
    Aggregate, ChatScope, ClubStats, Group, LeaderboardEntry, Proposal, Rating, Session,
    SessionStatus, UserId, Vote,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use movieclub_errors::{ClubError, ClubResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    groups: HashMap<Uuid, Group>,
    sessions: HashMap<Uuid, Session>,
    proposals: HashMap<Uuid, Proposal>,
    votes: HashMap<(Uuid, UserId), Vote>,
    ratings: HashMap<(Uuid, UserId), Rating>,
}

impl MemoryState {
    fn active_session(&self, group_id: Uuid) -> Option<&Session> {
        self.sessions
            .values()
            .find(|s| s.group_id == group_id && s.is_active())
    }

    fn proposals_of(&self, session_id: Uuid) -> Vec<Proposal> {
        let mut proposals: Vec<Proposal> = self
            .proposals
            .values()
            .filter(|p| p.session_id == session_id)
            .cloned()
            .collect();
        proposals.sort_by_key(|p| p.ordinal);
        proposals
    }
}

/// Club store held in process memory.
///
/// Transactions are serialized on one async mutex. Each transaction works on
/// a staged copy of the state that replaces the shared state on commit, so
/// `begin` costs a clone of everything stored. That suits tests and small
/// single-process clubs; anything long-lived should set `DATABASE_URL`.
#[derive(Clone, Default)]
pub struct MemoryClubStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryClubStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClubStore for MemoryClubStore {
    async fn begin(&self) -> ClubResult<Box<dyn ClubTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }

    async fn find_group(&self, scope: &ChatScope) -> ClubResult<Option<Group>> {
        let state = self.state.lock().await;
        Ok(state.groups.values().find(|g| g.scope == *scope).cloned())
    }

    async fn find_session(&self, id: Uuid) -> ClubResult<Option<Session>> {
        Ok(self.state.lock().await.sessions.get(&id).cloned())
    }

    async fn active_session(&self, group_id: Uuid) -> ClubResult<Option<Session>> {
        Ok(self.state.lock().await.active_session(group_id).cloned())
    }

    async fn list_proposals(&self, session_id: Uuid) -> ClubResult<Vec<Proposal>> {
        Ok(self.state.lock().await.proposals_of(session_id))
    }

    async fn find_proposal(&self, id: Uuid) -> ClubResult<Option<Proposal>> {
        Ok(self.state.lock().await.proposals.get(&id).cloned())
    }

    async fn leaderboard_entries(
        &self,
        group_id: Option<Uuid>,
    ) -> ClubResult<Vec<LeaderboardEntry>> {
        let state = self.state.lock().await;
        let entries = state
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Completed && !s.aborted)
            .filter(|s| group_id.map_or(true, |g| s.group_id == g))
            .filter_map(|s| {
                let winner = state.proposals.get(&s.winner_proposal_id?)?;
                Some(LeaderboardEntry {
                    proposal_id: winner.id,
                    session_id: s.id,
                    group_id: s.group_id,
                    title: winner.title.clone(),
                    catalog_ref: winner.catalog_ref.to_string(),
                    proposed_by: winner.proposed_by,
                    aggregate: winner.aggregate,
                })
            })
            .collect();
        Ok(entries)
    }

    async fn stats(&self, group_id: Uuid) -> ClubResult<ClubStats> {
        let state = self.state.lock().await;
        let finished: Vec<&Session> = state
            .sessions
            .values()
            .filter(|s| s.group_id == group_id)
            .filter(|s| s.status == SessionStatus::Completed && !s.aborted)
            .collect();
        let group_sessions: HashSet<Uuid> = state
            .sessions
            .values()
            .filter(|s| s.group_id == group_id)
            .map(|s| s.id)
            .collect();

        let participants: HashSet<UserId> = state
            .proposals
            .values()
            .filter(|p| group_sessions.contains(&p.session_id))
            .map(|p| p.proposed_by)
            .collect();
        let ratings = state
            .ratings
            .values()
            .filter(|r| group_sessions.contains(&r.session_id))
            .count();

        Ok(ClubStats {
            completed_sessions: finished.len() as u64,
            movies_watched: finished.iter().filter(|s| s.winner_proposal_id.is_some()).count()
                as u64,
            participants: participants.len() as u64,
            ratings: ratings as u64,
        })
    }

    async fn overdue_sessions(&self, now: DateTime<Utc>) -> ClubResult<Vec<Session>> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Rating && s.deadline_elapsed(now))
            .cloned()
            .collect())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl ClubTx for MemoryTx {
    async fn upsert_group(&mut self, scope: &ChatScope, now: DateTime<Utc>) -> ClubResult<Group> {
        if let Some(group) = self.staged.groups.values().find(|g| g.scope == *scope) {
            return Ok(group.clone());
        }
        let group = Group::new(*scope, now);
        self.staged.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn lock_active_session(&mut self, group_id: Uuid) -> ClubResult<Option<Session>> {
        Ok(self.staged.active_session(group_id).cloned())
    }

    async fn insert_session(&mut self, session: &Session) -> ClubResult<()> {
        if session.is_active() && self.staged.active_session(session.group_id).is_some() {
            return Err(ClubError::GuardUnmet(
                "group already has an active session".to_string(),
            ));
        }
        self.staged.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn lock_session(&mut self, id: Uuid) -> ClubResult<Session> {
        self.staged
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| ClubError::NotFound(format!("session {id}")))
    }

    async fn save_session_if(
        &mut self,
        expected: SessionStatus,
        session: &Session,
    ) -> ClubResult<bool> {
        match self.staged.sessions.get_mut(&session.id) {
            Some(stored) if stored.status == expected => {
                *stored = session.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn proposals(&mut self, session_id: Uuid) -> ClubResult<Vec<Proposal>> {
        Ok(self.staged.proposals_of(session_id))
    }

    async fn find_proposal(&mut self, id: Uuid) -> ClubResult<Option<Proposal>> {
        Ok(self.staged.proposals.get(&id).cloned())
    }

    async fn insert_proposal(&mut self, proposal: &Proposal) -> ClubResult<()> {
        let duplicate = self
            .staged
            .proposals
            .values()
            .any(|p| p.session_id == proposal.session_id && p.catalog_ref == proposal.catalog_ref);
        if duplicate {
            return Err(ClubError::DuplicateProposal(proposal.catalog_ref.to_string()));
        }
        self.staged.proposals.insert(proposal.id, proposal.clone());
        Ok(())
    }

    async fn delete_proposal(&mut self, id: Uuid) -> ClubResult<()> {
        self.staged
            .proposals
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ClubError::NotFound(format!("proposal {id}")))
    }

    async fn upsert_vote(&mut self, vote: &Vote) -> ClubResult<()> {
        self.staged
            .votes
            .insert((vote.session_id, vote.user_id), vote.clone());
        Ok(())
    }

    async fn delete_vote(&mut self, session_id: Uuid, user_id: UserId) -> ClubResult<bool> {
        Ok(self.staged.votes.remove(&(session_id, user_id)).is_some())
    }

    async fn votes(&mut self, session_id: Uuid) -> ClubResult<Vec<Vote>> {
        Ok(self
            .staged
            .votes
            .values()
            .filter(|v| v.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn upsert_rating(&mut self, rating: &Rating) -> ClubResult<()> {
        self.staged
            .ratings
            .insert((rating.proposal_id, rating.user_id), rating.clone());
        Ok(())
    }

    async fn ratings(&mut self, proposal_id: Uuid) -> ClubResult<Vec<Rating>> {
        Ok(self
            .staged
            .ratings
            .values()
            .filter(|r| r.proposal_id == proposal_id)
            .cloned()
            .collect())
    }

    async fn store_aggregate(
        &mut self,
        proposal_id: Uuid,
        aggregate: &Aggregate,
    ) -> ClubResult<()> {
        let proposal = self
            .staged
            .proposals
            .get_mut(&proposal_id)
            .ok_or_else(|| ClubError::NotFound(format!("proposal {proposal_id}")))?;
        proposal.aggregate = *aggregate;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> ClubResult<()> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CatalogRef;

    fn proposal(session_id: Uuid, catalog_ref: &str, ordinal: i32) -> Proposal {
        Proposal {
            id: Uuid::new_v4(),
            session_id,
            catalog_ref: CatalogRef::new(catalog_ref).unwrap(),
            catalog_url: None,
            title: format!("Movie {catalog_ref}"),
            proposed_by: 1,
            slot: 1,
            ordinal,
            created_at: Utc::now(),
            aggregate: Aggregate::EMPTY,
        }
    }

    async fn open_session(store: &MemoryClubStore) -> Session {
        let mut tx = store.begin().await.unwrap();
        let group = tx.upsert_group(&ChatScope::new(-5, None), Utc::now()).await.unwrap();
        let session = Session::new(group.id, 1, Utc::now());
        tx.insert_session(&session).await.unwrap();
        tx.commit().await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_dropped_transaction_writes_nothing() {
        let store = MemoryClubStore::new();
        let session = open_session(&store).await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_proposal(&proposal(session.id, "1", 1)).await.unwrap();
        }

        assert!(store.list_proposals(session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_catalog_ref_is_rejected() {
        let store = MemoryClubStore::new();
        let session = open_session(&store).await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_proposal(&proposal(session.id, "326", 1)).await.unwrap();
        let err = tx
            .insert_proposal(&proposal(session.id, "326", 2))
            .await
            .unwrap_err();
        assert_eq!(err, ClubError::DuplicateProposal("326".to_string()));
    }

    #[tokio::test]
    async fn test_second_active_session_is_rejected() {
        let store = MemoryClubStore::new();
        let session = open_session(&store).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .insert_session(&Session::new(session.group_id, 2, Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClubError::GuardUnmet(_)));
    }

    #[tokio::test]
    async fn test_save_session_if_checks_stored_status() {
        let store = MemoryClubStore::new();
        let session = open_session(&store).await;
        let voting = session.advanced(SessionStatus::Voting, Utc::now());

        let mut tx = store.begin().await.unwrap();
        assert!(!tx.save_session_if(SessionStatus::Rating, &voting).await.unwrap());
        assert!(tx.save_session_if(SessionStatus::Collecting, &voting).await.unwrap());
        assert!(!tx.save_session_if(SessionStatus::Collecting, &voting).await.unwrap());
        tx.commit().await.unwrap();

        let stored = store.find_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Voting);
    }

    #[tokio::test]
    async fn test_votes_are_keyed_by_session_and_user() {
        let store = MemoryClubStore::new();
        let session = open_session(&store).await;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let mut tx = store.begin().await.unwrap();
        tx.upsert_vote(&Vote::new(session.id, 9, a, Utc::now())).await.unwrap();
        tx.upsert_vote(&Vote::new(session.id, 9, b, Utc::now())).await.unwrap();

        let votes = tx.votes(session.id).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].proposal_id, b);
    }
}
