use crate::application::store::ClubStore;
use crate::application::tally;
use crate::domain::{ChatScope, ClubStats, LeaderboardPage, LeaderboardQuery, Proposal, Session};
use chrono::{DateTime, Utc};
use movieclub_errors::{ClubError, ClubResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MAX_PAGE_SIZE: usize = 100;

/// Status snapshot of a group's running session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentSession {
    pub session: Session,
    pub proposals: Vec<Proposal>,
}

/// Read-only views. Nothing here takes a transaction.
#[derive(Clone)]
pub struct ClubQueries {
    store: Arc<dyn ClubStore>,
}

impl ClubQueries {
    pub fn new(store: Arc<dyn ClubStore>) -> Self {
        Self { store }
    }

    pub async fn leaderboard(&self, query: &LeaderboardQuery) -> ClubResult<LeaderboardPage> {
        let page_size = query.page_size.min(MAX_PAGE_SIZE);

        let group_id = match &query.scope {
            Some(scope) => match self.store.find_group(scope).await? {
                Some(group) => Some(group.id),
                None => {
                    return Ok(LeaderboardPage {
                        page: query.page,
                        page_size,
                        total: 0,
                        rows: Vec::new(),
                    })
                }
            },
            None => None,
        };

        let entries = self.store.leaderboard_entries(group_id).await?;
        Ok(tally::rank_leaderboard(
            &entries,
            query.page,
            page_size,
            query.title_filter.as_deref(),
        ))
    }

    /// Counters for one club; a chat that never ran a session has all zeros.
    pub async fn stats(&self, scope: &ChatScope) -> ClubResult<ClubStats> {
        match self.store.find_group(scope).await? {
            Some(group) => self.store.stats(group.id).await,
            None => Ok(ClubStats::default()),
        }
    }

    pub async fn current_session(&self, scope: &ChatScope) -> ClubResult<CurrentSession> {
        let no_session = || ClubError::NoActiveSession(scope.to_string());

        let group = self.store.find_group(scope).await?.ok_or_else(no_session)?;
        let session = self
            .store
            .active_session(group.id)
            .await?
            .ok_or_else(no_session)?;
        let proposals = self.store.list_proposals(session.id).await?;

        Ok(CurrentSession { session, proposals })
    }

    pub async fn overdue_sessions(&self, now: DateTime<Utc>) -> ClubResult<Vec<Session>> {
        self.store.overdue_sessions(now).await
    }
}
