use super::{Aggregate, ChatScope, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// One watched movie eligible for the leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub proposal_id: Uuid,
    pub session_id: Uuid,
    pub group_id: Uuid,
    pub title: String,
    pub catalog_ref: String,
    pub proposed_by: UserId,
    pub aggregate: Aggregate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardRow {
    /// 1-based position in the full filtered ranking.
    pub rank: usize,
    #[serde(flatten)]
    pub entry: LeaderboardEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardPage {
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub rows: Vec<LeaderboardRow>,
}

impl LeaderboardPage {
    pub fn total_pages(&self) -> usize {
        if self.page_size == 0 {
            0
        } else {
            self.total.div_ceil(self.page_size)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardQuery {
    /// Restrict to one club; `None` ranks across every group.
    #[serde(default)]
    pub scope: Option<ChatScope>,
    #[serde(default)]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub title_filter: Option<String>,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for LeaderboardQuery {
    fn default() -> Self {
        Self {
            scope: None,
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
            title_filter: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClubStats {
    pub completed_sessions: u64,
    pub movies_watched: u64,
    pub participants: u64,
    pub ratings: u64,
}
