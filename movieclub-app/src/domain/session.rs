use super::UserId;
use chrono::{DateTime, Duration, Utc};
use movieclub_errors::ClubError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Collecting,
    Voting,
    Rating,
    Completed,
}

impl SessionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Collecting => "collecting",
            Self::Voting => "voting",
            Self::Rating => "rating",
            Self::Completed => "completed",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = ClubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collecting" => Ok(Self::Collecting),
            "voting" => Ok(Self::Voting),
            "rating" => Ok(Self::Rating),
            "completed" => Ok(Self::Completed),
            other => Err(ClubError::Internal(format!("unknown session status {other:?}"))),
        }
    }
}

/// A request to move a session forward.
///
/// `forced` on the closing triggers is the admin override that skips the
/// "at least one vote/rating" guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum Trigger {
    StartVoting,
    CloseVoting {
        #[serde(default)]
        forced: bool,
    },
    CloseRating {
        #[serde(default)]
        forced: bool,
    },
    Cancel,
}

impl Trigger {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::StartVoting => "start voting",
            Self::CloseVoting { .. } => "close voting",
            Self::CloseRating { .. } => "close rating",
            Self::Cancel => "cancel",
        }
    }

    /// Target status when fired from `from`, or `None` if the table has no such edge.
    pub fn target(&self, from: SessionStatus) -> Option<SessionStatus> {
        match (*self, from) {
            (Self::StartVoting, SessionStatus::Collecting) => Some(SessionStatus::Voting),
            (Self::CloseVoting { .. }, SessionStatus::Voting) => Some(SessionStatus::Rating),
            (Self::CloseRating { .. }, SessionStatus::Rating) => Some(SessionStatus::Completed),
            (Self::Cancel, from) if !from.is_terminal() => Some(SessionStatus::Completed),
            _ => None,
        }
    }

    pub const fn is_forced(&self) -> bool {
        matches!(
            self,
            Self::CloseVoting { forced: true } | Self::CloseRating { forced: true }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub group_id: Uuid,
    pub status: SessionStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub voting_started_at: Option<DateTime<Utc>>,
    pub voting_closed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub aborted: bool,
    pub winner_proposal_id: Option<Uuid>,
    pub rating_deadline: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(group_id: Uuid, created_by: UserId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            group_id,
            status: SessionStatus::Collecting,
            created_by,
            created_at,
            voting_started_at: None,
            voting_closed_at: None,
            completed_at: None,
            aborted: false,
            winner_proposal_id: None,
            rating_deadline: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn deadline_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.rating_deadline.is_some_and(|deadline| deadline <= now)
    }

    /// Copy of this session moved to `to`, with the phase timestamp stamped.
    pub fn advanced(&self, to: SessionStatus, at: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.status = to;
        match to {
            SessionStatus::Voting => next.voting_started_at = Some(at),
            SessionStatus::Rating => next.voting_closed_at = Some(at),
            SessionStatus::Completed => next.completed_at = Some(at),
            SessionStatus::Collecting => {}
        }
        next
    }

    pub fn with_rating_window(mut self, window: Option<Duration>) -> Self {
        self.rating_deadline = match (window, self.voting_closed_at) {
            (Some(window), Some(closed)) => Some(closed + window),
            _ => None,
        };
        self
    }
}
