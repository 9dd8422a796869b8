use super::{Aggregate, Proposal, Rating, Session, SessionStatus, Vote};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub proposal_id: Uuid,
    pub ordinal: i32,
    pub votes: u32,
}

/// Result of counting a closed poll.
///
/// `winner` is `None` when no vote was cast (an admin forced the close).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerResult {
    pub winner: Option<Uuid>,
    pub tally: Vec<VoteTally>,
    pub total_votes: u32,
    /// More than one proposal shared the top count; the lowest ordinal won.
    pub tied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdvancePayload {
    Opened,
    BallotOpened { proposals: Vec<Proposal> },
    Winner(WinnerResult),
    Final {
        winner: Option<Uuid>,
        aggregate: Aggregate,
    },
    Aborted,
}

/// Published after a session status change commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAdvanced {
    pub session: Session,
    /// `None` for a freshly created session.
    pub from: Option<SessionStatus>,
    pub to: SessionStatus,
    pub payload: AdvancePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recorded {
    Proposal(Proposal),
    /// The proposer filled a slot they already held; `replaced` is gone.
    ProposalReplaced {
        replaced: Proposal,
        proposal: Proposal,
    },
    Vote(Vote),
    VoteRetracted { session_id: Uuid, user_id: i64 },
    Rating { rating: Rating, aggregate: Aggregate },
    RatingsImported {
        proposal_id: Uuid,
        imported: u32,
        aggregate: Aggregate,
    },
}

/// What the state machine did with one intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Advanced(SessionAdvanced),
    Recorded(Recorded),
}
