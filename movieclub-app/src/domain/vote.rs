use super::UserId;
use serde::{Deserialize, Serialize};

/// A user's live choice in a session's poll. Keyed by (session, user).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub session_id: uuid::Uuid,
    pub user_id: UserId,
    pub proposal_id: uuid::Uuid,
    pub cast_at: chrono::DateTime<chrono::Utc>,
}

impl Vote {
    pub fn new(
        session_id: uuid::Uuid,
        user_id: UserId,
        proposal_id: uuid::Uuid,
        cast_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            session_id,
            user_id,
            proposal_id,
            cast_at,
        }
    }
}
