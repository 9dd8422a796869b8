use super::UserId;
use serde::{Deserialize, Serialize};

/// Who is asking for a session change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "snake_case")]
pub enum Actor {
    Member(UserId),
    Admin(UserId),
    /// The rating-phase deadline policy, acting on nobody's behalf.
    Deadline,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin(_))
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Member(id) | Self::Admin(id) => Some(*id),
            Self::Deadline => None,
        }
    }
}
