use super::UserId;
use movieclub_errors::{ClubError, ClubResult};
use serde::{Deserialize, Serialize};

pub const MIN_SCORE: u8 = 1;
pub const MAX_SCORE: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Score(u8);

impl Score {
    pub fn new(value: u8) -> ClubResult<Self> {
        if (MIN_SCORE..=MAX_SCORE).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ClubError::Validation(format!(
                "score must be between {MIN_SCORE} and {MAX_SCORE}, got {value}"
            )))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Score {
    type Error = ClubError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Score> for u8 {
    fn from(value: Score) -> Self {
        value.0
    }
}

/// A user's live score for a winning proposal. Keyed by (proposal, user).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub proposal_id: uuid::Uuid,
    pub session_id: uuid::Uuid,
    pub user_id: UserId,
    pub score: Score,
    pub rated_at: chrono::DateTime<chrono::Utc>,
}

/// Mean and count over a proposal's live ratings. `mean` is `None` when
/// nobody has rated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub mean: Option<f64>,
    pub count: u32,
}

impl Aggregate {
    pub const EMPTY: Self = Self {
        mean: None,
        count: 0,
    };

    pub fn is_rated(&self) -> bool {
        self.count > 0
    }
}

impl Default for Aggregate {
    fn default() -> Self {
        Self::EMPTY
    }
}
