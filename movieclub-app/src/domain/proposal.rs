use super::{Aggregate, UserId};
use movieclub_errors::{ClubError, ClubResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

const MAX_CATALOG_REF_LENGTH: usize = 100;

/// Each member may hold one proposal per slot in a session.
pub const PROPOSAL_SLOTS: u8 = 2;
pub const DEFAULT_SLOT: u8 = 1;

pub fn check_slot(slot: u8) -> ClubResult<u8> {
    if (1..=PROPOSAL_SLOTS).contains(&slot) {
        Ok(slot)
    } else {
        Err(ClubError::Validation(format!(
            "slot must be between 1 and {PROPOSAL_SLOTS}, got {slot}"
        )))
    }
}

/// Identifier of a movie in the external catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CatalogRef(String);

impl CatalogRef {
    pub fn new(raw: impl Into<String>) -> ClubResult<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ClubError::Validation("catalog reference is empty".to_string()));
        }
        if trimmed.len() > MAX_CATALOG_REF_LENGTH || trimmed.chars().any(char::is_whitespace) {
            return Err(ClubError::Validation(format!(
                "catalog reference {trimmed:?} is malformed"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CatalogRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CatalogRef {
    type Error = ClubError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CatalogRef> for String {
    fn from(value: CatalogRef) -> Self {
        value.0
    }
}

/// A candidate movie as submitted, before it gets an id and ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProposal {
    pub session_id: Uuid,
    pub catalog_ref: CatalogRef,
    pub catalog_url: Option<String>,
    pub title: String,
    pub proposed_by: UserId,
    /// `None` takes the proposer's first free slot.
    #[serde(default)]
    pub slot: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub session_id: Uuid,
    pub catalog_ref: CatalogRef,
    pub catalog_url: Option<String>,
    pub title: String,
    pub proposed_by: UserId,
    pub slot: u8,
    /// 1-based submission order within the session; poll options follow it.
    pub ordinal: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub aggregate: Aggregate,
}

impl Proposal {
    pub fn from_new(
        new: NewProposal,
        slot: u8,
        ordinal: i32,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: new.session_id,
            catalog_ref: new.catalog_ref,
            catalog_url: new.catalog_url,
            title: new.title,
            proposed_by: new.proposed_by,
            slot,
            ordinal,
            created_at,
            aggregate: Aggregate::EMPTY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_ref_is_trimmed() {
        assert_eq!(CatalogRef::new(" 326 ").unwrap().as_str(), "326");
    }

    #[test]
    fn catalog_ref_rejects_blank_and_inner_spaces() {
        assert!(CatalogRef::new("   ").is_err());
        assert!(CatalogRef::new("32 6").is_err());
    }

    #[test]
    fn slots_are_bounded() {
        assert!(check_slot(0).is_err());
        assert_eq!(check_slot(1).unwrap(), 1);
        assert_eq!(check_slot(PROPOSAL_SLOTS).unwrap(), PROPOSAL_SLOTS);
        assert!(check_slot(PROPOSAL_SLOTS + 1).is_err());
    }
}
