pub mod club_group;
pub mod club_session;
pub mod proposal;
pub mod rating;
pub mod vote;

pub use club_group::Entity as ClubGroup;
pub use club_session::Entity as ClubSession;
pub use proposal::Entity as ProposalEntity;
pub use rating::Entity as RatingEntity;
pub use vote::Entity as VoteEntity;
