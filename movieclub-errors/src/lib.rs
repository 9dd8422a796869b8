mod club_error;

pub use club_error::{ClubError, ClubResult};
