mod club_queries;
mod event_ingestor;
mod session_machine;
mod store;
pub mod tally;

pub use club_queries::{ClubQueries, CurrentSession, MAX_PAGE_SIZE};
pub use event_ingestor::{Dispatch, EventIngestor, InboundEvent};
pub use session_machine::SessionMachine;
pub use store::{ClubStore, ClubTx};
