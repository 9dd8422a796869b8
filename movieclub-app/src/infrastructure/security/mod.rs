mod access_policy;
mod catalog_link;
mod rate_limiter;

pub use access_policy::AccessPolicy;
pub use catalog_link::{sanitize_title, CatalogLink};
pub use rate_limiter::{EventThrottle, DEFAULT_EVENTS_PER_MINUTE};
