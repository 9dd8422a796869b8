use crate::domain::UserId;
use dashmap::DashMap;
use movieclub_errors::{ClubError, ClubResult};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_EVENTS_PER_MINUTE: u32 = 30;
const WINDOW: Duration = Duration::from_secs(60);
const CLEANUP_INTERVAL_SECS: u64 = 300;

#[derive(Clone)]
struct EventRecord {
    count: u32,
    window_start: Instant,
}

impl Default for EventRecord {
    fn default() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }
}

/// Fixed-window budget of inbound events per user.
#[derive(Clone)]
pub struct EventThrottle {
    events: Arc<DashMap<UserId, EventRecord>>,
    per_minute: u32,
    last_cleanup: Arc<Mutex<Instant>>,
}

impl EventThrottle {
    /// A budget of 0 disables throttling.
    pub fn new(per_minute: u32) -> Self {
        Self {
            events: Arc::new(DashMap::new()),
            per_minute,
            last_cleanup: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn check(&self, user: UserId) -> ClubResult<()> {
        if self.per_minute == 0 {
            return Ok(());
        }
        self.maybe_cleanup();

        let now = Instant::now();
        let mut record = self.events.entry(user).or_default();

        if now.duration_since(record.window_start) > WINDOW {
            record.count = 0;
            record.window_start = now;
        }

        if record.count >= self.per_minute {
            let elapsed = now.duration_since(record.window_start).as_secs();
            let wait_secs = WINDOW.as_secs().saturating_sub(elapsed).max(1);
            tracing::warn!(user_id = user, wait_secs, "Event throttled");
            return Err(ClubError::RateLimited(wait_secs));
        }

        record.count += 1;
        Ok(())
    }

    fn maybe_cleanup(&self) {
        // Another caller is already sweeping.
        let Ok(mut last_cleanup) = self.last_cleanup.try_lock() else {
            return;
        };
        if last_cleanup.elapsed() > Duration::from_secs(CLEANUP_INTERVAL_SECS) {
            self.events
                .retain(|_, record| record.window_start.elapsed() <= WINDOW);
            *last_cleanup = Instant::now();
        }
    }
}

impl Default for EventThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_EVENTS_PER_MINUTE)
    }
}
