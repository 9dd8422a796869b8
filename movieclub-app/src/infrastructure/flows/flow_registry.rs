use crate::domain::{ChatScope, UserId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub const DEFAULT_FLOW_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Waiting for "`<link> <title>`".
    Propose,
    /// Waiting for a yes/no before cancelling the session.
    CancelSession,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingFlow {
    pub kind: FlowKind,
    pub session_id: Uuid,
    pub started_at: Instant,
}

/// Multi-step conversations, at most one per user per chat scope.
///
/// Entries are never trusted past their TTL; expired entries are dropped
/// on access and by `purge_expired`.
#[derive(Clone)]
pub struct FlowRegistry {
    flows: Arc<DashMap<(ChatScope, UserId), PendingFlow>>,
    ttl: Duration,
}

impl FlowRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            flows: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Start a flow, replacing whatever the user had pending in this scope.
    pub fn begin(&self, scope: ChatScope, user: UserId, kind: FlowKind, session_id: Uuid) {
        let flow = PendingFlow {
            kind,
            session_id,
            started_at: Instant::now(),
        };
        if let Some(previous) = self.flows.insert((scope, user), flow) {
            tracing::debug!(%scope, user_id = user, kind = ?previous.kind, "Replaced pending flow");
        }
    }

    /// Remove and return the user's live flow.
    pub fn take(&self, scope: ChatScope, user: UserId) -> Option<PendingFlow> {
        let (_, flow) = self.flows.remove(&(scope, user))?;
        if self.is_expired(&flow) {
            tracing::debug!(%scope, user_id = user, kind = ?flow.kind, "Pending flow expired");
            return None;
        }
        Some(flow)
    }

    pub fn abort(&self, scope: ChatScope, user: UserId) -> bool {
        self.flows.remove(&(scope, user)).is_some()
    }

    pub fn purge_expired(&self) -> usize {
        let before = self.flows.len();
        self.flows.retain(|_, flow| !self.is_expired(flow));
        before.saturating_sub(self.flows.len())
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    fn is_expired(&self, flow: &PendingFlow) -> bool {
        flow.started_at.elapsed() >= self.ttl
    }
}

impl Default for FlowRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_FLOW_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCOPE: ChatScope = ChatScope {
        chat_id: -100,
        topic_id: None,
    };

    #[test]
    fn test_take_consumes_the_flow() {
        let flows = FlowRegistry::default();
        let session = Uuid::new_v4();
        flows.begin(SCOPE, 1, FlowKind::Propose, session);

        let flow = flows.take(SCOPE, 1).unwrap();
        assert_eq!(flow.kind, FlowKind::Propose);
        assert_eq!(flow.session_id, session);
        assert!(flows.take(SCOPE, 1).is_none());
    }

    #[test]
    fn test_flows_are_per_user_and_scope() {
        let flows = FlowRegistry::default();
        flows.begin(SCOPE, 1, FlowKind::Propose, Uuid::new_v4());

        assert!(flows.take(SCOPE, 2).is_none());
        assert!(flows.take(ChatScope::new(-100, Some(4)), 1).is_none());
        assert!(flows.abort(SCOPE, 1));
        assert!(!flows.abort(SCOPE, 1));
    }

    #[test]
    fn test_expired_flows_are_not_returned() {
        let flows = FlowRegistry::new(Duration::ZERO);
        flows.begin(SCOPE, 1, FlowKind::CancelSession, Uuid::new_v4());
        flows.begin(SCOPE, 2, FlowKind::Propose, Uuid::new_v4());

        assert!(flows.take(SCOPE, 1).is_none());
        assert_eq!(flows.purge_expired(), 1);
        assert!(flows.is_empty());
    }
}
