use crate::domain::{Actor, ChatScope, UserId};
use movieclub_errors::{ClubError, ClubResult};
use std::collections::HashSet;

/// Which chats may run a club and who administers it.
///
/// An entry without a topic admits every topic of that chat. No entries at
/// all admits every chat.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    groups: Vec<ChatScope>,
    admins: HashSet<UserId>,
}

impl AccessPolicy {
    pub fn new(groups: Vec<ChatScope>, admins: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            groups,
            admins: admins.into_iter().collect(),
        }
    }

    pub fn allows(&self, scope: &ChatScope) -> bool {
        self.groups.is_empty()
            || self.groups.iter().any(|allowed| {
                allowed.chat_id == scope.chat_id
                    && (allowed.topic_id.is_none() || allowed.topic_id == scope.topic_id)
            })
    }

    pub fn check(&self, scope: &ChatScope) -> ClubResult<()> {
        if self.allows(scope) {
            Ok(())
        } else {
            tracing::warn!(%scope, "Event from unauthorized chat");
            Err(ClubError::Forbidden(format!("{scope} is not a club chat")))
        }
    }

    pub fn actor_for(&self, user: UserId) -> Actor {
        if self.admins.contains(&user) {
            Actor::Admin(user)
        } else {
            Actor::Member(user)
        }
    }
}
