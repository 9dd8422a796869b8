//! Turns inbound platform events into state machine intents.
//!
//! The ingestor applies the per-user throttle and the chat access policy,
//! resolves which session an event refers to, and drives the short
//! multi-step flows (propose, cancel confirmation). It never writes session
//! state itself.

use crate::application::session_machine::SessionMachine;
use crate::domain::{
    Actor, ChatScope, ImportedRating, Intent, Outcome, Score, Session, SessionStatus, UserId,
    WatchedImport,
};
use crate::infrastructure::flows::{FlowKind, FlowRegistry};
use crate::infrastructure::security::{sanitize_title, AccessPolicy, CatalogLink, EventThrottle};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use movieclub_errors::{ClubError, ClubResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

const CONFIRM_WORDS: &[&str] = &["yes", "y", "да"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InboundEvent {
    CreateSession {
        scope: ChatScope,
        user: UserId,
    },
    /// `link` is a catalog URL or bare catalog id.
    Propose {
        scope: ChatScope,
        user: UserId,
        #[serde(default)]
        session_id: Option<Uuid>,
        link: String,
        #[serde(default)]
        title: Option<String>,
        /// Slot to fill or replace; the first free one when absent.
        #[serde(default)]
        slot: Option<u8>,
    },
    StartVoting {
        scope: ChatScope,
        user: UserId,
        #[serde(default)]
        session_id: Option<Uuid>,
    },
    /// Poll answer as the platform reports it: indexes into the ballot,
    /// which lists proposals in ordinal order. No options means retract.
    PollAnswer {
        scope: ChatScope,
        user: UserId,
        #[serde(default)]
        session_id: Option<Uuid>,
        #[serde(default)]
        option_ids: Vec<usize>,
    },
    CloseVoting {
        scope: ChatScope,
        user: UserId,
        #[serde(default)]
        session_id: Option<Uuid>,
        #[serde(default)]
        force: bool,
    },
    /// Without `proposal_id` the rating goes to the active session's winner.
    Rate {
        scope: ChatScope,
        user: UserId,
        #[serde(default)]
        proposal_id: Option<Uuid>,
        score: u8,
    },
    CloseRating {
        scope: ChatScope,
        user: UserId,
        #[serde(default)]
        session_id: Option<Uuid>,
        #[serde(default)]
        force: bool,
    },
    CancelSession {
        scope: ChatScope,
        user: UserId,
        #[serde(default)]
        session_id: Option<Uuid>,
    },
    /// Raised by the scheduler, not by a user.
    DeadlineElapsed {
        session_id: Uuid,
    },
    BeginFlow {
        scope: ChatScope,
        user: UserId,
        flow: FlowKind,
    },
    FlowReply {
        scope: ChatScope,
        user: UserId,
        text: String,
    },
    AbortFlow {
        scope: ChatScope,
        user: UserId,
    },
    /// Admin backfill of a movie the club watched before using the bot.
    /// Without `watched_on` the movie counts as watched today.
    ImportWatched {
        scope: ChatScope,
        user: UserId,
        link: String,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        watched_on: Option<NaiveDate>,
        #[serde(default)]
        proposed_by: Option<UserId>,
        #[serde(default)]
        ratings: Vec<ImportedRating>,
    },
    ImportRatings {
        scope: ChatScope,
        user: UserId,
        proposal_id: Uuid,
        ratings: Vec<ImportedRating>,
    },
}

impl InboundEvent {
    pub fn origin(&self) -> Option<(ChatScope, UserId)> {
        match self {
            Self::CreateSession { scope, user }
            | Self::Propose { scope, user, .. }
            | Self::StartVoting { scope, user, .. }
            | Self::PollAnswer { scope, user, .. }
            | Self::CloseVoting { scope, user, .. }
            | Self::Rate { scope, user, .. }
            | Self::CloseRating { scope, user, .. }
            | Self::CancelSession { scope, user, .. }
            | Self::BeginFlow { scope, user, .. }
            | Self::FlowReply { scope, user, .. }
            | Self::AbortFlow { scope, user }
            | Self::ImportWatched { scope, user, .. }
            | Self::ImportRatings { scope, user, .. } => Some((*scope, *user)),
            Self::DeadlineElapsed { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateSession { .. } => "create_session",
            Self::Propose { .. } => "propose",
            Self::StartVoting { .. } => "start_voting",
            Self::PollAnswer { .. } => "poll_answer",
            Self::CloseVoting { .. } => "close_voting",
            Self::Rate { .. } => "rate",
            Self::CloseRating { .. } => "close_rating",
            Self::CancelSession { .. } => "cancel_session",
            Self::DeadlineElapsed { .. } => "deadline_elapsed",
            Self::BeginFlow { .. } => "begin_flow",
            Self::FlowReply { .. } => "flow_reply",
            Self::AbortFlow { .. } => "abort_flow",
            Self::ImportWatched { .. } => "import_watched",
            Self::ImportRatings { .. } => "import_ratings",
        }
    }
}

/// What became of one inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dispatch", content = "body", rename_all = "snake_case")]
pub enum Dispatch {
    Executed(Outcome),
    /// The user is in a flow and should be asked for more input.
    Prompt(String),
    Ignored(String),
    /// Someone else already moved the session; nothing to do.
    AlreadyHandled(String),
}

pub struct EventIngestor {
    machine: Arc<SessionMachine>,
    policy: AccessPolicy,
    throttle: EventThrottle,
    flows: FlowRegistry,
}

impl EventIngestor {
    pub fn new(
        machine: Arc<SessionMachine>,
        policy: AccessPolicy,
        throttle: EventThrottle,
        flows: FlowRegistry,
    ) -> Self {
        Self {
            machine,
            policy,
            throttle,
            flows,
        }
    }

    pub fn flows(&self) -> &FlowRegistry {
        &self.flows
    }

    pub async fn handle(&self, event: InboundEvent) -> ClubResult<Dispatch> {
        let name = event.name();
        let origin = event.origin();

        let result = self.dispatch(event).await;
        if let Err(err) = &result {
            match origin {
                Some((scope, user)) => tracing::warn!(
                    event = name,
                    %scope,
                    user_id = user,
                    code = err.code(),
                    error = %err,
                    "Event rejected"
                ),
                None => {
                    tracing::warn!(event = name, code = err.code(), error = %err, "Event rejected")
                }
            }
        }
        result
    }

    /// Close the rating phase of every session whose deadline has passed and
    /// drop expired flows. Returns how many sessions were closed.
    pub async fn sweep_deadlines(&self, now: DateTime<Utc>) -> ClubResult<usize> {
        let purged = self.flows.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "Dropped expired flows");
        }

        let overdue = self.machine.store().overdue_sessions(now).await?;
        let mut closed = 0;
        for session in overdue {
            match self
                .handle(InboundEvent::DeadlineElapsed {
                    session_id: session.id,
                })
                .await
            {
                Ok(Dispatch::Executed(_)) => closed += 1,
                Ok(_) => {}
                Err(err) if err.is_retryable() => return Err(err),
                Err(_) => {}
            }
        }
        Ok(closed)
    }

    async fn dispatch(&self, event: InboundEvent) -> ClubResult<Dispatch> {
        if let Some((scope, user)) = event.origin() {
            self.policy.check(&scope)?;
            self.throttle.check(user)?;
        }

        match event {
            InboundEvent::CreateSession { scope, user } => {
                let actor = self.policy.actor_for(user);
                self.execute(Intent::CreateSession { scope, actor }).await
            }
            InboundEvent::Propose {
                scope,
                user,
                session_id,
                link,
                title,
                slot,
            } => {
                let session = self.resolve_session(&scope, session_id).await?;
                let link = CatalogLink::parse(&link)?;
                let title = sanitize_title(title.as_deref().unwrap_or_default());
                self.propose(session.id, user, link, title, slot).await
            }
            InboundEvent::StartVoting {
                scope,
                user,
                session_id,
            } => {
                let session = self.resolve_session(&scope, session_id).await?;
                let actor = self.policy.actor_for(user);
                self.trigger(Intent::StartVoting {
                    session_id: session.id,
                    actor,
                })
                .await
            }
            InboundEvent::PollAnswer {
                scope,
                user,
                session_id,
                option_ids,
            } => {
                let session = self.resolve_session(&scope, session_id).await?;
                let Some(&option) = option_ids.first() else {
                    return self
                        .execute(Intent::RetractVote {
                            session_id: session.id,
                            user,
                        })
                        .await;
                };
                let proposals = self.machine.store().list_proposals(session.id).await?;
                let proposal = proposals.get(option).ok_or_else(|| {
                    ClubError::Validation(format!(
                        "poll option {option} is out of range for {} proposals",
                        proposals.len()
                    ))
                })?;
                self.execute(Intent::CastVote {
                    session_id: session.id,
                    user,
                    proposal_id: proposal.id,
                })
                .await
            }
            InboundEvent::CloseVoting {
                scope,
                user,
                session_id,
                force,
            } => {
                let session = self.resolve_session(&scope, session_id).await?;
                self.trigger(Intent::CloseVoting {
                    session_id: session.id,
                    actor: self.policy.actor_for(user),
                    forced: force,
                })
                .await
            }
            InboundEvent::Rate {
                scope,
                user,
                proposal_id,
                score,
            } => {
                let score = Score::new(score)?;
                let session = self.resolve_session(&scope, None).await?;
                if session.status != SessionStatus::Rating {
                    return Err(ClubError::phase_mismatch(
                        "rate a movie",
                        "rating",
                        session.status.as_str(),
                    ));
                }
                let winner = session.winner_proposal_id.ok_or_else(|| {
                    ClubError::NotFound(format!("winner of session {}", session.id))
                })?;
                if let Some(other) = proposal_id.filter(|id| *id != winner) {
                    return Err(ClubError::NotFound(format!(
                        "proposal {other} is not being rated in {scope}"
                    )));
                }
                self.execute(Intent::CastRating {
                    proposal_id: winner,
                    user,
                    score,
                })
                .await
            }
            InboundEvent::CloseRating {
                scope,
                user,
                session_id,
                force,
            } => {
                let session = self.resolve_session(&scope, session_id).await?;
                self.trigger(Intent::CloseRating {
                    session_id: session.id,
                    actor: self.policy.actor_for(user),
                    forced: force,
                })
                .await
            }
            InboundEvent::CancelSession {
                scope,
                user,
                session_id,
            } => {
                let session = self.resolve_session(&scope, session_id).await?;
                self.trigger(Intent::CancelSession {
                    session_id: session.id,
                    actor: self.policy.actor_for(user),
                })
                .await
            }
            InboundEvent::DeadlineElapsed { session_id } => {
                self.trigger(Intent::CloseRating {
                    session_id,
                    actor: Actor::Deadline,
                    forced: false,
                })
                .await
            }
            InboundEvent::BeginFlow { scope, user, flow } => {
                self.begin_flow(scope, user, flow).await
            }
            InboundEvent::FlowReply { scope, user, text } => {
                self.continue_flow(scope, user, &text).await
            }
            InboundEvent::AbortFlow { scope, user } => {
                if self.flows.abort(scope, user) {
                    Ok(Dispatch::Ignored("flow aborted".to_string()))
                } else {
                    Ok(Dispatch::Ignored("no pending flow".to_string()))
                }
            }
            InboundEvent::ImportWatched {
                scope,
                user,
                link,
                title,
                watched_on,
                proposed_by,
                ratings,
            } => {
                let link = CatalogLink::parse(&link)?;
                let title = sanitize_title(title.as_deref().unwrap_or_default());
                let title = if title.is_empty() {
                    format!("Film {}", link.catalog_ref)
                } else {
                    title
                };
                let watched_at = watched_on
                    .map(|date| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
                    .unwrap_or_else(Utc::now);
                let import = WatchedImport {
                    scope,
                    catalog_ref: link.catalog_ref,
                    catalog_url: Some(link.url),
                    title,
                    proposed_by,
                    watched_at,
                    ratings,
                };
                self.execute(Intent::ImportWatched {
                    import,
                    actor: self.policy.actor_for(user),
                })
                .await
            }
            InboundEvent::ImportRatings {
                scope,
                user,
                proposal_id,
                ratings,
            } => {
                self.expect_proposal_in(&scope, proposal_id).await?;
                self.execute(Intent::ImportRatings {
                    proposal_id,
                    ratings,
                    actor: self.policy.actor_for(user),
                })
                .await
            }
        }
    }

    async fn begin_flow(
        &self,
        scope: ChatScope,
        user: UserId,
        kind: FlowKind,
    ) -> ClubResult<Dispatch> {
        let session = self.resolve_session(&scope, None).await?;
        let prompt = match kind {
            FlowKind::Propose => "Send a kinopoisk link, optionally followed by the title.",
            FlowKind::CancelSession => {
                if !self.policy.actor_for(user).is_admin() {
                    return Err(ClubError::Forbidden(
                        "only an admin can cancel a session".to_string(),
                    ));
                }
                "Cancel the current session? Reply yes to confirm."
            }
        };
        self.flows.begin(scope, user, kind, session.id);
        Ok(Dispatch::Prompt(prompt.to_string()))
    }

    async fn continue_flow(
        &self,
        scope: ChatScope,
        user: UserId,
        text: &str,
    ) -> ClubResult<Dispatch> {
        let Some(flow) = self.flows.take(scope, user) else {
            return Ok(Dispatch::Ignored("no pending flow".to_string()));
        };

        match flow.kind {
            FlowKind::Propose => match Self::link_in_reply(text) {
                Ok((link, title)) => self.propose(flow.session_id, user, link, title, None).await,
                Err(err) => {
                    // Let the user try again without restarting the flow.
                    self.flows.begin(scope, user, flow.kind, flow.session_id);
                    Ok(Dispatch::Prompt(format!(
                        "{} Send a kinopoisk link, for example https://www.kinopoisk.ru/film/301/",
                        err.user_message()
                    )))
                }
            },
            FlowKind::CancelSession => {
                let answer = text.trim().to_lowercase();
                if !CONFIRM_WORDS.contains(&answer.as_str()) {
                    return Ok(Dispatch::Ignored("cancel dismissed".to_string()));
                }
                self.trigger(Intent::CancelSession {
                    session_id: flow.session_id,
                    actor: self.policy.actor_for(user),
                })
                .await
            }
        }
    }

    async fn propose(
        &self,
        session_id: Uuid,
        user: UserId,
        link: CatalogLink,
        title: String,
        slot: Option<u8>,
    ) -> ClubResult<Dispatch> {
        let title = if title.is_empty() {
            format!("Film {}", link.catalog_ref)
        } else {
            title
        };
        self.execute(Intent::Propose {
            session_id,
            proposer: user,
            catalog_ref: link.catalog_ref,
            catalog_url: Some(link.url),
            title,
            slot,
        })
        .await
    }

    /// A reply that starts with a link may carry the title after it. Otherwise
    /// the first catalog link anywhere in the text is taken, without a title.
    fn link_in_reply(text: &str) -> ClubResult<(CatalogLink, String)> {
        CatalogLink::split_title(text).or_else(|err| {
            CatalogLink::extract_all(text)
                .into_iter()
                .next()
                .map(|link| (link, String::new()))
                .ok_or(err)
        })
    }

    async fn execute(&self, intent: Intent) -> ClubResult<Dispatch> {
        self.machine.execute(intent).await.map(Dispatch::Executed)
    }

    /// Like `execute`, but losing a race on a phase change is not an error.
    async fn trigger(&self, intent: Intent) -> ClubResult<Dispatch> {
        match self.machine.execute(intent).await {
            Ok(outcome) => Ok(Dispatch::Executed(outcome)),
            Err(err) if err.is_already_handled() => {
                tracing::info!(error = %err, "Transition already handled");
                Ok(Dispatch::AlreadyHandled(err.to_string()))
            }
            Err(err) => Err(err),
        }
    }

    /// The session an event talks about: the one it names, which must belong
    /// to the event's chat, or else the chat's active session.
    async fn resolve_session(
        &self,
        scope: &ChatScope,
        explicit: Option<Uuid>,
    ) -> ClubResult<Session> {
        let store = self.machine.store();
        let group = store
            .find_group(scope)
            .await?
            .ok_or_else(|| ClubError::NoActiveSession(scope.to_string()))?;

        match explicit {
            Some(id) => {
                let session = store
                    .find_session(id)
                    .await?
                    .ok_or_else(|| ClubError::NotFound(format!("session {id}")))?;
                if session.group_id != group.id {
                    return Err(ClubError::Forbidden(format!(
                        "session {id} belongs to another chat"
                    )));
                }
                Ok(session)
            }
            None => store
                .active_session(group.id)
                .await?
                .ok_or_else(|| ClubError::NoActiveSession(scope.to_string())),
        }
    }

    async fn expect_proposal_in(&self, scope: &ChatScope, proposal_id: Uuid) -> ClubResult<()> {
        let store = self.machine.store();
        let not_found = || ClubError::NotFound(format!("proposal {proposal_id}"));
        let proposal = store.find_proposal(proposal_id).await?.ok_or_else(not_found)?;
        let session = store
            .find_session(proposal.session_id)
            .await?
            .ok_or_else(not_found)?;
        let group = store.find_group(scope).await?.ok_or_else(not_found)?;
        if session.group_id != group.id {
            return Err(ClubError::Forbidden(format!(
                "proposal {proposal_id} belongs to another chat"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AdvancePayload, Recorded, SessionStatus};
    use crate::infrastructure::memory::MemoryClubStore;
    use std::time::Duration;

    const SCOPE: ChatScope = ChatScope {
        chat_id: -100,
        topic_id: None,
    };
    const ADMIN: UserId = 1;

    fn ingestor() -> EventIngestor {
        ingestor_with(FlowRegistry::default(), 0)
    }

    fn ingestor_with(flows: FlowRegistry, per_minute: u32) -> EventIngestor {
        let machine = Arc::new(SessionMachine::new(Arc::new(MemoryClubStore::new()), None));
        EventIngestor::new(
            machine,
            AccessPolicy::new(vec![SCOPE], [ADMIN]),
            EventThrottle::new(per_minute),
            flows,
        )
    }

    async fn open(ingestor: &EventIngestor) -> Uuid {
        match ingestor
            .handle(InboundEvent::CreateSession {
                scope: SCOPE,
                user: 2,
            })
            .await
            .unwrap()
        {
            Dispatch::Executed(Outcome::Advanced(advanced)) => advanced.session.id,
            other => panic!("unexpected dispatch {other:?}"),
        }
    }

    fn propose(link: &str) -> InboundEvent {
        InboundEvent::Propose {
            scope: SCOPE,
            user: 2,
            session_id: None,
            link: link.to_string(),
            title: None,
            slot: None,
        }
    }

    #[tokio::test]
    async fn test_events_from_foreign_chats_are_forbidden() {
        let ingestor = ingestor();
        let err = ingestor
            .handle(InboundEvent::CreateSession {
                scope: ChatScope::new(-999, None),
                user: 2,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClubError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_foreign_chat_does_not_spend_the_budget() {
        let ingestor = ingestor_with(FlowRegistry::default(), 1);
        let err = ingestor
            .handle(InboundEvent::CreateSession {
                scope: ChatScope::new(-999, None),
                user: 2,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClubError::Forbidden(_)));

        open(&ingestor).await;
    }

    #[tokio::test]
    async fn test_throttled_user_is_rate_limited() {
        let ingestor = ingestor_with(FlowRegistry::default(), 1);
        open(&ingestor).await;
        let err = ingestor.handle(propose("301")).await.unwrap_err();
        assert!(matches!(err, ClubError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_propose_without_session_reports_no_active_session() {
        let ingestor = ingestor();
        let err = ingestor.handle(propose("301")).await.unwrap_err();
        assert!(matches!(err, ClubError::NoActiveSession(_)));
    }

    #[tokio::test]
    async fn test_propose_uses_canonical_link_and_fallback_title() {
        let ingestor = ingestor();
        open(&ingestor).await;

        let dispatch = ingestor
            .handle(propose("https://kinopoisk.ru/film/301/cast/"))
            .await
            .unwrap();
        match dispatch {
            Dispatch::Executed(Outcome::Recorded(Recorded::Proposal(p))) => {
                assert_eq!(p.catalog_ref.as_str(), "301");
                assert_eq!(p.catalog_url.as_deref(), Some("https://www.kinopoisk.ru/film/301/"));
                assert_eq!(p.title, "Film 301");
            }
            other => panic!("unexpected dispatch {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_explicit_session_is_not_found() {
        let ingestor = ingestor();
        open(&ingestor).await;
        let err = ingestor
            .handle(InboundEvent::StartVoting {
                scope: SCOPE,
                user: 2,
                session_id: Some(Uuid::new_v4()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClubError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_poll_answers_map_to_ballot_order() {
        let ingestor = ingestor();
        open(&ingestor).await;
        ingestor.handle(propose("301")).await.unwrap();
        ingestor.handle(propose("326")).await.unwrap();
        ingestor
            .handle(InboundEvent::StartVoting {
                scope: SCOPE,
                user: 2,
                session_id: None,
            })
            .await
            .unwrap();

        let answer = |options: Vec<usize>| InboundEvent::PollAnswer {
            scope: SCOPE,
            user: 5,
            session_id: None,
            option_ids: options,
        };
        ingestor.handle(answer(vec![1])).await.unwrap();

        let err = ingestor.handle(answer(vec![7])).await.unwrap_err();
        assert!(matches!(err, ClubError::Validation(_)));

        let retracted = ingestor.handle(answer(Vec::new())).await.unwrap();
        assert!(matches!(
            retracted,
            Dispatch::Executed(Outcome::Recorded(Recorded::VoteRetracted { user_id: 5, .. }))
        ));

        ingestor.handle(answer(vec![1])).await.unwrap();
        let closed = ingestor
            .handle(InboundEvent::CloseVoting {
                scope: SCOPE,
                user: 2,
                session_id: None,
                force: false,
            })
            .await
            .unwrap();
        match closed {
            Dispatch::Executed(Outcome::Advanced(advanced)) => match advanced.payload {
                AdvancePayload::Winner(result) => {
                    assert_eq!(result.total_votes, 1);
                    assert_eq!(result.tally[1].votes, 1);
                }
                other => panic!("unexpected payload {other:?}"),
            },
            other => panic!("unexpected dispatch {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_before_rating_phase_is_phase_mismatch() {
        let ingestor = ingestor();
        open(&ingestor).await;
        ingestor.handle(propose("301")).await.unwrap();
        ingestor.handle(propose("326")).await.unwrap();
        ingestor
            .handle(InboundEvent::StartVoting {
                scope: SCOPE,
                user: 2,
                session_id: None,
            })
            .await
            .unwrap();

        let err = ingestor
            .handle(InboundEvent::Rate {
                scope: SCOPE,
                user: 5,
                proposal_id: None,
                score: 7,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PHASE_MISMATCH");
    }

    #[tokio::test]
    async fn test_propose_into_taken_slot_replaces() {
        let ingestor = ingestor();
        open(&ingestor).await;
        ingestor.handle(propose("301")).await.unwrap();

        let mut replace = propose("326");
        if let InboundEvent::Propose { slot, .. } = &mut replace {
            *slot = Some(1);
        }
        match ingestor.handle(replace).await.unwrap() {
            Dispatch::Executed(Outcome::Recorded(Recorded::ProposalReplaced {
                replaced,
                proposal,
            })) => {
                assert_eq!(replaced.catalog_ref.as_str(), "301");
                assert_eq!(proposal.catalog_ref.as_str(), "326");
                assert_eq!(proposal.ordinal, replaced.ordinal);
            }
            other => panic!("unexpected dispatch {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_import_watched_needs_admin_and_backdates() {
        let ingestor = ingestor();
        let import = |user: UserId| InboundEvent::ImportWatched {
            scope: SCOPE,
            user,
            link: "https://www.kinopoisk.ru/film/326/".to_string(),
            title: Some("The Shawshank Redemption".to_string()),
            watched_on: NaiveDate::from_ymd_opt(2024, 3, 9),
            proposed_by: None,
            ratings: vec![ImportedRating {
                user: 5,
                score: Score::new(9).unwrap(),
            }],
        };

        let err = ingestor.handle(import(2)).await.unwrap_err();
        assert!(matches!(err, ClubError::Forbidden(_)));

        let advanced = match ingestor.handle(import(ADMIN)).await.unwrap() {
            Dispatch::Executed(Outcome::Advanced(advanced)) => advanced,
            other => panic!("unexpected dispatch {other:?}"),
        };
        assert_eq!(
            advanced.session.completed_at.map(|at| at.date_naive()),
            NaiveDate::from_ymd_opt(2024, 3, 9)
        );
        let winner = advanced.session.winner_proposal_id.unwrap();

        let more = ingestor
            .handle(InboundEvent::ImportRatings {
                scope: SCOPE,
                user: ADMIN,
                proposal_id: winner,
                ratings: vec![ImportedRating {
                    user: 6,
                    score: Score::new(7).unwrap(),
                }],
            })
            .await
            .unwrap();
        match more {
            Dispatch::Executed(Outcome::Recorded(Recorded::RatingsImported {
                imported,
                aggregate,
                ..
            })) => {
                assert_eq!(imported, 1);
                assert_eq!(aggregate.count, 2);
                assert_eq!(aggregate.mean, Some(8.0));
            }
            other => panic!("unexpected dispatch {other:?}"),
        }

        // The chat is still free to start a live session.
        open(&ingestor).await;
    }

    #[tokio::test]
    async fn test_repeated_trigger_is_already_handled() {
        let ingestor = ingestor();
        open(&ingestor).await;
        let cancel = InboundEvent::CancelSession {
            scope: SCOPE,
            user: ADMIN,
            session_id: None,
        };
        let first = ingestor.handle(cancel).await.unwrap();
        assert!(matches!(first, Dispatch::Executed(_)));

        // With the session gone the chat has nothing active; naming it explicitly
        // reaches the state machine, which reports the race as handled.
        let session_id = match first {
            Dispatch::Executed(Outcome::Advanced(advanced)) => advanced.session.id,
            _ => unreachable!(),
        };
        let again = ingestor
            .handle(InboundEvent::CancelSession {
                scope: SCOPE,
                user: ADMIN,
                session_id: Some(session_id),
            })
            .await
            .unwrap();
        assert!(matches!(again, Dispatch::AlreadyHandled(_)));
    }

    #[tokio::test]
    async fn test_propose_flow_rearms_on_bad_input() {
        let ingestor = ingestor();
        open(&ingestor).await;
        let begin = InboundEvent::BeginFlow {
            scope: SCOPE,
            user: 2,
            flow: FlowKind::Propose,
        };
        assert!(matches!(ingestor.handle(begin).await.unwrap(), Dispatch::Prompt(_)));

        let reply = |text: &str| InboundEvent::FlowReply {
            scope: SCOPE,
            user: 2,
            text: text.to_string(),
        };
        assert!(matches!(
            ingestor.handle(reply("what?")).await.unwrap(),
            Dispatch::Prompt(_)
        ));

        let dispatch = ingestor
            .handle(reply("https://www.kinopoisk.ru/film/326/ The Shawshank Redemption"))
            .await
            .unwrap();
        match dispatch {
            Dispatch::Executed(Outcome::Recorded(Recorded::Proposal(p))) => {
                assert_eq!(p.title, "The Shawshank Redemption");
            }
            other => panic!("unexpected dispatch {other:?}"),
        }
        assert!(ingestor.flows().is_empty());
    }

    #[tokio::test]
    async fn test_propose_flow_finds_link_inside_text() {
        let ingestor = ingestor();
        open(&ingestor).await;
        ingestor
            .handle(InboundEvent::BeginFlow {
                scope: SCOPE,
                user: 2,
                flow: FlowKind::Propose,
            })
            .await
            .unwrap();

        let dispatch = ingestor
            .handle(InboundEvent::FlowReply {
                scope: SCOPE,
                user: 2,
                text: "look at this https://www.kinopoisk.ru/film/301/ tonight".to_string(),
            })
            .await
            .unwrap();
        match dispatch {
            Dispatch::Executed(Outcome::Recorded(Recorded::Proposal(p))) => {
                assert_eq!(p.catalog_ref.as_str(), "301");
                assert_eq!(p.title, "Film 301");
            }
            other => panic!("unexpected dispatch {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_flow_needs_admin_and_confirmation() {
        let ingestor = ingestor();
        let session_id = open(&ingestor).await;

        let err = ingestor
            .handle(InboundEvent::BeginFlow {
                scope: SCOPE,
                user: 2,
                flow: FlowKind::CancelSession,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ClubError::Forbidden(_)));

        let begin = InboundEvent::BeginFlow {
            scope: SCOPE,
            user: ADMIN,
            flow: FlowKind::CancelSession,
        };
        ingestor.handle(begin.clone()).await.unwrap();
        let dismissed = ingestor
            .handle(InboundEvent::FlowReply {
                scope: SCOPE,
                user: ADMIN,
                text: "no".to_string(),
            })
            .await
            .unwrap();
        assert!(matches!(dismissed, Dispatch::Ignored(_)));

        ingestor.handle(begin).await.unwrap();
        let confirmed = ingestor
            .handle(InboundEvent::FlowReply {
                scope: SCOPE,
                user: ADMIN,
                text: "Да".to_string(),
            })
            .await
            .unwrap();
        match confirmed {
            Dispatch::Executed(Outcome::Advanced(advanced)) => {
                assert_eq!(advanced.session.id, session_id);
                assert_eq!(advanced.to, SessionStatus::Completed);
                assert!(advanced.session.aborted);
            }
            other => panic!("unexpected dispatch {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expired_flow_reply_is_ignored() {
        let ingestor = ingestor_with(FlowRegistry::new(Duration::ZERO), 0);
        open(&ingestor).await;
        ingestor
            .handle(InboundEvent::BeginFlow {
                scope: SCOPE,
                user: 2,
                flow: FlowKind::Propose,
            })
            .await
            .unwrap();

        let dispatch = ingestor
            .handle(InboundEvent::FlowReply {
                scope: SCOPE,
                user: 2,
                text: "301".to_string(),
            })
            .await
            .unwrap();
        assert!(matches!(dispatch, Dispatch::Ignored(_)));
    }

    #[test]
    fn test_inbound_events_parse_from_json() {
        let event: InboundEvent = serde_json::from_str(
            r#"{"event":"rate","scope":{"chat_id":-100},"user":5,"score":9}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            InboundEvent::Rate {
                scope: SCOPE,
                user: 5,
                proposal_id: None,
                score: 9,
            }
        );
        assert_eq!(event.origin(), Some((SCOPE, 5)));
    }
}
