use crate::application::store::{ClubStore, ClubTx};
use crate::application::tally;
use crate::domain::{
    check_slot, Actor, AdvancePayload, Aggregate, ChatScope, ImportedRating, Intent, NewProposal,
    Outcome, Proposal, Rating, Recorded, Score, Session, SessionAdvanced, SessionStatus, Trigger,
    UserId, Vote, WatchedImport, DEFAULT_SLOT, PROPOSAL_SLOTS,
};
use chrono::{DateTime, Duration, Utc};
use movieclub_errors::{ClubError, ClubResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const MIN_PROPOSALS_FOR_VOTING: usize = 2;

/// Owns session status. Every status write goes through [`SessionMachine::transition`]
/// or [`SessionMachine::create_session`], each inside one store transaction.
pub struct SessionMachine {
    store: Arc<dyn ClubStore>,
    events: broadcast::Sender<SessionAdvanced>,
    rating_window: Option<Duration>,
}

impl SessionMachine {
    pub fn new(store: Arc<dyn ClubStore>, rating_window: Option<Duration>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            events,
            rating_window,
        }
    }

    /// Outcome stream for the presentation layer. Only committed changes are published.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionAdvanced> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn ClubStore> {
        &self.store
    }

    pub async fn execute(&self, intent: Intent) -> ClubResult<Outcome> {
        match intent {
            Intent::CreateSession { scope, actor } => {
                self.create_session(scope, actor).await.map(Outcome::Advanced)
            }
            Intent::Propose {
                session_id,
                proposer,
                catalog_ref,
                catalog_url,
                title,
                slot,
            } => {
                let new = NewProposal {
                    session_id,
                    catalog_ref,
                    catalog_url,
                    title,
                    proposed_by: proposer,
                    slot,
                };
                let recorded = match self.record_proposal(new).await? {
                    (proposal, Some(replaced)) => Recorded::ProposalReplaced { replaced, proposal },
                    (proposal, None) => Recorded::Proposal(proposal),
                };
                Ok(Outcome::Recorded(recorded))
            }
            Intent::StartVoting { session_id, actor } => self
                .transition(session_id, Trigger::StartVoting, actor)
                .await
                .map(Outcome::Advanced),
            Intent::CastVote {
                session_id,
                user,
                proposal_id,
            } => self
                .record_vote(session_id, user, proposal_id)
                .await
                .map(|v| Outcome::Recorded(Recorded::Vote(v))),
            Intent::RetractVote { session_id, user } => {
                self.retract_vote(session_id, user).await?;
                Ok(Outcome::Recorded(Recorded::VoteRetracted {
                    session_id,
                    user_id: user,
                }))
            }
            Intent::CloseVoting {
                session_id,
                actor,
                forced,
            } => self
                .transition(session_id, Trigger::CloseVoting { forced }, actor)
                .await
                .map(Outcome::Advanced),
            Intent::CastRating {
                proposal_id,
                user,
                score,
            } => {
                let (rating, aggregate) = self.record_rating(proposal_id, user, score).await?;
                Ok(Outcome::Recorded(Recorded::Rating { rating, aggregate }))
            }
            Intent::CloseRating {
                session_id,
                actor,
                forced,
            } => self
                .transition(session_id, Trigger::CloseRating { forced }, actor)
                .await
                .map(Outcome::Advanced),
            Intent::CancelSession { session_id, actor } => self
                .transition(session_id, Trigger::Cancel, actor)
                .await
                .map(Outcome::Advanced),
            Intent::ImportWatched { import, actor } => {
                self.import_watched(import, actor).await.map(Outcome::Advanced)
            }
            Intent::ImportRatings {
                proposal_id,
                ratings,
                actor,
            } => {
                let imported = u32::try_from(ratings.len()).unwrap_or(u32::MAX);
                let aggregate = self.import_ratings(proposal_id, &ratings, actor).await?;
                Ok(Outcome::Recorded(Recorded::RatingsImported {
                    proposal_id,
                    imported,
                    aggregate,
                }))
            }
        }
    }

    pub async fn create_session(
        &self,
        scope: ChatScope,
        actor: Actor,
    ) -> ClubResult<SessionAdvanced> {
        let Some(created_by) = actor.user_id() else {
            return Err(ClubError::Forbidden(
                "sessions are opened by club members".to_string(),
            ));
        };

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let group = tx.upsert_group(&scope, now).await?;

        if let Some(active) = tx.lock_active_session(group.id).await? {
            return Err(ClubError::GuardUnmet(format!(
                "{scope} already has session {} in {}",
                active.id, active.status
            )));
        }

        let session = Session::new(group.id, created_by, now);
        tx.insert_session(&session).await?;
        tx.commit().await?;

        tracing::info!(session_id = %session.id, %scope, user_id = created_by, "Session opened");

        Ok(self.publish(SessionAdvanced {
            session,
            from: None,
            to: SessionStatus::Collecting,
            payload: AdvancePayload::Opened,
        }))
    }

    /// Add a movie to a collecting session.
    ///
    /// A member holds at most one proposal per slot. Proposing into a slot the
    /// member already fills replaces the earlier movie, which keeps its ballot
    /// position. Returns the new proposal and the one it replaced.
    pub async fn record_proposal(
        &self,
        new: NewProposal,
    ) -> ClubResult<(Proposal, Option<Proposal>)> {
        let title = new.title.trim().to_string();
        if title.is_empty() {
            return Err(ClubError::Validation("proposal title is empty".to_string()));
        }
        let requested_slot = new.slot.map(check_slot).transpose()?;

        let mut tx = self.store.begin().await?;
        let session = tx.lock_session(new.session_id).await?;
        expect_phase(&session, SessionStatus::Collecting, "propose a movie")?;

        let existing = tx.proposals(session.id).await?;
        let own: Vec<&Proposal> = existing
            .iter()
            .filter(|p| p.proposed_by == new.proposed_by)
            .collect();
        let slot = match requested_slot {
            Some(slot) => slot,
            None => (DEFAULT_SLOT..=PROPOSAL_SLOTS)
                .find(|slot| own.iter().all(|p| p.slot != *slot))
                .ok_or_else(|| {
                    ClubError::GuardUnmet(format!(
                        "all {PROPOSAL_SLOTS} slots are taken, pick one to replace"
                    ))
                })?,
        };
        let replaced = own.iter().find(|p| p.slot == slot).map(|p| (*p).clone());
        let replaced_id = replaced.as_ref().map(|p| p.id);

        if existing
            .iter()
            .any(|p| p.catalog_ref == new.catalog_ref && Some(p.id) != replaced_id)
        {
            return Err(ClubError::DuplicateProposal(new.catalog_ref.to_string()));
        }

        let ordinal = match &replaced {
            Some(old) => {
                tx.delete_proposal(old.id).await?;
                old.ordinal
            }
            None => existing.iter().map(|p| p.ordinal).max().unwrap_or(0) + 1,
        };

        let proposal = Proposal::from_new(NewProposal { title, ..new }, slot, ordinal, Utc::now());
        tx.insert_proposal(&proposal).await?;
        tx.commit().await?;

        tracing::debug!(
            session_id = %proposal.session_id,
            catalog_ref = %proposal.catalog_ref,
            slot,
            ordinal,
            replaced = ?replaced_id,
            "Proposal recorded"
        );
        Ok((proposal, replaced))
    }

    pub async fn record_vote(
        &self,
        session_id: Uuid,
        user: UserId,
        proposal_id: Uuid,
    ) -> ClubResult<Vote> {
        let mut tx = self.store.begin().await?;
        let session = tx.lock_session(session_id).await?;
        expect_phase(&session, SessionStatus::Voting, "cast a vote")?;

        match tx.find_proposal(proposal_id).await? {
            Some(p) if p.session_id == session_id => {}
            _ => {
                return Err(ClubError::NotFound(format!(
                    "proposal {proposal_id} in session {session_id}"
                )))
            }
        }

        let vote = Vote::new(session_id, user, proposal_id, Utc::now());
        tx.upsert_vote(&vote).await?;
        tx.commit().await?;

        tracing::debug!(%session_id, user_id = user, %proposal_id, "Vote recorded");
        Ok(vote)
    }

    /// Withdraw a live vote. Returns whether there was one to withdraw.
    pub async fn retract_vote(&self, session_id: Uuid, user: UserId) -> ClubResult<bool> {
        let mut tx = self.store.begin().await?;
        let session = tx.lock_session(session_id).await?;
        expect_phase(&session, SessionStatus::Voting, "retract a vote")?;

        let removed = tx.delete_vote(session_id, user).await?;
        tx.commit().await?;

        tracing::debug!(%session_id, user_id = user, removed, "Vote retracted");
        Ok(removed)
    }

    /// Upsert a rating for the session winner and refresh its cached aggregate.
    pub async fn record_rating(
        &self,
        proposal_id: Uuid,
        user: UserId,
        score: Score,
    ) -> ClubResult<(Rating, Aggregate)> {
        let mut tx = self.store.begin().await?;
        let proposal = tx
            .find_proposal(proposal_id)
            .await?
            .ok_or_else(|| ClubError::NotFound(format!("proposal {proposal_id}")))?;
        let session = tx.lock_session(proposal.session_id).await?;
        expect_phase(&session, SessionStatus::Rating, "rate a movie")?;

        if session.winner_proposal_id != Some(proposal_id) {
            return Err(ClubError::NotFound(format!(
                "proposal {proposal_id} is not the winner of session {}",
                session.id
            )));
        }

        let rating = Rating {
            proposal_id,
            session_id: session.id,
            user_id: user,
            score,
            rated_at: Utc::now(),
        };
        tx.upsert_rating(&rating).await?;

        let aggregate = tally::recompute_aggregate(&tx.ratings(proposal_id).await?);
        tx.store_aggregate(proposal_id, &aggregate).await?;
        tx.commit().await?;

        tracing::debug!(
            %proposal_id,
            user_id = user,
            score = score.value(),
            mean = ?aggregate.mean,
            count = aggregate.count,
            "Rating recorded"
        );
        Ok((rating, aggregate))
    }

    /// Fire `trigger` on a session.
    ///
    /// Status is checked first, so a caller that lost a race sees
    /// `InvalidTransition` and nothing is written.
    pub async fn transition(
        &self,
        session_id: Uuid,
        trigger: Trigger,
        actor: Actor,
    ) -> ClubResult<SessionAdvanced> {
        let mut tx = self.store.begin().await?;
        let session = tx.lock_session(session_id).await?;
        let from = session.status;

        let Some(to) = trigger.target(from) else {
            return Err(ClubError::invalid_transition(trigger.as_str(), from.as_str()));
        };
        authorize(trigger, actor)?;

        let now = Utc::now();
        let (next, payload) = match trigger {
            Trigger::StartVoting => {
                let proposals = tx.proposals(session_id).await?;
                if proposals.len() < MIN_PROPOSALS_FOR_VOTING {
                    return Err(ClubError::GuardUnmet(format!(
                        "voting needs at least {MIN_PROPOSALS_FOR_VOTING} proposals, have {}",
                        proposals.len()
                    )));
                }
                (
                    session.advanced(to, now),
                    AdvancePayload::BallotOpened { proposals },
                )
            }
            Trigger::CloseVoting { forced } => {
                let votes = tx.votes(session_id).await?;
                if votes.is_empty() && !forced {
                    return Err(ClubError::GuardUnmet(
                        "no votes have been cast yet".to_string(),
                    ));
                }
                let proposals = tx.proposals(session_id).await?;
                let result = tally::determine_winner(&votes, &proposals);

                let mut next = session.advanced(to, now).with_rating_window(self.rating_window);
                next.winner_proposal_id = result.winner;
                (next, AdvancePayload::Winner(result))
            }
            Trigger::CloseRating { forced } => {
                let aggregate = self
                    .close_rating_guard(&mut *tx, &session, forced, actor, now)
                    .await?;
                if let Some(winner) = session.winner_proposal_id {
                    tx.store_aggregate(winner, &aggregate).await?;
                }
                (
                    session.advanced(to, now),
                    AdvancePayload::Final {
                        winner: session.winner_proposal_id,
                        aggregate,
                    },
                )
            }
            Trigger::Cancel => {
                let mut next = session.advanced(to, now);
                next.aborted = true;
                (next, AdvancePayload::Aborted)
            }
        };

        if !tx.save_session_if(from, &next).await? {
            let actual = tx.lock_session(session_id).await?.status;
            return Err(ClubError::invalid_transition(trigger.as_str(), actual.as_str()));
        }
        tx.commit().await?;

        tracing::info!(
            %session_id,
            from = %from,
            to = %to,
            trigger = trigger.as_str(),
            actor = ?actor,
            "Session advanced"
        );

        Ok(self.publish(SessionAdvanced {
            session: next,
            from: Some(from),
            to,
            payload,
        }))
    }

    /// Close-rating passes with a rating on the winner, an admin override, or
    /// an elapsed deadline. Returns the final aggregate snapshot.
    async fn close_rating_guard(
        &self,
        tx: &mut dyn ClubTx,
        session: &Session,
        forced: bool,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> ClubResult<Aggregate> {
        let aggregate = match session.winner_proposal_id {
            Some(winner) => tally::recompute_aggregate(&tx.ratings(winner).await?),
            None => Aggregate::EMPTY,
        };

        let deadline_elapsed = session.deadline_elapsed(now);
        let passed = match actor {
            Actor::Deadline => deadline_elapsed,
            _ => aggregate.is_rated() || forced || deadline_elapsed,
        };
        if !passed {
            let reason = match actor {
                Actor::Deadline => "rating deadline has not elapsed".to_string(),
                _ => "no ratings have been cast yet".to_string(),
            };
            return Err(ClubError::GuardUnmet(reason));
        }
        Ok(aggregate)
    }

    /// Record a movie watched before the club kept records here. The group
    /// gets a completed session whose winner is the movie, rated as given.
    pub async fn import_watched(
        &self,
        import: WatchedImport,
        actor: Actor,
    ) -> ClubResult<SessionAdvanced> {
        let admin = require_admin(actor, "import a watched movie")?;
        let title = import.title.trim().to_string();
        if title.is_empty() {
            return Err(ClubError::Validation("movie title is empty".to_string()));
        }
        if import.watched_at > Utc::now() {
            return Err(ClubError::Validation("watch date is in the future".to_string()));
        }
        let watched_at = import.watched_at;

        let mut tx = self.store.begin().await?;
        let group = tx.upsert_group(&import.scope, Utc::now()).await?;

        let mut session = Session::new(group.id, admin, watched_at);
        let proposal = Proposal::from_new(
            NewProposal {
                session_id: session.id,
                catalog_ref: import.catalog_ref,
                catalog_url: import.catalog_url,
                title,
                proposed_by: import.proposed_by.unwrap_or(admin),
                slot: None,
            },
            DEFAULT_SLOT,
            1,
            watched_at,
        );
        session = session
            .advanced(SessionStatus::Voting, watched_at)
            .advanced(SessionStatus::Rating, watched_at)
            .advanced(SessionStatus::Completed, watched_at);
        session.winner_proposal_id = Some(proposal.id);

        tx.insert_session(&session).await?;
        tx.insert_proposal(&proposal).await?;
        let aggregate =
            write_ratings(&mut *tx, &proposal, &import.ratings, watched_at).await?;
        tx.commit().await?;

        tracing::info!(
            session_id = %session.id,
            scope = %import.scope,
            catalog_ref = %proposal.catalog_ref,
            ratings = aggregate.count,
            user_id = admin,
            "Watched movie imported"
        );

        Ok(self.publish(SessionAdvanced {
            session,
            from: None,
            to: SessionStatus::Completed,
            payload: AdvancePayload::Final {
                winner: Some(proposal.id),
                aggregate,
            },
        }))
    }

    /// Add ratings collected outside the chat to the winner of a finished
    /// session. A user already rated gets the imported score.
    pub async fn import_ratings(
        &self,
        proposal_id: Uuid,
        ratings: &[ImportedRating],
        actor: Actor,
    ) -> ClubResult<Aggregate> {
        require_admin(actor, "import ratings")?;
        if ratings.is_empty() {
            return Err(ClubError::Validation("no ratings to import".to_string()));
        }

        let mut tx = self.store.begin().await?;
        let proposal = tx
            .find_proposal(proposal_id)
            .await?
            .ok_or_else(|| ClubError::NotFound(format!("proposal {proposal_id}")))?;
        let session = tx.lock_session(proposal.session_id).await?;
        expect_phase(&session, SessionStatus::Completed, "import ratings")?;
        if session.aborted || session.winner_proposal_id != Some(proposal_id) {
            return Err(ClubError::NotFound(format!(
                "proposal {proposal_id} is not a watched movie"
            )));
        }

        let aggregate = write_ratings(&mut *tx, &proposal, ratings, Utc::now()).await?;
        tx.commit().await?;

        tracing::info!(%proposal_id, imported = ratings.len(), "Ratings imported");
        Ok(aggregate)
    }

    fn publish(&self, advanced: SessionAdvanced) -> SessionAdvanced {
        // No subscribers is fine; the caller still gets the outcome.
        let _ = self.events.send(advanced.clone());
        advanced
    }
}

fn expect_phase(session: &Session, expected: SessionStatus, operation: &str) -> ClubResult<()> {
    if session.status == expected {
        Ok(())
    } else {
        Err(ClubError::phase_mismatch(
            operation,
            expected.as_str(),
            session.status.as_str(),
        ))
    }
}

fn require_admin(actor: Actor, operation: &str) -> ClubResult<UserId> {
    match actor {
        Actor::Admin(id) => Ok(id),
        _ => Err(ClubError::Forbidden(format!("only an admin can {operation}"))),
    }
}

/// Upsert a batch of ratings for `proposal` and store the refreshed aggregate.
/// A user listed twice keeps the later score.
async fn write_ratings(
    tx: &mut dyn ClubTx,
    proposal: &Proposal,
    ratings: &[ImportedRating],
    rated_at: DateTime<Utc>,
) -> ClubResult<Aggregate> {
    let latest: HashMap<UserId, Score> = ratings.iter().map(|r| (r.user, r.score)).collect();
    for (user_id, score) in latest {
        tx.upsert_rating(&Rating {
            proposal_id: proposal.id,
            session_id: proposal.session_id,
            user_id,
            score,
            rated_at,
        })
        .await?;
    }

    let aggregate = tally::recompute_aggregate(&tx.ratings(proposal.id).await?);
    tx.store_aggregate(proposal.id, &aggregate).await?;
    Ok(aggregate)
}

fn authorize(trigger: Trigger, actor: Actor) -> ClubResult<()> {
    match (trigger, actor) {
        (Trigger::Cancel, actor) if !actor.is_admin() => Err(ClubError::Forbidden(
            "only an admin can cancel a session".to_string(),
        )),
        (trigger, actor) if trigger.is_forced() && !actor.is_admin() => Err(ClubError::Forbidden(
            format!("only an admin can force {}", trigger.as_str()),
        )),
        (Trigger::CloseRating { .. }, Actor::Deadline) => Ok(()),
        (_, Actor::Deadline) => Err(ClubError::Forbidden(format!(
            "the deadline cannot {}",
            trigger.as_str()
        ))),
        _ => Ok(()),
    }
}
