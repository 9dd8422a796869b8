use super::entities::{
    club_group, club_session, proposal, rating, vote, ClubGroup, ClubSession, ProposalEntity,
    RatingEntity, VoteEntity,
};
use super::map_db_err;
use crate::application::{ClubStore, ClubTx};
use crate::domain::{
    Aggregate, ChatScope, ClubStats, Group, LeaderboardEntry, Proposal, Rating, Session,
    SessionStatus, UserId, Vote,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use movieclub_errors::{ClubError, ClubResult};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    entity::*, query::*, Condition, DatabaseConnection, DatabaseTransaction, DbErr,
    PaginatorTrait, SqlErr, TransactionTrait,
};
use std::collections::HashMap;
use uuid::Uuid;

const COMPLETED: &str = "completed";

fn scope_filter(scope: &ChatScope) -> Condition {
    let topic = match scope.topic_id {
        Some(topic) => club_group::Column::TopicId.eq(topic),
        None => club_group::Column::TopicId.is_null(),
    };
    Condition::all()
        .add(club_group::Column::ChatId.eq(scope.chat_id))
        .add(topic)
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn sessions(models: Vec<club_session::Model>) -> ClubResult<Vec<Session>> {
    models.into_iter().map(Session::try_from).collect()
}

fn proposals(models: Vec<proposal::Model>) -> ClubResult<Vec<Proposal>> {
    models.into_iter().map(Proposal::try_from).collect()
}

pub struct PgClubStore {
    db: DatabaseConnection,
}

impl PgClubStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn group_session_ids(&self, group_id: Uuid) -> ClubResult<Vec<Uuid>> {
        ClubSession::find()
            .select_only()
            .column(club_session::Column::Id)
            .filter(club_session::Column::GroupId.eq(group_id))
            .into_tuple::<Uuid>()
            .all(&self.db)
            .await
            .map_err(map_db_err)
    }
}

#[async_trait]
impl ClubStore for PgClubStore {
    async fn begin(&self) -> ClubResult<Box<dyn ClubTx>> {
        let txn = self.db.begin().await.map_err(map_db_err)?;
        Ok(Box::new(PgClubTx { txn }))
    }

    async fn find_group(&self, scope: &ChatScope) -> ClubResult<Option<Group>> {
        let model = ClubGroup::find()
            .filter(scope_filter(scope))
            .one(&self.db)
            .await
            .map_err(map_db_err)?;
        Ok(model.map(Group::from))
    }

    async fn find_session(&self, id: Uuid) -> ClubResult<Option<Session>> {
        ClubSession::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(map_db_err)?
            .map(Session::try_from)
            .transpose()
    }

    async fn active_session(&self, group_id: Uuid) -> ClubResult<Option<Session>> {
        ClubSession::find()
            .filter(club_session::Column::GroupId.eq(group_id))
            .filter(club_session::Column::Status.ne(COMPLETED))
            .one(&self.db)
            .await
            .map_err(map_db_err)?
            .map(Session::try_from)
            .transpose()
    }

    async fn list_proposals(&self, session_id: Uuid) -> ClubResult<Vec<Proposal>> {
        let models = ProposalEntity::find()
            .filter(proposal::Column::SessionId.eq(session_id))
            .order_by_asc(proposal::Column::Ordinal)
            .all(&self.db)
            .await
            .map_err(map_db_err)?;
        proposals(models)
    }

    async fn find_proposal(&self, id: Uuid) -> ClubResult<Option<Proposal>> {
        ProposalEntity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(map_db_err)?
            .map(Proposal::try_from)
            .transpose()
    }

    async fn leaderboard_entries(
        &self,
        group_id: Option<Uuid>,
    ) -> ClubResult<Vec<LeaderboardEntry>> {
        let mut query = ClubSession::find()
            .filter(club_session::Column::Status.eq(COMPLETED))
            .filter(club_session::Column::Aborted.eq(false))
            .filter(club_session::Column::WinnerProposalId.is_not_null());
        if let Some(group_id) = group_id {
            query = query.filter(club_session::Column::GroupId.eq(group_id));
        }
        let finished = query.all(&self.db).await.map_err(map_db_err)?;
        if finished.is_empty() {
            return Ok(Vec::new());
        }

        let by_winner: HashMap<Uuid, &club_session::Model> = finished
            .iter()
            .filter_map(|s| s.winner_proposal_id.map(|w| (w, s)))
            .collect();
        let winners = ProposalEntity::find()
            .filter(proposal::Column::Id.is_in(by_winner.keys().copied()))
            .all(&self.db)
            .await
            .map_err(map_db_err)?;

        let entries = winners
            .into_iter()
            .filter_map(|model| {
                let session = by_winner.get(&model.id)?;
                Some(LeaderboardEntry {
                    proposal_id: model.id,
                    session_id: session.id,
                    group_id: session.group_id,
                    title: model.title,
                    catalog_ref: model.catalog_ref,
                    proposed_by: model.proposed_by,
                    aggregate: Aggregate {
                        mean: model.club_rating,
                        count: u32::try_from(model.rating_count).unwrap_or(0),
                    },
                })
            })
            .collect();
        Ok(entries)
    }

    async fn stats(&self, group_id: Uuid) -> ClubResult<ClubStats> {
        let finished = ClubSession::find()
            .filter(club_session::Column::GroupId.eq(group_id))
            .filter(club_session::Column::Status.eq(COMPLETED))
            .filter(club_session::Column::Aborted.eq(false));

        let completed_sessions = finished.clone().count(&self.db).await.map_err(map_db_err)?;
        let movies_watched = finished
            .filter(club_session::Column::WinnerProposalId.is_not_null())
            .count(&self.db)
            .await
            .map_err(map_db_err)?;

        let session_ids = self.group_session_ids(group_id).await?;
        if session_ids.is_empty() {
            return Ok(ClubStats {
                completed_sessions,
                movies_watched,
                ..ClubStats::default()
            });
        }

        let proposers = ProposalEntity::find()
            .select_only()
            .column(proposal::Column::ProposedBy)
            .distinct()
            .filter(proposal::Column::SessionId.is_in(session_ids.clone()))
            .into_tuple::<i64>()
            .all(&self.db)
            .await
            .map_err(map_db_err)?;
        let ratings = RatingEntity::find()
            .filter(rating::Column::SessionId.is_in(session_ids))
            .count(&self.db)
            .await
            .map_err(map_db_err)?;

        Ok(ClubStats {
            completed_sessions,
            movies_watched,
            participants: proposers.len() as u64,
            ratings,
        })
    }

    async fn overdue_sessions(&self, now: DateTime<Utc>) -> ClubResult<Vec<Session>> {
        let models = ClubSession::find()
            .filter(club_session::Column::Status.eq(SessionStatus::Rating.as_str()))
            .filter(club_session::Column::RatingDeadline.lte(now))
            .all(&self.db)
            .await
            .map_err(map_db_err)?;
        sessions(models)
    }
}

/// One Postgres transaction. Dropping it without `commit` rolls back.
struct PgClubTx {
    txn: DatabaseTransaction,
}

#[async_trait]
impl ClubTx for PgClubTx {
    async fn upsert_group(&mut self, scope: &ChatScope, now: DateTime<Utc>) -> ClubResult<Group> {
        let group = Group::new(*scope, now);
        let active = club_group::ActiveModel {
            id: Set(group.id),
            chat_id: Set(scope.chat_id),
            topic_id: Set(scope.topic_id),
            name: Set(None),
            created_at: Set(now),
        };
        ClubGroup::insert(active)
            .on_conflict(
                OnConflict::columns([club_group::Column::ChatId, club_group::Column::TopicId])
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.txn)
            .await
            .map_err(map_db_err)?;

        ClubGroup::find()
            .filter(scope_filter(scope))
            .one(&self.txn)
            .await
            .map_err(map_db_err)?
            .map(Group::from)
            .ok_or_else(|| ClubError::Internal(format!("group for {scope} vanished after upsert")))
    }

    async fn lock_active_session(&mut self, group_id: Uuid) -> ClubResult<Option<Session>> {
        ClubSession::find()
            .filter(club_session::Column::GroupId.eq(group_id))
            .filter(club_session::Column::Status.ne(COMPLETED))
            .lock_exclusive()
            .one(&self.txn)
            .await
            .map_err(map_db_err)?
            .map(Session::try_from)
            .transpose()
    }

    async fn insert_session(&mut self, session: &Session) -> ClubResult<()> {
        ClubSession::insert(club_session::ActiveModel::from(session))
            .exec_without_returning(&self.txn)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    ClubError::GuardUnmet("group already has an active session".to_string())
                } else {
                    map_db_err(err)
                }
            })?;
        Ok(())
    }

    async fn lock_session(&mut self, id: Uuid) -> ClubResult<Session> {
        let model = ClubSession::find_by_id(id)
            .lock_exclusive()
            .one(&self.txn)
            .await
            .map_err(map_db_err)?
            .ok_or_else(|| ClubError::NotFound(format!("session {id}")))?;
        Session::try_from(model)
    }

    async fn save_session_if(
        &mut self,
        expected: SessionStatus,
        session: &Session,
    ) -> ClubResult<bool> {
        let result = ClubSession::update_many()
            .set(club_session::ActiveModel::from(session))
            .filter(club_session::Column::Id.eq(session.id))
            .filter(club_session::Column::Status.eq(expected.as_str()))
            .exec(&self.txn)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected == 1)
    }

    async fn proposals(&mut self, session_id: Uuid) -> ClubResult<Vec<Proposal>> {
        let models = ProposalEntity::find()
            .filter(proposal::Column::SessionId.eq(session_id))
            .order_by_asc(proposal::Column::Ordinal)
            .all(&self.txn)
            .await
            .map_err(map_db_err)?;
        proposals(models)
    }

    async fn find_proposal(&mut self, id: Uuid) -> ClubResult<Option<Proposal>> {
        ProposalEntity::find_by_id(id)
            .one(&self.txn)
            .await
            .map_err(map_db_err)?
            .map(Proposal::try_from)
            .transpose()
    }

    async fn insert_proposal(&mut self, proposal: &Proposal) -> ClubResult<()> {
        ProposalEntity::insert(proposal::ActiveModel::from(proposal))
            .exec_without_returning(&self.txn)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    ClubError::DuplicateProposal(proposal.catalog_ref.to_string())
                } else {
                    map_db_err(err)
                }
            })?;
        Ok(())
    }

    async fn delete_proposal(&mut self, id: Uuid) -> ClubResult<()> {
        let result = ProposalEntity::delete_by_id(id)
            .exec(&self.txn)
            .await
            .map_err(map_db_err)?;
        if result.rows_affected == 0 {
            return Err(ClubError::NotFound(format!("proposal {id}")));
        }
        Ok(())
    }

    async fn upsert_vote(&mut self, vote: &Vote) -> ClubResult<()> {
        VoteEntity::insert(vote::ActiveModel::from(vote))
            .on_conflict(
                OnConflict::columns([vote::Column::SessionId, vote::Column::UserId])
                    .update_columns([vote::Column::ProposalId, vote::Column::CastAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.txn)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn delete_vote(&mut self, session_id: Uuid, user_id: UserId) -> ClubResult<bool> {
        let result = VoteEntity::delete_many()
            .filter(vote::Column::SessionId.eq(session_id))
            .filter(vote::Column::UserId.eq(user_id))
            .exec(&self.txn)
            .await
            .map_err(map_db_err)?;
        Ok(result.rows_affected > 0)
    }

    async fn votes(&mut self, session_id: Uuid) -> ClubResult<Vec<Vote>> {
        let models = VoteEntity::find()
            .filter(vote::Column::SessionId.eq(session_id))
            .all(&self.txn)
            .await
            .map_err(map_db_err)?;
        Ok(models.into_iter().map(Vote::from).collect())
    }

    async fn upsert_rating(&mut self, rating: &Rating) -> ClubResult<()> {
        RatingEntity::insert(rating::ActiveModel::from(rating))
            .on_conflict(
                OnConflict::columns([rating::Column::ProposalId, rating::Column::UserId])
                    .update_columns([rating::Column::Score, rating::Column::RatedAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.txn)
            .await
            .map_err(map_db_err)?;
        Ok(())
    }

    async fn ratings(&mut self, proposal_id: Uuid) -> ClubResult<Vec<Rating>> {
        let models = RatingEntity::find()
            .filter(rating::Column::ProposalId.eq(proposal_id))
            .all(&self.txn)
            .await
            .map_err(map_db_err)?;
        models.into_iter().map(Rating::try_from).collect()
    }

    async fn store_aggregate(
        &mut self,
        proposal_id: Uuid,
        aggregate: &Aggregate,
    ) -> ClubResult<()> {
        let count = i32::try_from(aggregate.count).unwrap_or(i32::MAX);
        let result = ProposalEntity::update_many()
            .col_expr(proposal::Column::ClubRating, Expr::value(aggregate.mean))
            .col_expr(proposal::Column::RatingCount, Expr::value(count))
            .filter(proposal::Column::Id.eq(proposal_id))
            .exec(&self.txn)
            .await
            .map_err(map_db_err)?;
        if result.rows_affected == 0 {
            return Err(ClubError::NotFound(format!("proposal {proposal_id}")));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> ClubResult<()> {
        self.txn.commit().await.map_err(map_db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::SessionMachine;
    use crate::domain::{Actor, Trigger};
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::sync::Arc;

    fn session_model(id: Uuid, status: &str) -> club_session::Model {
        club_session::Model {
            id,
            group_id: Uuid::new_v4(),
            status: status.to_string(),
            created_by: 42,
            created_at: Utc::now(),
            voting_started_at: None,
            voting_closed_at: None,
            completed_at: None,
            aborted: false,
            winner_proposal_id: None,
            rating_deadline: None,
        }
    }

    #[tokio::test]
    async fn test_find_session_maps_status_column() {
        let id = Uuid::new_v4();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![session_model(id, "voting")]])
            .into_connection();
        let store = PgClubStore::new(db);

        let session = store.find_session(id).await.unwrap().unwrap();

        assert_eq!(session.id, id);
        assert_eq!(session.status, SessionStatus::Voting);
        assert_eq!(session.created_by, 42);
    }

    #[tokio::test]
    async fn test_unknown_status_is_internal_error() {
        let id = Uuid::new_v4();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![session_model(id, "archived")]])
            .into_connection();
        let store = PgClubStore::new(db);

        let err = store.find_session(id).await.unwrap_err();
        assert!(matches!(err, ClubError::Internal(_)));
    }

    #[tokio::test]
    async fn test_cas_miss_reports_false() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();
        let store = PgClubStore::new(db);
        let session: Session = session_model(Uuid::new_v4(), "rating").try_into().unwrap();

        let mut tx = store.begin().await.unwrap();
        let saved = tx
            .save_session_if(SessionStatus::Voting, &session)
            .await
            .unwrap();
        assert!(!saved);
    }

    #[tokio::test]
    async fn test_lost_race_reports_the_winning_status() {
        let session_id = Uuid::new_v4();
        let proposal_model = |catalog_ref: &str, ordinal: i32| proposal::Model {
            id: Uuid::new_v4(),
            session_id,
            catalog_ref: catalog_ref.to_string(),
            catalog_url: None,
            title: format!("Movie {catalog_ref}"),
            proposed_by: 7,
            slot: ordinal as i16,
            ordinal,
            created_at: Utc::now(),
            club_rating: None,
            rating_count: 0,
        };
        let a = proposal_model("100", 1);
        let b = proposal_model("200", 2);
        let ballot = vote::Model {
            session_id,
            user_id: 2,
            proposal_id: a.id,
            cast_at: Utc::now(),
        };

        // Another worker moved the session to rating between our lock and the save.
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![session_model(session_id, "voting")]])
            .append_query_results([vec![ballot]])
            .append_query_results([vec![a, b]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .append_query_results([vec![session_model(session_id, "rating")]])
            .into_connection();
        let machine = SessionMachine::new(Arc::new(PgClubStore::new(db)), None);

        let err = machine
            .transition(
                session_id,
                Trigger::CloseVoting { forced: false },
                Actor::Member(2),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ClubError::invalid_transition("close voting", "rating"));
        assert!(err.is_already_handled());
    }

    #[tokio::test]
    async fn test_deleting_missing_proposal_is_not_found() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();
        let store = PgClubStore::new(db);

        let mut tx = store.begin().await.unwrap();
        let err = tx.delete_proposal(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ClubError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_leaderboard_joins_winner_rows() {
        let session_id = Uuid::new_v4();
        let winner_id = Uuid::new_v4();
        let mut finished = session_model(session_id, "completed");
        finished.winner_proposal_id = Some(winner_id);

        let winner = proposal::Model {
            id: winner_id,
            session_id,
            catalog_ref: "326".to_string(),
            catalog_url: Some("https://www.kinopoisk.ru/film/326/".to_string()),
            title: "The Shawshank Redemption".to_string(),
            proposed_by: 7,
            slot: 1,
            ordinal: 1,
            created_at: Utc::now(),
            club_rating: Some(9.25),
            rating_count: 4,
        };

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![finished.clone()]])
            .append_query_results([vec![winner]])
            .into_connection();
        let store = PgClubStore::new(db);

        let entries = store.leaderboard_entries(None).await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].session_id, session_id);
        assert_eq!(entries[0].group_id, finished.group_id);
        assert_eq!(entries[0].aggregate, Aggregate { mean: Some(9.25), count: 4 });
    }
}
