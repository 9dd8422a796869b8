use crate::domain::Session;
use movieclub_errors::ClubError;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "club_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub group_id: Uuid,
    pub status: String,
    pub created_by: i64,
    pub created_at: DateTimeUtc,
    pub voting_started_at: Option<DateTimeUtc>,
    pub voting_closed_at: Option<DateTimeUtc>,
    pub completed_at: Option<DateTimeUtc>,
    pub aborted: bool,
    pub winner_proposal_id: Option<Uuid>,
    pub rating_deadline: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::club_group::Entity",
        from = "Column::GroupId",
        to = "super::club_group::Column::Id",
        on_delete = "Cascade"
    )]
    Group,
    #[sea_orm(has_many = "super::proposal::Entity")]
    Proposals,
}

impl Related<super::club_group::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Group.def()
    }
}

impl Related<super::proposal::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Proposals.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Session {
    type Error = ClubError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            group_id: model.group_id,
            status: model.status.parse()?,
            created_by: model.created_by,
            created_at: model.created_at,
            voting_started_at: model.voting_started_at,
            voting_closed_at: model.voting_closed_at,
            completed_at: model.completed_at,
            aborted: model.aborted,
            winner_proposal_id: model.winner_proposal_id,
            rating_deadline: model.rating_deadline,
        })
    }
}

impl From<&Session> for ActiveModel {
    fn from(session: &Session) -> Self {
        Self {
            id: Set(session.id),
            group_id: Set(session.group_id),
            status: Set(session.status.as_str().to_string()),
            created_by: Set(session.created_by),
            created_at: Set(session.created_at),
            voting_started_at: Set(session.voting_started_at),
            voting_closed_at: Set(session.voting_closed_at),
            completed_at: Set(session.completed_at),
            aborted: Set(session.aborted),
            winner_proposal_id: Set(session.winner_proposal_id),
            rating_deadline: Set(session.rating_deadline),
        }
    }
}
