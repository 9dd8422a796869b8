use crate::domain::Vote;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "votes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub session_id: Uuid,
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i64,
    pub proposal_id: Uuid,
    pub cast_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::club_session::Entity",
        from = "Column::SessionId",
        to = "super::club_session::Column::Id",
        on_delete = "Cascade"
    )]
    Session,
    #[sea_orm(
        belongs_to = "super::proposal::Entity",
        from = "Column::ProposalId",
        to = "super::proposal::Column::Id",
        on_delete = "Cascade"
    )]
    Proposal,
}

impl Related<super::club_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl Related<super::proposal::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Proposal.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for Vote {
    fn from(model: Model) -> Self {
        Vote::new(model.session_id, model.user_id, model.proposal_id, model.cast_at)
    }
}

impl From<&Vote> for ActiveModel {
    fn from(vote: &Vote) -> Self {
        Self {
            session_id: Set(vote.session_id),
            user_id: Set(vote.user_id),
            proposal_id: Set(vote.proposal_id),
            cast_at: Set(vote.cast_at),
        }
    }
}
