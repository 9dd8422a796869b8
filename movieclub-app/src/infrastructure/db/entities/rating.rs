use crate::domain::{Rating, Score};
use movieclub_errors::ClubError;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ratings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub proposal_id: Uuid,
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i64,
    pub session_id: Uuid,
    pub score: i16,
    pub rated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::proposal::Entity",
        from = "Column::ProposalId",
        to = "super::proposal::Column::Id",
        on_delete = "Cascade"
    )]
    Proposal,
}

impl Related<super::proposal::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Proposal.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Rating {
    type Error = ClubError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let score = u8::try_from(model.score)
            .map_err(|_| ClubError::Internal(format!("stored score {} out of range", model.score)))?;
        Ok(Self {
            proposal_id: model.proposal_id,
            session_id: model.session_id,
            user_id: model.user_id,
            score: Score::new(score)?,
            rated_at: model.rated_at,
        })
    }
}

impl From<&Rating> for ActiveModel {
    fn from(rating: &Rating) -> Self {
        Self {
            proposal_id: Set(rating.proposal_id),
            user_id: Set(rating.user_id),
            session_id: Set(rating.session_id),
            score: Set(i16::from(rating.score.value())),
            rated_at: Set(rating.rated_at),
        }
    }
}
