use crate::domain::{Aggregate, CatalogRef, Proposal};
use movieclub_errors::ClubError;
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "proposals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub session_id: Uuid,
    pub catalog_ref: String,
    pub catalog_url: Option<String>,
    pub title: String,
    pub proposed_by: i64,
    pub slot: i16,
    pub ordinal: i32,
    pub created_at: DateTimeUtc,
    #[sea_orm(column_type = "Double", nullable)]
    pub club_rating: Option<f64>,
    pub rating_count: i32,
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
    #[sea_orm(has_many = "super::rating::Entity")]
    Ratings,
}

impl Related<super::club_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
}

impl Related<super::rating::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Ratings.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl TryFrom<Model> for Proposal {
    type Error = ClubError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let slot = u8::try_from(model.slot)
            .map_err(|_| ClubError::Internal(format!("bad proposal slot {}", model.slot)))?;
        Ok(Self {
            id: model.id,
            session_id: model.session_id,
            catalog_ref: CatalogRef::new(model.catalog_ref)?,
            catalog_url: model.catalog_url,
            title: model.title,
            proposed_by: model.proposed_by,
            slot,
            ordinal: model.ordinal,
            created_at: model.created_at,
            aggregate: Aggregate {
                mean: model.club_rating,
                count: u32::try_from(model.rating_count).unwrap_or(0),
            },
        })
    }
}

impl From<&Proposal> for ActiveModel {
    fn from(proposal: &Proposal) -> Self {
        Self {
            id: Set(proposal.id),
            session_id: Set(proposal.session_id),
            catalog_ref: Set(proposal.catalog_ref.to_string()),
            catalog_url: Set(proposal.catalog_url.clone()),
            title: Set(proposal.title.clone()),
            proposed_by: Set(proposal.proposed_by),
            slot: Set(i16::from(proposal.slot)),
            ordinal: Set(proposal.ordinal),
            created_at: Set(proposal.created_at),
            club_rating: Set(proposal.aggregate.mean),
            rating_count: Set(i32::try_from(proposal.aggregate.count).unwrap_or(i32::MAX)),
        }
    }
}
