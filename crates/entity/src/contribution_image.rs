use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Proof image attached to a contribution (bytes live in the object store).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "contribution_images")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub contribution_id: i32,

    /// Public URL of the stored object.
    #[sea_orm(column_type = "Text")]
    pub url: String,

    /// Unix timestamp (seconds).
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::contribution::Entity",
        from = "Column::ContributionId",
        to = "super::contribution::Column::Id",
        on_delete = "Cascade"
    )]
    Contribution,
}

impl Related<super::contribution::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Contribution.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
