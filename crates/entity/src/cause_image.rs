use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Image attached to a cause (bytes live in the object store).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cause_images")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub cause_id: i32,

    #[sea_orm(column_type = "Text")]
    pub url: String,

    /// Unix timestamp (seconds).
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::cause::Entity",
        from = "Column::CauseId",
        to = "super::cause::Column::Id",
        on_delete = "Cascade"
    )]
    Cause,
}

impl Related<super::cause::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cause.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
