use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A registered member of the fund.
///
/// Verification fields are only ever changed through secret-token transitions;
/// `password_hash` only through registration and the password-reset transaction.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "members")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub name: String,

    /// Lower-cased contact address. Members registered by phone only have none.
    #[sea_orm(unique)]
    pub email: Option<String>,

    pub phone: Option<String>,

    /// PBKDF2 credential string, never the plaintext.
    #[serde(skip_serializing)]
    pub password_hash: String,

    pub is_admin: bool,

    pub email_verified: bool,

    /// Unix timestamp (seconds).
    pub email_verified_at: Option<i64>,

    /// Unix timestamp (seconds).
    pub joined_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::contribution::Entity")]
    Contribution,
    #[sea_orm(has_many = "super::secret_token::Entity")]
    SecretToken,
}

impl Related<super::contribution::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Contribution.def()
    }
}

impl Related<super::secret_token::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SecretToken.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
