use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Purpose a secret token was issued for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum TokenKind {
    #[sea_orm(string_value = "email_verification")]
    EmailVerification,
    #[sea_orm(string_value = "password_reset")]
    PasswordReset,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::EmailVerification => "email_verification",
            TokenKind::PasswordReset => "password_reset",
        }
    }
}

/// Single-use secrets (email verification, password reset).
///
/// Only the SHA-256 hash of the secret is stored. Rows are never deleted when a
/// token is used or superseded; `consumed_at` is set instead so the table doubles
/// as an audit log.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "secret_tokens")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub member_id: i32,

    pub kind: TokenKind,

    /// Hex-encoded SHA-256 of the plaintext secret.
    #[sea_orm(unique)]
    pub token_hash: String,

    /// Unix timestamp (seconds).
    pub issued_at: i64,

    /// Unix timestamp (seconds).
    pub expires_at: i64,

    /// Unix timestamp (seconds). Set when used or superseded.
    pub consumed_at: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::member::Entity",
        from = "Column::MemberId",
        to = "super::member::Column::Id",
        on_delete = "Cascade"
    )]
    Member,
}

impl Related<super::member::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Member.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
