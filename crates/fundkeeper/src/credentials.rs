use std::sync::Arc;

use entity::{member, secret_token::TokenKind};
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    TransactionTrait,
};
use tracing::info;

use crate::clock::Clock;
use crate::crypto::{hash_password_blocking, validate_password};
use crate::db;
use crate::error::{Error, Result};
use crate::tokens::{lock_active, mark_consumed, supersede};

/// Consumes a password-reset token and rewrites the member's credential as one
/// atomic unit. Either both happen or neither does.
#[derive(Clone)]
pub struct CredentialTransaction {
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
    hash_iterations: u32,
}

impl CredentialTransaction {
    pub fn new(db: DatabaseConnection, clock: Arc<dyn Clock>, hash_iterations: u32) -> Self {
        Self {
            db,
            clock,
            hash_iterations,
        }
    }

    /// Returns the id of the member whose password changed.
    pub async fn reset_password(&self, plaintext_token: &str, new_password: &str) -> Result<i32> {
        validate_password(new_password)?;

        let now = self.clock.now();
        let txn = self.db.begin().await?;
        let outcome = self.reset_in(&txn, plaintext_token, new_password, now).await;
        let member_id = db::finish(txn, outcome).await?;

        info!(member_id, "Password reset completed");
        Ok(member_id)
    }

    async fn reset_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        plaintext_token: &str,
        new_password: &str,
        now: i64,
    ) -> Result<i32> {
        let token = lock_active(conn, plaintext_token, TokenKind::PasswordReset, now).await?;

        let credential = hash_password_blocking(new_password, self.hash_iterations).await?;

        let res = member::Entity::update_many()
            .col_expr(member::Column::PasswordHash, Expr::value(credential))
            .filter(member::Column::Id.eq(token.member_id))
            .exec(conn)
            .await?;
        if res.rows_affected != 1 {
            return Err(Error::not_found(format!("member {}", token.member_id)));
        }

        mark_consumed(conn, token.id, now).await?;
        // Any other reset link the member still holds dies with this one.
        supersede(conn, token.member_id, TokenKind::PasswordReset, now).await?;

        Ok(token.member_id)
    }
}
