//! Single-use secret tokens: email verification and password reset.

use std::{fmt, sync::Arc, time::Duration};

use entity::{
    member,
    secret_token::{self, TokenKind},
};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QuerySelect, Set, TransactionTrait,
};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::crypto::{generate_token, hash_token};
use crate::db;
use crate::error::{Error, Result};

/// A freshly issued secret. Handed out once for delivery, never stored.
pub struct PlaintextSecret(String);

impl PlaintextSecret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PlaintextSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlaintextSecret(<redacted>)")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConsumedToken {
    pub member_id: i32,
    pub consumed_at: i64,
}

#[derive(Clone)]
pub struct SecretTokenStore {
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
}

impl SecretTokenStore {
    pub fn new(db: DatabaseConnection, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Issue a new token of `kind` for the member, superseding any active one.
    ///
    /// Returns `None` when the member has no email address to deliver it to.
    /// For email verification the member's verified flag is reset as well.
    pub async fn issue(&self, member_id: i32, kind: TokenKind, ttl: Duration) -> Result<Option<PlaintextSecret>> {
        let now = self.clock.now();
        let txn = self.db.begin().await?;
        let outcome = issue_in(&txn, member_id, kind, ttl, now).await;
        db::finish(txn, outcome).await
    }

    /// Consume a token, applying the state change tied to its kind in the same unit.
    ///
    /// Email verification marks the member verified. Password reset tokens are
    /// normally consumed through [`crate::credentials::CredentialTransaction`],
    /// which also rewrites the credential.
    pub async fn consume(&self, plaintext: &str, kind: TokenKind) -> Result<ConsumedToken> {
        let now = self.clock.now();
        let txn = self.db.begin().await?;
        let outcome: Result<ConsumedToken> = async {
            let token = lock_active(&txn, plaintext, kind, now).await?;
            mark_consumed(&txn, token.id, now).await?;
            if kind == TokenKind::EmailVerification {
                member::Entity::update_many()
                    .col_expr(member::Column::EmailVerified, Expr::value(true))
                    .col_expr(member::Column::EmailVerifiedAt, Expr::value(Some(now)))
                    .filter(member::Column::Id.eq(token.member_id))
                    .exec(&txn)
                    .await?;
            }
            Ok(ConsumedToken {
                member_id: token.member_id,
                consumed_at: now,
            })
        }
        .await;
        let consumed = db::finish(txn, outcome).await?;
        info!(member_id = consumed.member_id, kind = kind.as_str(), "Secret token consumed");
        Ok(consumed)
    }
}

pub(crate) async fn issue_in<C: ConnectionTrait>(
    conn: &C,
    member_id: i32,
    kind: TokenKind,
    ttl: Duration,
    now: i64,
) -> Result<Option<PlaintextSecret>> {
    let member = member::Entity::find_by_id(member_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| Error::not_found(format!("member {member_id}")))?;

    if member.email.as_deref().map_or(true, |e| e.trim().is_empty()) {
        debug!(member_id, kind = kind.as_str(), "Member has no email, token not issued");
        return Ok(None);
    }

    let superseded = supersede(conn, member_id, kind, now).await?;

    if kind == TokenKind::EmailVerification {
        member::Entity::update_many()
            .col_expr(member::Column::EmailVerified, Expr::value(false))
            .col_expr(member::Column::EmailVerifiedAt, Expr::value::<Option<i64>>(None))
            .filter(member::Column::Id.eq(member_id))
            .exec(conn)
            .await?;
    }

    let plaintext = generate_token()?;
    let ttl_secs = i64::try_from(ttl.as_secs()).map_err(|_| Error::validation("token ttl out of range"))?;
    secret_token::ActiveModel {
        member_id: Set(member_id),
        kind: Set(kind),
        token_hash: Set(hash_token(&plaintext)),
        issued_at: Set(now),
        expires_at: Set(now + ttl_secs),
        consumed_at: Set(None),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    info!(member_id, kind = kind.as_str(), superseded, ttl_secs, "Secret token issued");
    Ok(Some(PlaintextSecret(plaintext)))
}

/// Mark every unconsumed token of `kind` for the member as consumed.
pub(crate) async fn supersede<C: ConnectionTrait>(conn: &C, member_id: i32, kind: TokenKind, now: i64) -> Result<u64> {
    let res = secret_token::Entity::update_many()
        .col_expr(secret_token::Column::ConsumedAt, Expr::value(Some(now)))
        .filter(secret_token::Column::MemberId.eq(member_id))
        .filter(secret_token::Column::Kind.eq(kind))
        .filter(secret_token::Column::ConsumedAt.is_null())
        .exec(conn)
        .await?;
    Ok(res.rows_affected)
}

/// Lock the token row matching `plaintext` and check it is still usable.
///
/// Checked in order: unknown hash, already consumed, expired.
pub(crate) async fn lock_active<C: ConnectionTrait>(
    conn: &C,
    plaintext: &str,
    kind: TokenKind,
    now: i64,
) -> Result<secret_token::Model> {
    let token = secret_token::Entity::find()
        .filter(secret_token::Column::TokenHash.eq(hash_token(plaintext.trim())))
        .filter(secret_token::Column::Kind.eq(kind))
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| Error::not_found("token"))?;

    if token.consumed_at.is_some() {
        return Err(Error::AlreadyUsed);
    }
    if now > token.expires_at {
        return Err(Error::Expired);
    }
    Ok(token)
}

/// Conditionally flip `consumed_at`; losing a race surfaces as `AlreadyUsed`.
pub(crate) async fn mark_consumed<C: ConnectionTrait>(conn: &C, token_id: i32, now: i64) -> Result<()> {
    let res = secret_token::Entity::update_many()
        .col_expr(secret_token::Column::ConsumedAt, Expr::value(Some(now)))
        .filter(secret_token::Column::Id.eq(token_id))
        .filter(secret_token::Column::ConsumedAt.is_null())
        .exec(conn)
        .await?;
    if res.rows_affected != 1 {
        return Err(Error::AlreadyUsed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_is_redacted_in_debug() {
        let secret = PlaintextSecret("hunter2hunter2".to_string());
        assert_eq!(format!("{secret:?}"), "PlaintextSecret(<redacted>)");
        assert_eq!(secret.expose(), "hunter2hunter2");
    }
}
