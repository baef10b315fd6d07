mod common;

use std::time::Duration;

use common::{harness, START};
use entity::{member, secret_token::TokenKind};
use fundkeeper::Error;
use pretty_assertions::assert_eq;
use sea_orm::EntityTrait;

const VERIFY_TTL: Duration = Duration::from_secs(90);
const RESET_TTL: Duration = Duration::from_secs(15 * 60);

#[tokio::test]
async fn consume_succeeds_exactly_once() {
    let h = harness().await;
    let m = h.member("Ann", Some("ann@example.org")).await;

    let secret = h.ctx.tokens.issue(m.id, TokenKind::PasswordReset, RESET_TTL).await.unwrap().unwrap();

    let first = h.ctx.tokens.consume(secret.expose(), TokenKind::PasswordReset).await.unwrap();
    assert_eq!(first.member_id, m.id);
    assert_eq!(first.consumed_at, START);

    let second = h.ctx.tokens.consume(secret.expose(), TokenKind::PasswordReset).await;
    assert!(matches!(second, Err(Error::AlreadyUsed)), "{second:?}");
}

#[tokio::test]
async fn expired_tokens_are_rejected_and_stay_unconsumed() {
    let h = harness().await;
    let m = h.member("Ann", Some("ann@example.org")).await;
    let secret = h.ctx.tokens.issue(m.id, TokenKind::EmailVerification, VERIFY_TTL).await.unwrap().unwrap();

    h.clock.advance(91);
    let err = h.ctx.tokens.consume(secret.expose(), TokenKind::EmailVerification).await.unwrap_err();
    assert!(matches!(err, Error::Expired));

    assert_eq!(h.count("SELECT COUNT(*) FROM secret_tokens WHERE consumed_at IS NULL").await, 1);
    let member = member::Entity::find_by_id(m.id).one(&h.db).await.unwrap().unwrap();
    assert!(!member.email_verified);
}

#[tokio::test]
async fn token_is_still_valid_at_its_expiry_instant() {
    let h = harness().await;
    let m = h.member("Ann", Some("ann@example.org")).await;
    let secret = h.ctx.tokens.issue(m.id, TokenKind::EmailVerification, VERIFY_TTL).await.unwrap().unwrap();

    h.clock.advance(90);
    h.ctx.tokens.consume(secret.expose(), TokenKind::EmailVerification).await.unwrap();
}

#[tokio::test]
async fn reissuing_verification_invalidates_the_previous_token() {
    let h = harness().await;
    let m = h.member("Ann", Some("ann@example.org")).await;

    let old = h.ctx.tokens.issue(m.id, TokenKind::EmailVerification, VERIFY_TTL).await.unwrap().unwrap();
    let new = h.ctx.tokens.issue(m.id, TokenKind::EmailVerification, VERIFY_TTL).await.unwrap().unwrap();

    let err = h.ctx.tokens.consume(old.expose(), TokenKind::EmailVerification).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyUsed));

    h.ctx.tokens.consume(new.expose(), TokenKind::EmailVerification).await.unwrap();
    let member = member::Entity::find_by_id(m.id).one(&h.db).await.unwrap().unwrap();
    assert!(member.email_verified);
    assert_eq!(member.email_verified_at, Some(START));
}

#[tokio::test]
async fn issuing_verification_resets_verified_flag() {
    let h = harness().await;
    let m = h.member("Ann", Some("ann@example.org")).await;
    assert!(m.email_verified);

    h.ctx.tokens.issue(m.id, TokenKind::EmailVerification, VERIFY_TTL).await.unwrap();

    let member = member::Entity::find_by_id(m.id).one(&h.db).await.unwrap().unwrap();
    assert!(!member.email_verified);
    assert_eq!(member.email_verified_at, None);
}

#[tokio::test]
async fn superseded_reset_tokens_are_kept_as_consumed_rows() {
    let h = harness().await;
    let m = h.member("Ann", Some("ann@example.org")).await;

    for _ in 0..3 {
        h.ctx.tokens.issue(m.id, TokenKind::PasswordReset, RESET_TTL).await.unwrap();
    }

    assert_eq!(h.count("SELECT COUNT(*) FROM secret_tokens").await, 3);
    assert_eq!(
        h.count("SELECT COUNT(*) FROM secret_tokens WHERE consumed_at IS NULL").await,
        1
    );
}

#[tokio::test]
async fn plaintext_is_never_stored() {
    let h = harness().await;
    let m = h.member("Ann", Some("ann@example.org")).await;
    let secret = h.ctx.tokens.issue(m.id, TokenKind::PasswordReset, RESET_TTL).await.unwrap().unwrap();

    let sql = format!("SELECT COUNT(*) FROM secret_tokens WHERE token_hash = '{}'", secret.expose());
    assert_eq!(h.count(&sql).await, 0);
}

#[tokio::test]
async fn members_without_email_get_no_token() {
    let h = harness().await;
    let m = h.member("Phone Only", None).await;

    let issued = h.ctx.tokens.issue(m.id, TokenKind::EmailVerification, VERIFY_TTL).await.unwrap();
    assert!(issued.is_none());
    assert_eq!(h.count("SELECT COUNT(*) FROM secret_tokens").await, 0);
}

#[tokio::test]
async fn unknown_member_is_not_found() {
    let h = harness().await;
    let err = h.ctx.tokens.issue(404, TokenKind::PasswordReset, RESET_TTL).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn unknown_or_mismatched_tokens_are_not_found() {
    let h = harness().await;
    let m = h.member("Ann", Some("ann@example.org")).await;
    let reset = h.ctx.tokens.issue(m.id, TokenKind::PasswordReset, RESET_TTL).await.unwrap().unwrap();

    let err = h.ctx.tokens.consume("not-a-real-token", TokenKind::PasswordReset).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let err = h.ctx.tokens.consume(reset.expose(), TokenKind::EmailVerification).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn concurrent_consumes_have_one_winner() {
    let h = harness().await;
    let m = h.member("Ann", Some("ann@example.org")).await;
    let secret = h.ctx.tokens.issue(m.id, TokenKind::EmailVerification, VERIFY_TTL).await.unwrap().unwrap();

    let (a, b) = tokio::join!(
        h.ctx.tokens.consume(secret.expose(), TokenKind::EmailVerification),
        h.ctx.tokens.consume(secret.expose(), TokenKind::EmailVerification),
    );

    let wins = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "{a:?} {b:?}");
    let loser = if a.is_ok() { b } else { a };
    assert!(matches!(loser, Err(Error::AlreadyUsed) | Err(Error::NotFound(_))));
}
