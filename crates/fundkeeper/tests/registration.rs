mod common;

use common::{harness, token_in};
use fundkeeper::{members::Registration, Error};
use pretty_assertions::assert_eq;

fn ann() -> Registration {
    Registration {
        name: "Ann".into(),
        email: Some("Ann@Example.org".into()),
        phone: None,
        password: "correct-horse".into(),
        admin_code: None,
    }
}

#[tokio::test]
async fn register_verify_and_sign_in() {
    let h = harness().await;

    let outcome = h.ctx.members().register(ann()).await.unwrap();
    assert!(outcome.created);
    assert!(outcome.verification_required);
    assert_eq!(outcome.member.email.as_deref(), Some("ann@example.org"));
    assert!(!outcome.member.is_admin);

    let err = h.ctx.members().authenticate("ann@example.org", "correct-horse").await.unwrap_err();
    assert!(matches!(err, Error::ValidationFailed(ref m) if m.contains("not verified")));

    h.flush().await;
    let sent = h.mail.sent_to("ann@example.org");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Confirm your email address");
    assert!(sent[0].html.contains("http://localhost:4000/api/auth/verify-email?token="));
    assert!(sent[0].html.contains("90 seconds"));

    let verified = h.ctx.members().verify_email(&token_in(&sent[0])).await.unwrap();
    assert_eq!(verified.member_id, outcome.member.id);

    let member = h.ctx.members().authenticate(" ANN@example.org", "correct-horse").await.unwrap();
    assert!(member.email_verified);

    let err = h.ctx.members().register(ann()).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn registering_again_while_unverified_resends_the_link() {
    let h = harness().await;
    let first = h.ctx.members().register(ann()).await.unwrap();
    h.flush().await;
    let second = h.ctx.members().register(ann()).await.unwrap();
    h.flush().await;

    assert!(!second.created);
    assert_eq!(second.member.id, first.member.id);
    let sent = h.mail.sent_to("ann@example.org");
    assert_eq!(sent.len(), 2);

    let err = h.ctx.members().verify_email(&token_in(&sent[0])).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyUsed));
    h.ctx.members().verify_email(&token_in(&sent[1])).await.unwrap();
}

#[tokio::test]
async fn expired_link_can_be_resent() {
    let h = harness().await;
    h.ctx.members().register(ann()).await.unwrap();
    h.flush().await;
    let stale = token_in(&h.mail.sent()[0]);

    h.clock.advance(91);
    let err = h.ctx.members().verify_email(&stale).await.unwrap_err();
    assert!(matches!(err, Error::Expired));

    h.ctx.members().resend_verification("ann@example.org").await.unwrap();
    h.flush().await;
    let fresh = token_in(&h.mail.sent()[1]);
    h.ctx.members().verify_email(&fresh).await.unwrap();

    let err = h.ctx.members().resend_verification("ann@example.org").await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    let err = h.ctx.members().resend_verification("nobody@example.org").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn admin_code_grants_admin_only_when_it_matches() {
    let h = harness().await;
    let admin = h
        .ctx
        .members()
        .register(Registration {
            admin_code: Some(" let-me-admin ".into()),
            ..ann()
        })
        .await
        .unwrap();
    assert!(admin.member.is_admin);

    let guest = h
        .ctx
        .members()
        .register(Registration {
            name: "Bob".into(),
            email: Some("bob@example.org".into()),
            admin_code: Some("guess".into()),
            ..ann()
        })
        .await
        .unwrap();
    assert!(!guest.member.is_admin);
}

#[tokio::test]
async fn phone_only_members_need_no_verification() {
    let h = harness().await;
    let outcome = h
        .ctx
        .members()
        .register(Registration {
            email: None,
            phone: Some(" +254700000000 ".into()),
            ..ann()
        })
        .await
        .unwrap();
    h.flush().await;

    assert!(outcome.created);
    assert!(!outcome.verification_required);
    assert_eq!(outcome.member.phone.as_deref(), Some("+254700000000"));
    assert!(h.mail.sent().is_empty());
    assert_eq!(h.count("SELECT COUNT(*) FROM secret_tokens").await, 0);
}

#[tokio::test]
async fn registration_input_is_validated() {
    let h = harness().await;
    let cases = [
        Registration {
            name: "   ".into(),
            ..ann()
        },
        Registration {
            email: None,
            phone: Some(" ".into()),
            ..ann()
        },
        Registration {
            password: "short".into(),
            ..ann()
        },
    ];
    for case in cases {
        let err = h.ctx.members().register(case).await.unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)), "{err:?}");
    }
    assert_eq!(h.count("SELECT COUNT(*) FROM members").await, 0);
}

#[tokio::test]
async fn wrong_password_and_unknown_email_fail_alike() {
    let h = harness().await;
    h.member("Ann", Some("ann@example.org")).await;

    let wrong = h.ctx.members().authenticate("ann@example.org", "not-my-password").await.unwrap_err();
    let unknown = h.ctx.members().authenticate("zed@example.org", "not-my-password").await.unwrap_err();
    assert_eq!(wrong.to_string(), unknown.to_string());
}
