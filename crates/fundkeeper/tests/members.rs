mod common;

use chrono::NaiveDate;
use common::{harness, harness_with, png, Harness};
use fundkeeper::{
    funds::NewContribution,
    members::{MemberPatch, MemberRemoval},
    Error,
};
use pretty_assertions::assert_eq;

async fn contribution_with_images(h: &Harness, member_id: i32, files: usize) -> i32 {
    let images = (1..=files).map(|i| png(&format!("proof-{i}.png"))).collect();
    let (c, _) = h
        .ctx
        .funds()
        .record_contribution_with_images(
            NewContribution {
                member_id,
                amount_cents: 5_000,
                contributed_date: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
            },
            images,
        )
        .await
        .unwrap();
    c.id
}

#[tokio::test]
async fn upgrade_requires_the_admin_code() {
    let h = harness().await;
    let ann = h.member("Ann", Some("ann@example.org")).await;

    let err = h.ctx.members().upgrade_to_admin(ann.id, "guess").await.unwrap_err();
    assert!(matches!(err, Error::ValidationFailed(ref m) if m.contains("admin secret code")));
    assert!(!h.ctx.members().get(ann.id).await.unwrap().is_admin);

    let err = h.ctx.members().upgrade_to_admin(9999, "let-me-admin").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let promoted = h.ctx.members().upgrade_to_admin(ann.id, " let-me-admin ").await.unwrap();
    assert!(promoted.is_admin);

    let err = h.ctx.members().upgrade_to_admin(ann.id, "let-me-admin").await.unwrap_err();
    assert!(matches!(err, Error::ValidationFailed(ref m) if m.contains("already an admin")));
}

#[tokio::test]
async fn upgrade_is_refused_when_no_code_is_configured() {
    let h = harness_with(|c| c.admin_secret_code = None).await;
    let ann = h.member("Ann", Some("ann@example.org")).await;

    let err = h.ctx.members().upgrade_to_admin(ann.id, "").await.unwrap_err();
    assert!(matches!(err, Error::ValidationFailed(_)));
}

#[tokio::test]
async fn update_patches_only_the_given_fields() {
    let h = harness().await;
    let ann = h.member("Ann", Some("ann@example.org")).await;

    let updated = h
        .ctx
        .members()
        .update(
            ann.id,
            MemberPatch {
                name: Some("  Ann Lee ".into()),
                phone: Some(Some(" 555-0100 ".into())),
                is_admin: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Ann Lee");
    assert_eq!(updated.phone.as_deref(), Some("555-0100"));
    assert_eq!(updated.email.as_deref(), Some("ann@example.org"));
    assert!(updated.is_admin);
    assert!(updated.email_verified);

    let updated = h
        .ctx
        .members()
        .update(
            ann.id,
            MemberPatch {
                email: Some(Some("Ann.Lee@Example.org".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.email.as_deref(), Some("ann.lee@example.org"));
    assert_eq!(updated.name, "Ann Lee");
}

#[tokio::test]
async fn update_rejects_taken_addresses_and_bad_input() {
    let h = harness().await;
    let ann = h.member("Ann", Some("ann@example.org")).await;
    h.member("Bob", Some("bob@example.org")).await;

    let err = h
        .ctx
        .members()
        .update(
            ann.id,
            MemberPatch {
                email: Some(Some(" BOB@example.org".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));

    let err = h
        .ctx
        .members()
        .update(
            ann.id,
            MemberPatch {
                email: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ValidationFailed(_)));

    let err = h
        .ctx
        .members()
        .update(
            ann.id,
            MemberPatch {
                name: Some("   ".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ValidationFailed(_)));

    let err = h.ctx.members().update(9999, MemberPatch::default()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let unchanged = h.ctx.members().get(ann.id).await.unwrap();
    assert_eq!(unchanged.email.as_deref(), Some("ann@example.org"));
    assert_eq!(unchanged.name, "Ann");
}

#[tokio::test]
async fn delete_cascades_through_contributions_and_their_images() {
    let h = harness().await;
    let ann = h.member("Ann", Some("ann@example.org")).await;
    let bob = h.member("Bob", Some("bob@example.org")).await;
    contribution_with_images(&h, ann.id, 2).await;
    contribution_with_images(&h, ann.id, 1).await;
    let kept = contribution_with_images(&h, bob.id, 1).await;
    h.ctx.members().request_password_reset("ann@example.org").await.unwrap();
    h.flush().await;
    assert_eq!(h.store.inner.len(), 4);

    let removal = h.ctx.members().delete(ann.id).await.unwrap();

    assert_eq!(
        removal,
        MemberRemoval {
            member_id: ann.id,
            contributions: 2,
            images: 3,
            orphaned: 0,
        }
    );
    assert!(matches!(h.ctx.members().get(ann.id).await, Err(Error::NotFound(_))));
    assert_eq!(h.count("SELECT COUNT(*) FROM contributions").await, 1);
    assert_eq!(h.count("SELECT COUNT(*) FROM contribution_images").await, 1);
    assert_eq!(
        h.count(&format!("SELECT COUNT(*) FROM secret_tokens WHERE member_id = {}", ann.id)).await,
        0
    );
    assert_eq!(h.store.inner.len(), 1);
    assert_eq!(h.ctx.funds().contribution(kept).await.unwrap().member_id, bob.id);
}

#[tokio::test]
async fn delete_leaves_failed_object_deletes_to_the_sweep() {
    let h = harness().await;
    let ann = h.member("Ann", Some("ann@example.org")).await;
    contribution_with_images(&h, ann.id, 2).await;

    h.store.fail_deletes(true);
    let removal = h.ctx.members().delete(ann.id).await.unwrap();

    assert_eq!((removal.contributions, removal.images, removal.orphaned), (1, 2, 2));
    assert_eq!(h.count("SELECT COUNT(*) FROM members").await, 0);
    assert_eq!(h.count("SELECT COUNT(*) FROM contribution_images").await, 0);
    assert_eq!(h.store.inner.len(), 2);

    h.store.fail_deletes(false);
    h.clock.advance(3601);
    let report = h.ctx.sweeper().sweep_all(false).await.unwrap();
    assert_eq!(report.deleted, 2);
    assert!(h.store.inner.is_empty());
}

#[tokio::test]
async fn deleting_an_unknown_member_is_not_found() {
    let h = harness().await;
    let err = h.ctx.members().delete(9999).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
