mod common;

use chrono::NaiveDate;
use common::{harness, png};
use fundkeeper::{
    attachments::AttachmentTarget,
    funds::{CausePatch, ContributionPatch, FundStatus, NewCause, NewContribution},
    Error,
};
use pretty_assertions::assert_eq;

fn march(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
}

#[tokio::test]
async fn recording_a_contribution_notifies_the_member() {
    let h = harness().await;
    let m = h.member("Ann", Some("ann@example.org")).await;

    let c = h
        .ctx
        .funds()
        .record_contribution(NewContribution {
            member_id: m.id,
            amount_cents: 15000,
            contributed_date: march(9),
        })
        .await
        .unwrap();
    h.flush().await;

    assert_eq!(c.amount_cents, 15000);
    let sent = h.mail.sent_to("ann@example.org");
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Contribution recorded: 150.00");
    assert!(sent[0].html.contains("2024-03-09"));
    assert!(sent[0].html.contains(&format!("#{}", c.id)));
}

#[tokio::test]
async fn contribution_input_is_validated() {
    let h = harness().await;
    let m = h.member("Ann", Some("ann@example.org")).await;

    let err = h
        .ctx
        .funds()
        .record_contribution(NewContribution {
            member_id: m.id,
            amount_cents: 0,
            contributed_date: march(9),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ValidationFailed(_)));

    let err = h
        .ctx
        .funds()
        .record_contribution(NewContribution {
            member_id: 404,
            amount_cents: 100,
            contributed_date: march(9),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(h.count("SELECT COUNT(*) FROM contributions").await, 0);
}

#[tokio::test]
async fn contribution_with_images_is_all_or_nothing() {
    let h = harness().await;
    let m = h.member("Ann", Some("ann@example.org")).await;
    let input = NewContribution {
        member_id: m.id,
        amount_cents: 15000,
        contributed_date: march(9),
    };

    h.store.fail_upload_call(2);
    let err = h
        .ctx
        .funds()
        .record_contribution_with_images(input.clone(), vec![png("a.png"), png("b.png")])
        .await
        .unwrap_err();
    h.flush().await;

    assert!(matches!(err, Error::UpstreamUnavailable(_)));
    assert_eq!(h.count("SELECT COUNT(*) FROM contributions").await, 0);
    assert_eq!(h.count("SELECT COUNT(*) FROM contribution_images").await, 0);
    assert!(h.store.inner.is_empty());
    assert!(h.mail.sent().is_empty());

    let (c, images) = h
        .ctx
        .funds()
        .record_contribution_with_images(input, vec![png("a.png")])
        .await
        .unwrap();
    h.flush().await;

    assert_eq!(images.len(), 1);
    assert_eq!(images[0].target, AttachmentTarget::Contribution(c.id));
    let sent = h.mail.sent_to("ann@example.org");
    assert_eq!(sent.len(), 1);
    assert!(sent[0].html.contains(&images[0].url));
}

#[tokio::test]
async fn updates_and_deletes_notify() {
    let h = harness().await;
    let m = h.member("Ann", Some("ann@example.org")).await;
    let c = h
        .ctx
        .funds()
        .record_contribution(NewContribution {
            member_id: m.id,
            amount_cents: 15000,
            contributed_date: march(9),
        })
        .await
        .unwrap();
    h.flush().await;

    let updated = h
        .ctx
        .funds()
        .update_contribution(
            c.id,
            ContributionPatch {
                amount_cents: Some(20000),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.amount_cents, 20000);
    assert_eq!(updated.contributed_date, march(9));
    h.flush().await;

    h.ctx
        .funds()
        .attach_images(AttachmentTarget::Contribution(c.id), vec![png("receipt.jpg")])
        .await
        .unwrap();
    h.flush().await;
    h.ctx.funds().delete_contribution(c.id).await.unwrap();
    h.flush().await;

    let subjects: Vec<String> = h.mail.sent_to("ann@example.org").into_iter().map(|m| m.subject).collect();
    let id = c.id;
    assert_eq!(
        subjects,
        vec![
            "Contribution recorded: 150.00".to_string(),
            format!("Contribution #{id} updated"),
            format!("Contribution #{id} updated"),
            format!("Contribution #{id} removed"),
        ]
    );
    assert!(h.store.inner.is_empty());
    let err = h.ctx.funds().contribution(c.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn cause_updates_apply_patch_semantics() {
    let h = harness().await;
    let cause = h
        .ctx
        .funds()
        .register_cause(NewCause {
            title: "  Roof  ".into(),
            description: Some("Tiles".into()),
            amount_cents: Some(5000),
        })
        .await
        .unwrap();
    assert_eq!(cause.title, "Roof");

    let updated = h
        .ctx
        .funds()
        .update_cause(
            cause.id,
            CausePatch {
                description: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.title, "Roof");
    assert_eq!(updated.description, None);
    assert_eq!(updated.amount_cents, Some(5000));

    let err = h
        .ctx
        .funds()
        .update_cause(
            cause.id,
            CausePatch {
                amount_cents: Some(Some(-1)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ValidationFailed(_)));

    let err = h.ctx.funds().delete_cause(cause.id + 1).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn fund_status_sums_contributions_and_causes() {
    let h = harness().await;
    assert_eq!(
        h.ctx.funds().fund_status().await.unwrap(),
        FundStatus {
            total_contributions_cents: 0,
            total_causes_cents: 0,
            available_cents: 0
        }
    );

    let m = h.member("Ann", Some("ann@example.org")).await;
    for (amount, day) in [(15000, 1), (5000, 2)] {
        h.ctx
            .funds()
            .record_contribution(NewContribution {
                member_id: m.id,
                amount_cents: amount,
                contributed_date: march(day),
            })
            .await
            .unwrap();
    }
    for amount in [Some(12000), None] {
        h.ctx
            .funds()
            .register_cause(NewCause {
                title: "Cause".into(),
                description: None,
                amount_cents: amount,
            })
            .await
            .unwrap();
    }

    let status = h.ctx.funds().fund_status().await.unwrap();
    assert_eq!(status.total_contributions_cents, 20000);
    assert_eq!(status.total_causes_cents, 12000);
    assert_eq!(status.available(), "80.00");

    let listed: Vec<NaiveDate> = h
        .ctx
        .funds()
        .contributions()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.contributed_date)
        .collect();
    assert_eq!(listed, vec![march(2), march(1)]);
}
