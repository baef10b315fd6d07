//! Contributions, causes and their images, with the notifications each change
//! triggers.

use chrono::NaiveDate;
use entity::{cause, contribution, member};
use futures::FutureExt;
use sea_orm::{
    sea_query::{Alias, Expr, Func, SimpleExpr},
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use tracing::info;

use crate::attachments::{repo, validate_uploads, Attachment, AttachmentTarget, UploadFile, UploadLimits};
use crate::context::AppContext;
use crate::error::{Error, Result};
use crate::mail::{
    templates::{data, image_gallery_html, TemplateData},
    TemplateKey,
};
use crate::notify::{Audience, Notification, Recipient};
use crate::saga::Saga;
use crate::util::format_cents;

const MAX_TITLE_LEN: usize = 150;

#[derive(Clone, Debug)]
pub struct NewContribution {
    pub member_id: i32,
    pub amount_cents: i64,
    pub contributed_date: NaiveDate,
}

#[derive(Clone, Debug, Default)]
pub struct ContributionPatch {
    pub member_id: Option<i32>,
    pub amount_cents: Option<i64>,
    pub contributed_date: Option<NaiveDate>,
}

#[derive(Clone, Debug)]
pub struct NewCause {
    pub title: String,
    pub description: Option<String>,
    pub amount_cents: Option<i64>,
}

#[derive(Clone, Debug, Default)]
pub struct CausePatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub amount_cents: Option<Option<i64>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FundStatus {
    pub total_contributions_cents: i64,
    pub total_causes_cents: i64,
    pub available_cents: i64,
}

impl FundStatus {
    pub fn available(&self) -> String {
        format_cents(self.available_cents)
    }
}

fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_LEN {
        return Err(Error::validation(format!("title must be 1 to {MAX_TITLE_LEN} characters")));
    }
    Ok(title.to_string())
}

fn validate_cause_amount(amount: Option<i64>) -> Result<()> {
    if amount.is_some_and(|a| a < 0) {
        return Err(Error::validation("cause amount must not be negative"));
    }
    Ok(())
}

fn validate_contribution_amount(amount: i64) -> Result<()> {
    if amount <= 0 {
        return Err(Error::validation("contribution amount must be positive"));
    }
    Ok(())
}

fn contribution_data(c: &contribution::Model, member_name: &str, images: &[Attachment]) -> TemplateData {
    data([
        ("memberName", member_name.to_string()),
        ("amount", format_cents(c.amount_cents)),
        ("contributedDate", c.contributed_date.format("%Y-%m-%d").to_string()),
        ("contributionId", c.id.to_string()),
        ("imagesHtml", gallery(images)),
    ])
}

fn cause_data(c: &cause::Model, images: &[Attachment]) -> TemplateData {
    data([
        ("title", c.title.clone()),
        (
            "description",
            c.description.clone().unwrap_or_else(|| "No description provided.".to_string()),
        ),
        ("amount", c.amount_cents.map_or_else(|| "N/A".to_string(), format_cents)),
        ("causeId", c.id.to_string()),
        ("imagesHtml", gallery(images)),
    ])
}

fn gallery(images: &[Attachment]) -> String {
    let urls: Vec<String> = images.iter().map(|a| a.url.clone()).collect();
    image_gallery_html(&urls)
}

pub struct FundService<'a> {
    ctx: &'a AppContext,
}

impl<'a> FundService<'a> {
    pub fn new(ctx: &'a AppContext) -> Self {
        Self { ctx }
    }

    async fn member(&self, member_id: i32) -> Result<member::Model> {
        member::Entity::find_by_id(member_id)
            .one(&self.ctx.db)
            .await?
            .ok_or_else(|| Error::not_found(format!("member {member_id}")))
    }

    pub async fn contribution(&self, id: i32) -> Result<contribution::Model> {
        contribution::Entity::find_by_id(id)
            .one(&self.ctx.db)
            .await?
            .ok_or_else(|| Error::not_found(format!("contribution {id}")))
    }

    pub async fn contributions(&self) -> Result<Vec<contribution::Model>> {
        Ok(contribution::Entity::find()
            .order_by_desc(contribution::Column::ContributedDate)
            .order_by_desc(contribution::Column::Id)
            .all(&self.ctx.db)
            .await?)
    }

    pub async fn cause(&self, id: i32) -> Result<cause::Model> {
        cause::Entity::find_by_id(id)
            .one(&self.ctx.db)
            .await?
            .ok_or_else(|| Error::not_found(format!("cause {id}")))
    }

    pub async fn causes(&self) -> Result<Vec<cause::Model>> {
        Ok(cause::Entity::find()
            .order_by_desc(cause::Column::CreatedAt)
            .order_by_desc(cause::Column::Id)
            .all(&self.ctx.db)
            .await?)
    }

    async fn insert_contribution(&self, input: &NewContribution) -> Result<(contribution::Model, member::Model)> {
        validate_contribution_amount(input.amount_cents)?;
        let member = self.member(input.member_id).await?;
        let created = contribution::ActiveModel {
            member_id: Set(input.member_id),
            amount_cents: Set(input.amount_cents),
            contributed_date: Set(input.contributed_date),
            created_at: Set(self.ctx.clock.now()),
            ..Default::default()
        }
        .insert(&self.ctx.db)
        .await?;
        Ok((created, member))
    }

    pub async fn record_contribution(&self, input: NewContribution) -> Result<contribution::Model> {
        let (created, member) = self.insert_contribution(&input).await?;
        info!(contribution_id = created.id, member_id = member.id, "Contribution recorded");
        self.notify_contribution(TemplateKey::ContributionCreated, &created, &member, &[]);
        Ok(created)
    }

    /// Record a contribution together with its proof images.
    ///
    /// If the images cannot be attached the contribution row is deleted again
    /// and the attach error is returned. One `contribution.created` is sent.
    pub async fn record_contribution_with_images(
        &self,
        input: NewContribution,
        files: Vec<UploadFile>,
    ) -> Result<(contribution::Model, Vec<Attachment>)> {
        validate_uploads(&files, UploadLimits::from(&self.ctx.config.storage))?;

        let mut saga = Saga::new("record contribution");
        let (created, member) = saga
            .step("insert contribution", self.insert_contribution(&input), |(c, _)| {
                let id = c.id;
                async move {
                    contribution::Entity::delete_by_id(id)
                        .exec(&self.ctx.db)
                        .await
                        .map(|_| ())
                        .map_err(Error::from)
                }
                .boxed()
            })
            .await?;
        let images = saga
            .run(
                "attach images",
                self.ctx.attachments.attach(AttachmentTarget::Contribution(created.id), files),
            )
            .await?;
        saga.complete();

        info!(contribution_id = created.id, images = images.len(), "Contribution recorded with images");
        self.notify_contribution(TemplateKey::ContributionCreated, &created, &member, &images);
        Ok((created, images))
    }

    pub async fn update_contribution(&self, id: i32, patch: ContributionPatch) -> Result<contribution::Model> {
        let existing = self.contribution(id).await?;
        if let Some(amount) = patch.amount_cents {
            validate_contribution_amount(amount)?;
        }
        let member_id = patch.member_id.unwrap_or(existing.member_id);
        let member = self.member(member_id).await?;

        let mut active: contribution::ActiveModel = existing.into();
        if let Some(member_id) = patch.member_id {
            active.member_id = Set(member_id);
        }
        if let Some(amount) = patch.amount_cents {
            active.amount_cents = Set(amount);
        }
        if let Some(date) = patch.contributed_date {
            active.contributed_date = Set(date);
        }
        let updated = active.update(&self.ctx.db).await?;

        let images = self.ctx.attachments.list(AttachmentTarget::Contribution(id)).await?;
        self.notify_contribution(TemplateKey::ContributionUpdated, &updated, &member, &images);
        Ok(updated)
    }

    /// Delete a contribution and its image rows, then clean up their objects.
    pub async fn delete_contribution(&self, id: i32) -> Result<()> {
        let existing = self.contribution(id).await?;
        let member = self.member(existing.member_id).await.ok();
        self.ctx
            .attachments
            .cascade_cleanup(AttachmentTarget::Contribution(id))
            .await?;
        if let Some(member) = member {
            self.notify_contribution(TemplateKey::ContributionDeleted, &existing, &member, &[]);
        }
        Ok(())
    }

    pub async fn register_cause(&self, input: NewCause) -> Result<cause::Model> {
        let title = validate_title(&input.title)?;
        validate_cause_amount(input.amount_cents)?;
        let created = cause::ActiveModel {
            title: Set(title),
            description: Set(input.description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty())),
            amount_cents: Set(input.amount_cents),
            created_at: Set(self.ctx.clock.now()),
            ..Default::default()
        }
        .insert(&self.ctx.db)
        .await?;
        info!(cause_id = created.id, "Cause registered");
        self.notify_cause(TemplateKey::CauseCreated, &created, &[]);
        Ok(created)
    }

    pub async fn update_cause(&self, id: i32, patch: CausePatch) -> Result<cause::Model> {
        let existing = self.cause(id).await?;
        let mut active: cause::ActiveModel = existing.into();
        if let Some(title) = &patch.title {
            active.title = Set(validate_title(title)?);
        }
        if let Some(description) = patch.description {
            active.description = Set(description.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()));
        }
        if let Some(amount) = patch.amount_cents {
            validate_cause_amount(amount)?;
            active.amount_cents = Set(amount);
        }
        let updated = active.update(&self.ctx.db).await?;

        let images = self.ctx.attachments.list(AttachmentTarget::Cause(id)).await?;
        self.notify_cause(TemplateKey::CauseUpdated, &updated, &images);
        Ok(updated)
    }

    pub async fn delete_cause(&self, id: i32) -> Result<()> {
        let existing = self.cause(id).await?;
        self.ctx.attachments.cascade_cleanup(AttachmentTarget::Cause(id)).await?;
        self.notify_cause(TemplateKey::CauseDeleted, &existing, &[]);
        Ok(())
    }

    pub async fn list_images(&self, target: AttachmentTarget) -> Result<Vec<Attachment>> {
        self.ctx.attachments.list(target).await
    }

    pub async fn attach_images(&self, target: AttachmentTarget, files: Vec<UploadFile>) -> Result<Vec<Attachment>> {
        let created = self.ctx.attachments.attach(target, files).await?;
        self.notify_owner_updated(target);
        Ok(created)
    }

    pub async fn replace_image(&self, target: AttachmentTarget, attachment_id: i32, file: UploadFile) -> Result<Attachment> {
        let updated = self.ctx.attachments.replace(target, attachment_id, file).await?;
        self.notify_owner_updated(target);
        Ok(updated)
    }

    pub async fn remove_image(&self, target: AttachmentTarget, attachment_id: i32) -> Result<()> {
        self.ctx.attachments.remove(target, attachment_id).await?;
        self.notify_owner_updated(target);
        Ok(())
    }

    /// Totals across all contributions and causes.
    pub async fn fund_status(&self) -> Result<FundStatus> {
        let total_contributions_cents = contribution::Entity::find()
            .select_only()
            .column_as(total_of(contribution::Column::AmountCents), "total")
            .into_tuple::<i64>()
            .one(&self.ctx.db)
            .await?
            .unwrap_or_default();
        let total_causes_cents = cause::Entity::find()
            .select_only()
            .column_as(total_of(cause::Column::AmountCents), "total")
            .into_tuple::<i64>()
            .one(&self.ctx.db)
            .await?
            .unwrap_or_default();
        Ok(FundStatus {
            total_contributions_cents,
            total_causes_cents,
            available_cents: total_contributions_cents - total_causes_cents,
        })
    }

    /// Queue the `<kind>.updated` notice after an image change. The owner and
    /// image lookups run on the notification worker; the change itself has
    /// already committed.
    fn notify_owner_updated(&self, target: AttachmentTarget) {
        self.ctx
            .dispatcher
            .notify_with(
                format!("{}.updated:{}", target.kind(), target.owner_id()),
                owner_updated_notice(self.ctx.db.clone(), target).boxed(),
            );
    }

    fn notify_contribution(
        &self,
        template: TemplateKey,
        c: &contribution::Model,
        member: &member::Model,
        images: &[Attachment],
    ) {
        if let Some(notice) = contribution_notice(template, c, member, images) {
            self.ctx.dispatcher.notify(notice);
        }
    }

    fn notify_cause(&self, template: TemplateKey, c: &cause::Model, images: &[Attachment]) {
        self.ctx.dispatcher.notify(cause_notice(template, c, images));
    }
}

async fn owner_updated_notice(db: DatabaseConnection, target: AttachmentTarget) -> Result<Option<Notification>> {
    let images = repo::list(&db, target).await?;
    match target {
        AttachmentTarget::Contribution(id) => {
            let c = contribution::Entity::find_by_id(id)
                .one(&db)
                .await?
                .ok_or_else(|| Error::not_found(format!("contribution {id}")))?;
            let m = member::Entity::find_by_id(c.member_id)
                .one(&db)
                .await?
                .ok_or_else(|| Error::not_found(format!("member {}", c.member_id)))?;
            Ok(contribution_notice(TemplateKey::ContributionUpdated, &c, &m, &images))
        }
        AttachmentTarget::Cause(id) => {
            let c = cause::Entity::find_by_id(id)
                .one(&db)
                .await?
                .ok_or_else(|| Error::not_found(format!("cause {id}")))?;
            Ok(Some(cause_notice(TemplateKey::CauseUpdated, &c, &images)))
        }
    }
}

/// Members without an email address get no contribution notices.
fn contribution_notice(
    template: TemplateKey,
    c: &contribution::Model,
    member: &member::Model,
    images: &[Attachment],
) -> Option<Notification> {
    let address = member.email.clone()?;
    Some(Notification {
        event: format!("{template}:{}", c.id),
        audience: Audience::Addresses(vec![Recipient::named(address, member.name.clone())]),
        template,
        data: contribution_data(c, &member.name, images),
    })
}

fn cause_notice(template: TemplateKey, c: &cause::Model, images: &[Attachment]) -> Notification {
    Notification {
        event: format!("{template}:{}", c.id),
        audience: Audience::AllMembers,
        template,
        data: cause_data(c, images),
    }
}

fn total_of<C: ColumnTrait + 'static>(column: C) -> SimpleExpr {
    Func::cast_as(
        Func::coalesce([Expr::col(column).sum(), Expr::val(0i64).into()]),
        Alias::new("BIGINT"),
    )
    .into()
}
