//! Row access for the two image tables, dispatched on [`AttachmentTarget`].

use entity::{cause, cause_image, contribution, contribution_image, member};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};

use super::naming::NameParts;
use super::{Attachment, AttachmentTarget};
use crate::error::{Error, Result};
use crate::storage::Folder;

impl Attachment {
    fn from_contribution(m: contribution_image::Model) -> Self {
        Self {
            id: m.id,
            target: AttachmentTarget::Contribution(m.contribution_id),
            url: m.url,
            created_at: m.created_at,
        }
    }

    fn from_cause(m: cause_image::Model) -> Self {
        Self {
            id: m.id,
            target: AttachmentTarget::Cause(m.cause_id),
            url: m.url,
            created_at: m.created_at,
        }
    }
}

/// Load the owner and derive object-name parts from it. `NotFound` if it is gone.
pub async fn owner_name_parts<C: ConnectionTrait>(conn: &C, target: AttachmentTarget) -> Result<NameParts> {
    match target {
        AttachmentTarget::Contribution(id) => {
            let (c, m) = contribution::Entity::find_by_id(id)
                .find_also_related(member::Entity)
                .one(conn)
                .await?
                .ok_or_else(|| Error::not_found(target.to_string()))?;
            let member_name = m.map(|m| m.name).unwrap_or_default();
            Ok(NameParts::for_contribution(&member_name, c.amount_cents, c.contributed_date))
        }
        AttachmentTarget::Cause(id) => {
            let c = cause::Entity::find_by_id(id)
                .one(conn)
                .await?
                .ok_or_else(|| Error::not_found(target.to_string()))?;
            Ok(NameParts::for_cause(&c.title, c.amount_cents, c.created_at))
        }
    }
}

pub async fn insert<C: ConnectionTrait>(conn: &C, target: AttachmentTarget, url: &str, now: i64) -> Result<Attachment> {
    let row = match target {
        AttachmentTarget::Contribution(owner) => Attachment::from_contribution(
            contribution_image::ActiveModel {
                contribution_id: Set(owner),
                url: Set(url.to_string()),
                created_at: Set(now),
                ..Default::default()
            }
            .insert(conn)
            .await?,
        ),
        AttachmentTarget::Cause(owner) => Attachment::from_cause(
            cause_image::ActiveModel {
                cause_id: Set(owner),
                url: Set(url.to_string()),
                created_at: Set(now),
                ..Default::default()
            }
            .insert(conn)
            .await?,
        ),
    };
    Ok(row)
}

/// Fetch an attachment that must belong to `target`.
pub async fn find<C: ConnectionTrait>(conn: &C, target: AttachmentTarget, attachment_id: i32) -> Result<Attachment> {
    let found = match target {
        AttachmentTarget::Contribution(owner) => contribution_image::Entity::find_by_id(attachment_id)
            .filter(contribution_image::Column::ContributionId.eq(owner))
            .one(conn)
            .await?
            .map(Attachment::from_contribution),
        AttachmentTarget::Cause(owner) => cause_image::Entity::find_by_id(attachment_id)
            .filter(cause_image::Column::CauseId.eq(owner))
            .one(conn)
            .await?
            .map(Attachment::from_cause),
    };
    found.ok_or_else(|| Error::not_found(format!("{} image {attachment_id}", target.kind())))
}

pub async fn list<C: ConnectionTrait>(conn: &C, target: AttachmentTarget) -> Result<Vec<Attachment>> {
    let rows = match target {
        AttachmentTarget::Contribution(owner) => contribution_image::Entity::find()
            .filter(contribution_image::Column::ContributionId.eq(owner))
            .order_by_asc(contribution_image::Column::Id)
            .all(conn)
            .await?
            .into_iter()
            .map(Attachment::from_contribution)
            .collect(),
        AttachmentTarget::Cause(owner) => cause_image::Entity::find()
            .filter(cause_image::Column::CauseId.eq(owner))
            .order_by_asc(cause_image::Column::Id)
            .all(conn)
            .await?
            .into_iter()
            .map(Attachment::from_cause)
            .collect(),
    };
    Ok(rows)
}

/// Point an attachment at `url`, provided it still points at `expected_url`.
/// `NotFound` when no row matched.
pub async fn update_url<C: ConnectionTrait>(
    conn: &C,
    target: AttachmentTarget,
    attachment_id: i32,
    expected_url: &str,
    url: &str,
) -> Result<Attachment> {
    let affected = match target {
        AttachmentTarget::Contribution(owner) => {
            contribution_image::Entity::update_many()
                .col_expr(contribution_image::Column::Url, Expr::value(url))
                .filter(contribution_image::Column::Id.eq(attachment_id))
                .filter(contribution_image::Column::ContributionId.eq(owner))
                .filter(contribution_image::Column::Url.eq(expected_url))
                .exec(conn)
                .await?
                .rows_affected
        }
        AttachmentTarget::Cause(owner) => {
            cause_image::Entity::update_many()
                .col_expr(cause_image::Column::Url, Expr::value(url))
                .filter(cause_image::Column::Id.eq(attachment_id))
                .filter(cause_image::Column::CauseId.eq(owner))
                .filter(cause_image::Column::Url.eq(expected_url))
                .exec(conn)
                .await?
                .rows_affected
        }
    };
    if affected == 0 {
        return Err(Error::not_found(format!("{} image {attachment_id}", target.kind())));
    }
    find(conn, target, attachment_id).await
}

/// Delete one attachment row. `NotFound` when nothing matched.
pub async fn delete<C: ConnectionTrait>(conn: &C, target: AttachmentTarget, attachment_id: i32) -> Result<()> {
    let affected = match target {
        AttachmentTarget::Contribution(owner) => {
            contribution_image::Entity::delete_many()
                .filter(contribution_image::Column::Id.eq(attachment_id))
                .filter(contribution_image::Column::ContributionId.eq(owner))
                .exec(conn)
                .await?
                .rows_affected
        }
        AttachmentTarget::Cause(owner) => {
            cause_image::Entity::delete_many()
                .filter(cause_image::Column::Id.eq(attachment_id))
                .filter(cause_image::Column::CauseId.eq(owner))
                .exec(conn)
                .await?
                .rows_affected
        }
    };
    if affected == 0 {
        return Err(Error::not_found(format!("{} image {attachment_id}", target.kind())));
    }
    Ok(())
}

/// Delete every attachment row of `target`, returning what was removed.
pub async fn delete_all<C: ConnectionTrait>(conn: &C, target: AttachmentTarget) -> Result<Vec<Attachment>> {
    let existing = list(conn, target).await?;
    match target {
        AttachmentTarget::Contribution(owner) => {
            contribution_image::Entity::delete_many()
                .filter(contribution_image::Column::ContributionId.eq(owner))
                .exec(conn)
                .await?;
        }
        AttachmentTarget::Cause(owner) => {
            cause_image::Entity::delete_many()
                .filter(cause_image::Column::CauseId.eq(owner))
                .exec(conn)
                .await?;
        }
    }
    Ok(existing)
}

/// Every URL currently referenced by a row of the folder's table.
pub async fn live_urls<C: ConnectionTrait>(conn: &C, folder: Folder) -> Result<Vec<String>> {
    let urls = match folder {
        Folder::Contributions => {
            contribution_image::Entity::find()
                .select_only()
                .column(contribution_image::Column::Url)
                .into_tuple::<String>()
                .all(conn)
                .await?
        }
        Folder::Causes => {
            cause_image::Entity::find()
                .select_only()
                .column(cause_image::Column::Url)
                .into_tuple::<String>()
                .all(conn)
                .await?
        }
    };
    Ok(urls)
}
