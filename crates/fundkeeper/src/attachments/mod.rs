//! Image attachments: blobs in the object store, indexed by rows in the
//! contribution/cause image tables.
//!
//! The two systems share no transaction. Writes are ordered so that a row never
//! points at a missing object: create is object then row, replace is object then
//! row then old-object delete, delete is row then object. An object left behind
//! by a failed compensation is an orphan, which the sweep reclaims.

pub mod naming;
pub mod repo;

use std::{fmt, sync::Arc};

use entity::{cause, contribution};
use futures::{future::join_all, FutureExt};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, TransactionTrait};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::StorageConfig;
use crate::db;
use crate::error::{Error, Result};
use crate::saga::{Compensation, Saga};
use crate::storage::{Folder, ObjectStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AttachmentTarget {
    Contribution(i32),
    Cause(i32),
}

impl AttachmentTarget {
    pub fn owner_id(&self) -> i32 {
        match self {
            AttachmentTarget::Contribution(id) | AttachmentTarget::Cause(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            AttachmentTarget::Contribution(_) => "contribution",
            AttachmentTarget::Cause(_) => "cause",
        }
    }

    pub fn folder(&self) -> Folder {
        match self {
            AttachmentTarget::Contribution(_) => Folder::Contributions,
            AttachmentTarget::Cause(_) => Folder::Causes,
        }
    }
}

impl fmt::Display for AttachmentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.owner_id())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub id: i32,
    pub target: AttachmentTarget,
    pub url: String,
    pub created_at: i64,
}

#[derive(Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub original_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("original_name", &self.original_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadLimits {
    pub max_files: usize,
    pub max_file_size_bytes: usize,
}

impl From<&StorageConfig> for UploadLimits {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_files: config.max_files,
            max_file_size_bytes: config.max_file_size_bytes,
        }
    }
}

/// Reject a batch before anything is sent to the object store.
pub fn validate_uploads(files: &[UploadFile], limits: UploadLimits) -> Result<()> {
    if files.is_empty() {
        return Err(Error::validation("no images uploaded"));
    }
    if files.len() > limits.max_files {
        return Err(Error::validation(format!(
            "too many images: {} (max {})",
            files.len(),
            limits.max_files
        )));
    }
    for file in files {
        if !file.mime_type.trim().to_ascii_lowercase().starts_with("image/") {
            return Err(Error::validation(format!(
                "{} is not an image ({})",
                file.original_name, file.mime_type
            )));
        }
        if file.bytes.is_empty() {
            return Err(Error::validation(format!("{} is empty", file.original_name)));
        }
        if file.bytes.len() > limits.max_file_size_bytes {
            return Err(Error::validation(format!(
                "{} exceeds the {} byte limit",
                file.original_name, limits.max_file_size_bytes
            )));
        }
    }
    Ok(())
}

/// What `cascade_cleanup` removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CascadeOutcome {
    pub removed: Vec<Attachment>,
    /// Objects whose remote delete failed; left for the sweep.
    pub orphaned: usize,
}

#[derive(Clone)]
pub struct AttachmentSaga {
    db: DatabaseConnection,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    limits: UploadLimits,
}

impl AttachmentSaga {
    pub fn new(
        db: DatabaseConnection,
        store: Arc<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
        limits: UploadLimits,
    ) -> Self {
        Self {
            db,
            store,
            clock,
            limits,
        }
    }

    pub async fn list(&self, target: AttachmentTarget) -> Result<Vec<Attachment>> {
        repo::owner_name_parts(&self.db, target).await?;
        repo::list(&self.db, target).await
    }

    /// Upload and index `files` for `target`, all or nothing.
    ///
    /// If any upload or insert fails, rows and objects created by this call are
    /// removed again before the error is returned.
    pub async fn attach(&self, target: AttachmentTarget, files: Vec<UploadFile>) -> Result<Vec<Attachment>> {
        validate_uploads(&files, self.limits)?;
        let base = repo::owner_name_parts(&self.db, target).await?.base_name();
        let total = files.len();

        let mut saga = Saga::new("attach");
        let mut created = Vec::with_capacity(total);
        for (index, file) in files.into_iter().enumerate() {
            let name = naming::file_name(&base, &file.original_name, &file.mime_type, index, total);
            let (attachment, object_id) = saga
                .step("upload and index", self.upload_and_insert(target, name, file), |(a, object_id)| {
                    self.unlink(target, a.id, object_id.clone())
                })
                .await?;
            debug!(%target, attachment_id = attachment.id, object_id, "Attachment stored");
            created.push(attachment);
        }
        saga.complete();

        info!(%target, count = created.len(), "Attachments added");
        Ok(created)
    }

    /// One file: object first, then its row. A failed insert deletes the object.
    async fn upload_and_insert(
        &self,
        target: AttachmentTarget,
        name: String,
        file: UploadFile,
    ) -> Result<(Attachment, String)> {
        let UploadFile { mime_type, bytes, .. } = file;
        let mut saga = Saga::new("attach file");
        let stored = saga
            .step(
                "upload",
                async {
                    self.store
                        .upload(target.folder(), bytes, &mime_type, &name)
                        .await
                        .map_err(Error::from)
                },
                |obj| self.delete_object(obj.id.clone()),
            )
            .await?;
        let now = self.clock.now();
        let attachment = saga
            .run("insert row", repo::insert(&self.db, target, &stored.public_url, now))
            .await?;
        saga.complete();
        Ok((attachment, stored.id))
    }

    /// Swap the object behind an attachment.
    ///
    /// The old object is deleted only after the row points at the new one; if the
    /// row update fails the new object is deleted and the old one kept.
    pub async fn replace(&self, target: AttachmentTarget, attachment_id: i32, file: UploadFile) -> Result<Attachment> {
        validate_uploads(std::slice::from_ref(&file), self.limits)?;
        let base = repo::owner_name_parts(&self.db, target).await?.base_name();
        let existing = repo::find(&self.db, target, attachment_id).await?;
        let name = naming::file_name(&base, &file.original_name, &file.mime_type, 0, 1);
        let UploadFile { mime_type, bytes, .. } = file;

        let mut saga = Saga::new("replace");
        let stored = saga
            .step(
                "upload",
                async {
                    self.store
                        .upload(target.folder(), bytes, &mime_type, &name)
                        .await
                        .map_err(Error::from)
                },
                |obj| self.delete_object(obj.id.clone()),
            )
            .await?;
        let updated = saga
            .run(
                "update row",
                self.swap_url(target, attachment_id, &existing.url, &stored.public_url),
            )
            .await?;
        saga.complete();

        self.discard_url(&existing.url).await;
        info!(%target, attachment_id, "Attachment replaced");
        Ok(updated)
    }

    async fn swap_url(&self, target: AttachmentTarget, attachment_id: i32, old_url: &str, new_url: &str) -> Result<Attachment> {
        match repo::update_url(&self.db, target, attachment_id, old_url, new_url).await {
            Err(Error::NotFound(_)) => match repo::find(&self.db, target, attachment_id).await {
                Ok(_) => Err(Error::Conflict(format!("{} image {attachment_id} changed concurrently", target.kind()))),
                Err(e) => Err(e),
            },
            other => other,
        }
    }

    /// Delete the row, then try to delete its object. A failed object delete
    /// leaves an orphan behind but the removal still succeeds.
    pub async fn remove(&self, target: AttachmentTarget, attachment_id: i32) -> Result<Attachment> {
        repo::owner_name_parts(&self.db, target).await?;
        let existing = repo::find(&self.db, target, attachment_id).await?;
        repo::delete(&self.db, target, attachment_id).await?;
        self.discard_url(&existing.url).await;
        info!(%target, attachment_id, "Attachment removed");
        Ok(existing)
    }

    /// Delete the owner and all its attachment rows in one transaction, then
    /// delete the objects concurrently, best effort.
    pub async fn cascade_cleanup(&self, target: AttachmentTarget) -> Result<CascadeOutcome> {
        let txn = self.db.begin().await?;
        let outcome: Result<Vec<Attachment>> = async {
            let removed = repo::delete_all(&txn, target).await?;
            let affected = match target {
                AttachmentTarget::Contribution(id) => {
                    contribution::Entity::delete_many()
                        .filter(contribution::Column::Id.eq(id))
                        .exec(&txn)
                        .await?
                        .rows_affected
                }
                AttachmentTarget::Cause(id) => {
                    cause::Entity::delete_many()
                        .filter(cause::Column::Id.eq(id))
                        .exec(&txn)
                        .await?
                        .rows_affected
                }
            };
            if affected == 0 {
                return Err(Error::not_found(target.to_string()));
            }
            Ok(removed)
        }
        .await;
        let removed = db::finish(txn, outcome).await?;

        let results = join_all(removed.iter().map(|a| self.discard_url(&a.url))).await;
        let orphaned = results.into_iter().filter(|ok| !ok).count();
        info!(%target, images = removed.len(), orphaned, "Owner deleted with its attachments");
        Ok(CascadeOutcome { removed, orphaned })
    }

    fn delete_object(&self, object_id: String) -> Compensation<'_> {
        async move { self.store.delete(&object_id).await.map_err(Error::from) }.boxed()
    }

    /// Compensation for a fully stored file. The object is only deleted once
    /// its row is gone, so a failed row delete never leaves a dangling row.
    fn unlink(&self, target: AttachmentTarget, attachment_id: i32, object_id: String) -> Compensation<'_> {
        async move {
            match repo::delete(&self.db, target, attachment_id).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            self.store.delete(&object_id).await.map_err(Error::from)
        }
        .boxed()
    }

    /// Best-effort delete of the object behind `url`. Returns whether it is gone.
    async fn discard_url(&self, url: &str) -> bool {
        let Some(id) = self.store.id_from_url(url) else {
            warn!(url, "Cannot derive object id from URL, leaving it for the sweep");
            return false;
        };
        match self.store.delete(&id).await {
            Ok(()) => true,
            Err(e) => {
                metrics::counter!("attachment_object_delete_failures_total").increment(1);
                warn!(object_id = %id, error = %e, "Failed to delete object, leaving it for the sweep");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, mime: &str, len: usize) -> UploadFile {
        UploadFile {
            original_name: name.to_string(),
            mime_type: mime.to_string(),
            bytes: vec![7; len],
        }
    }

    const LIMITS: UploadLimits = UploadLimits {
        max_files: 2,
        max_file_size_bytes: 10,
    };

    #[test]
    fn rejects_empty_batches() {
        assert!(matches!(validate_uploads(&[], LIMITS), Err(Error::ValidationFailed(_))));
    }

    #[test]
    fn rejects_too_many_or_too_large() {
        let three = vec![file("a.png", "image/png", 1); 3];
        assert!(validate_uploads(&three, LIMITS).is_err());
        assert!(validate_uploads(&[file("a.png", "image/png", 11)], LIMITS).is_err());
        assert!(validate_uploads(&[file("a.png", "image/png", 10)], LIMITS).is_ok());
    }

    #[test]
    fn rejects_non_images() {
        let err = validate_uploads(&[file("a.pdf", "application/pdf", 1)], LIMITS).unwrap_err();
        assert!(err.to_string().contains("not an image"));
    }

    #[test]
    fn targets_map_to_folders() {
        assert_eq!(AttachmentTarget::Cause(7).folder(), Folder::Causes);
        assert_eq!(AttachmentTarget::Contribution(1).to_string(), "contribution 1");
    }
}
