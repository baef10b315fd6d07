//! Reclaims objects no attachment row references.
//!
//! Objects younger than the grace period are left alone: an `attach` call may
//! have uploaded them and not yet inserted the row. The sweep only ever deletes
//! objects; it never touches attachment rows.

use std::{collections::HashSet, sync::Arc, time::Duration};

use sea_orm::DatabaseConnection;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::attachments::repo;
use crate::clock::Clock;
use crate::error::Result;
use crate::storage::{Folder, ObjectStore};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub listed: usize,
    pub live: usize,
    pub too_recent: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl SweepReport {
    fn merge(self, other: SweepReport) -> SweepReport {
        SweepReport {
            listed: self.listed + other.listed,
            live: self.live + other.live,
            too_recent: self.too_recent + other.too_recent,
            deleted: self.deleted + other.deleted,
            failed: self.failed + other.failed,
        }
    }
}

pub struct OrphanSweeper {
    db: DatabaseConnection,
    store: Arc<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    grace: Duration,
}

impl OrphanSweeper {
    pub fn new(db: DatabaseConnection, store: Arc<dyn ObjectStore>, clock: Arc<dyn Clock>, grace: Duration) -> Self {
        Self {
            db,
            store,
            clock,
            grace,
        }
    }

    /// Sweep one folder. With `dry_run` nothing is deleted; `deleted` then
    /// counts what would have been.
    pub async fn sweep(&self, folder: Folder, dry_run: bool) -> Result<SweepReport> {
        let objects = self.store.list(folder).await?;
        let live: HashSet<String> = repo::live_urls(&self.db, folder)
            .await?
            .iter()
            .filter_map(|url| self.store.id_from_url(url))
            .collect();
        let cutoff = self.clock.now() - i64::try_from(self.grace.as_secs()).unwrap_or(i64::MAX);

        let mut report = SweepReport {
            listed: objects.len(),
            ..Default::default()
        };
        for object in objects {
            if live.contains(&object.id) {
                report.live += 1;
                continue;
            }
            if object.created_at > cutoff {
                report.too_recent += 1;
                continue;
            }
            if dry_run {
                info!(folder = folder.name(), object_id = %object.id, object_name = %object.name, "Would delete orphan");
                report.deleted += 1;
                continue;
            }
            match self.store.delete(&object.id).await {
                Ok(()) => {
                    metrics::counter!("orphan_objects_deleted_total", "folder" => folder.name()).increment(1);
                    debug!(folder = folder.name(), object_id = %object.id, "Orphan deleted");
                    report.deleted += 1;
                }
                Err(e) => {
                    warn!(folder = folder.name(), object_id = %object.id, error = %e, "Failed to delete orphan");
                    report.failed += 1;
                }
            }
        }

        info!(
            folder = folder.name(),
            dry_run,
            listed = report.listed,
            live = report.live,
            too_recent = report.too_recent,
            deleted = report.deleted,
            failed = report.failed,
            "Orphan sweep finished"
        );
        Ok(report)
    }

    pub async fn sweep_all(&self, dry_run: bool) -> Result<SweepReport> {
        let contributions = self.sweep(Folder::Contributions, dry_run).await?;
        let causes = self.sweep(Folder::Causes, dry_run).await?;
        Ok(contributions.merge(causes))
    }

    /// Sweep every `interval` until the task is cancelled. Failed rounds are
    /// logged and retried on the next tick.
    pub async fn run_periodic(&self, interval: Duration, dry_run: bool) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_all(dry_run).await {
                error!(error = %e, "Orphan sweep failed");
            }
        }
    }
}
