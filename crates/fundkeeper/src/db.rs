use std::time::Duration;

use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DatabaseTransaction};
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::error::Result;

pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(config.url.clone());

    options.max_connections(config.max_connections);
    options.min_connections(0);
    options.connect_timeout(Duration::from_secs(5));
    options.acquire_timeout(Duration::from_secs(10));
    options.idle_timeout(Duration::from_secs(300));
    options.sqlx_logging(false);

    let db = Database::connect(options).await?;
    info!(max_connections = config.max_connections, "Database connected");
    Ok(db)
}

/// Apply pending migrations; `steps = None` applies all of them.
/// Returns how many were applied.
pub async fn migrate(db: &DatabaseConnection, steps: Option<u32>) -> Result<usize> {
    let pending = Migrator::get_pending_migrations(db).await?.len();
    let to_apply = steps.map_or(pending, |s| pending.min(s as usize));
    Migrator::up(db, steps).await?;
    info!(applied = to_apply, remaining = pending - to_apply, "Migrations applied");
    Ok(to_apply)
}

/// Commit `txn` when `outcome` is `Ok`, roll back otherwise.
///
/// A rollback failure is logged; the original error is what the caller sees.
pub async fn finish<T>(txn: DatabaseTransaction, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = txn.rollback().await {
                warn!(error = %rollback, "Transaction rollback failed");
            }
            Err(e)
        }
    }
}
