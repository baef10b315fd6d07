pub use sea_orm_migration::prelude::*;

mod m20260201_000001_members_and_funds;
mod m20260201_000002_secret_tokens;
mod m20260201_000003_image_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260201_000001_members_and_funds::Migration),
            Box::new(m20260201_000002_secret_tokens::Migration),
            Box::new(m20260201_000003_image_tables::Migration),
        ]
    }
}
