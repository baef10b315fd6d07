use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Image metadata (bytes live in the object store; rows are the live set).
        manager
            .create_table(
                Table::create()
                    .table(ContributionImages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ContributionImages::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ContributionImages::ContributionId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ContributionImages::Url).text().not_null())
                    .col(
                        ColumnDef::new(ContributionImages::CreatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_contribution_images_contribution_id")
                            .from(ContributionImages::Table, ContributionImages::ContributionId)
                            .to(Contributions::Table, Contributions::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_contribution_images_contribution_id")
                    .table(ContributionImages::Table)
                    .col(ContributionImages::ContributionId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CauseImages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CauseImages::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CauseImages::CauseId).integer().not_null())
                    .col(ColumnDef::new(CauseImages::Url).text().not_null())
                    .col(ColumnDef::new(CauseImages::CreatedAt).big_integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_cause_images_cause_id")
                            .from(CauseImages::Table, CauseImages::CauseId)
                            .to(Causes::Table, Causes::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_cause_images_cause_id")
                    .table(CauseImages::Table)
                    .col(CauseImages::CauseId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CauseImages::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ContributionImages::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Contributions {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Causes {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum ContributionImages {
    Table,
    Id,
    ContributionId,
    Url,
    CreatedAt,
}

#[derive(DeriveIden)]
enum CauseImages {
    Table,
    Id,
    CauseId,
    Url,
    CreatedAt,
}
