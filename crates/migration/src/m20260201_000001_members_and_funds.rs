use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Members::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Members::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Members::Name).string_len(100).not_null())
                    .col(ColumnDef::new(Members::Email).string_len(100).unique_key())
                    .col(ColumnDef::new(Members::Phone).string_len(15))
                    .col(ColumnDef::new(Members::PasswordHash).string_len(255).not_null())
                    .col(
                        ColumnDef::new(Members::IsAdmin)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Members::EmailVerified)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Members::EmailVerifiedAt).big_integer())
                    .col(ColumnDef::new(Members::JoinedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Contributions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Contributions::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Contributions::MemberId).integer().not_null())
                    .col(ColumnDef::new(Contributions::AmountCents).big_integer().not_null())
                    .col(ColumnDef::new(Contributions::ContributedDate).date().not_null())
                    .col(ColumnDef::new(Contributions::CreatedAt).big_integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_contributions_member_id")
                            .from(Contributions::Table, Contributions::MemberId)
                            .to(Members::Table, Members::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_contributions_member_id")
                    .table(Contributions::Table)
                    .col(Contributions::MemberId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Causes::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Causes::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Causes::Title).string_len(150).not_null())
                    .col(ColumnDef::new(Causes::Description).text())
                    .col(ColumnDef::new(Causes::AmountCents).big_integer())
                    .col(ColumnDef::new(Causes::CreatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Causes::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Contributions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Members::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Members {
    Table,
    Id,
    Name,
    Email,
    Phone,
    PasswordHash,
    IsAdmin,
    EmailVerified,
    EmailVerifiedAt,
    JoinedAt,
}

#[derive(DeriveIden)]
enum Contributions {
    Table,
    Id,
    MemberId,
    AmountCents,
    ContributedDate,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Causes {
    Table,
    Id,
    Title,
    Description,
    AmountCents,
    CreatedAt,
}
