use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SecretTokens::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SecretTokens::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SecretTokens::MemberId).integer().not_null())
                    .col(ColumnDef::new(SecretTokens::Kind).text().not_null())
                    .col(
                        ColumnDef::new(SecretTokens::TokenHash)
                            .text()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(SecretTokens::IssuedAt).big_integer().not_null())
                    .col(ColumnDef::new(SecretTokens::ExpiresAt).big_integer().not_null())
                    .col(ColumnDef::new(SecretTokens::ConsumedAt).big_integer())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_secret_tokens_member_id")
                            .from(SecretTokens::Table, SecretTokens::MemberId)
                            .to(Members::Table, Members::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Supersede/lookup path: active tokens of one kind for one member.
        manager
            .create_index(
                Index::create()
                    .name("idx_secret_tokens_member_kind")
                    .table(SecretTokens::Table)
                    .col(SecretTokens::MemberId)
                    .col(SecretTokens::Kind)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let _ = manager
            .drop_index(
                Index::drop()
                    .name("idx_secret_tokens_member_kind")
                    .to_owned(),
            )
            .await;

        manager
            .drop_table(Table::drop().table(SecretTokens::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Members {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum SecretTokens {
    Table,
    Id,
    MemberId,
    Kind,
    TokenHash,
    IssuedAt,
    ExpiresAt,
    ConsumedAt,
}
