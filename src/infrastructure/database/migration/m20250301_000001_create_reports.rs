//! Create the reports queue table

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create the table first
        manager
            .create_table(
                Table::create()
                    .table(Reports::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Reports::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Reports::CorrelationId)
                            .text()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Reports::CanonicalId).text())
                    .col(ColumnDef::new(Reports::IncidentType).string().not_null())
                    .col(ColumnDef::new(Reports::Severity).small_integer().not_null())
                    .col(ColumnDef::new(Reports::Description).text())
                    .col(ColumnDef::new(Reports::Latitude).double())
                    .col(ColumnDef::new(Reports::Longitude).double())
                    .col(ColumnDef::new(Reports::AttachmentPath).text())
                    .col(ColumnDef::new(Reports::AttachmentUrl).text())
                    .col(ColumnDef::new(Reports::SyncState).string().not_null())
                    .col(
                        ColumnDef::new(Reports::RetryCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Reports::NextAttemptAt).timestamp())
                    .col(ColumnDef::new(Reports::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Reports::SyncedAt).timestamp())
                    .to_owned(),
            )
            .await?;

        // Create indexes separately
        manager
            .create_index(
                Index::create()
                    .name("idx_reports_sync_state")
                    .table(Reports::Table)
                    .col(Reports::SyncState)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_reports_incident_type")
                    .table(Reports::Table)
                    .col(Reports::IncidentType)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_reports_created_at")
                    .table(Reports::Table)
                    .col(Reports::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Reports::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(super) enum Reports {
    Table,
    Id,
    CorrelationId,
    CanonicalId,
    IncidentType,
    Severity,
    Description,
    Latitude,
    Longitude,
    AttachmentPath,
    AttachmentUrl,
    SyncState,
    RetryCount,
    NextAttemptAt,
    CreatedAt,
    SyncedAt,
}
