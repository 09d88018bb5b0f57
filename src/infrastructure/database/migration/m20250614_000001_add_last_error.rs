//! Add last_error column so failed submissions carry their failure reason
//!
//! Must not disturb unsynced rows; the column is nullable with no default
//! rewrite, so existing queue entries survive the upgrade untouched.

use sea_orm_migration::prelude::*;

use super::m20250301_000001_create_reports::Reports;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Reports::Table)
                    .add_column(ColumnDef::new(LastError::LastError).text())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .alter_table(
                Table::alter()
                    .table(Reports::Table)
                    .drop_column(LastError::LastError)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
enum LastError {
    LastError,
}
