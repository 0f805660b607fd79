//! Migration to create the reports table.

use sea_orm_migration::{prelude::*, schema::*};

use super::m20260110_000001_create_jobs_table::Jobs;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Reports::Table)
                    .if_not_exists()
                    .col(string(Reports::Id).primary_key())
                    .col(string(Reports::JobId).not_null())
                    .col(text(Reports::Full).not_null())
                    .col(text(Reports::Summary).not_null())
                    .col(timestamp_with_time_zone(Reports::CreatedAt).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_reports_job_id")
                            .from(Reports::Table, Reports::JobId)
                            .to(Jobs::Table, Jobs::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // One report per job.
        manager
            .create_index(
                Index::create()
                    .name("idx_reports_job_id")
                    .table(Reports::Table)
                    .col(Reports::JobId)
                    .unique()
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
    JobId,
    Full,
    Summary,
    CreatedAt,
}
