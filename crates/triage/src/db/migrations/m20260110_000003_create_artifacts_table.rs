//! Migration to create the artifacts table.

use sea_orm_migration::{prelude::*, schema::*};

use super::m20260110_000002_create_reports_table::Reports;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Artifacts::Table)
                    .if_not_exists()
                    .col(string(Artifacts::Id).primary_key())
                    .col(string(Artifacts::ReportId).not_null())
                    .col(string(Artifacts::DataType).not_null())
                    .col(text_null(Artifacts::Data))
                    .col(string_null(Artifacts::AttachmentId))
                    .col(string_null(Artifacts::AttachmentName))
                    .col(string_null(Artifacts::AttachmentContentType))
                    .col(big_integer_null(Artifacts::AttachmentSize))
                    .col(string_null(Artifacts::AttachmentHash))
                    .col(timestamp_with_time_zone(Artifacts::CreatedAt).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_artifacts_report_id")
                            .from(Artifacts::Table, Artifacts::ReportId)
                            .to(Reports::Table, Reports::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_artifacts_report_id")
                    .table(Artifacts::Table)
                    .col(Artifacts::ReportId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Artifacts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Artifacts {
    Table,
    Id,
    ReportId,
    DataType,
    Data,
    AttachmentId,
    AttachmentName,
    AttachmentContentType,
    AttachmentSize,
    AttachmentHash,
    CreatedAt,
}
