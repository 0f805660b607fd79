//! Initial migration to create the jobs table.

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Jobs::Table)
                    .if_not_exists()
                    .col(string(Jobs::Id).primary_key())
                    .col(string(Jobs::AnalyzerDefinitionId).not_null())
                    .col(string(Jobs::AnalyzerId).not_null())
                    .col(string(Jobs::AnalyzerName).not_null())
                    .col(string(Jobs::Organization).not_null())
                    .col(string(Jobs::DataType).not_null())
                    .col(integer(Jobs::Tlp).not_null().default(2))
                    .col(text_null(Jobs::Message))
                    .col(text(Jobs::Parameters).not_null())
                    .col(text_null(Jobs::Data))
                    .col(string_null(Jobs::AttachmentId))
                    .col(string_null(Jobs::AttachmentName))
                    .col(string_null(Jobs::AttachmentContentType))
                    .col(big_integer_null(Jobs::AttachmentSize))
                    .col(string_null(Jobs::AttachmentHash))
                    .col(string(Jobs::Status).not_null().default("Waiting"))
                    .col(timestamp_with_time_zone(Jobs::CreatedAt).not_null())
                    .col(timestamp_with_time_zone_null(Jobs::StartDate))
                    .col(timestamp_with_time_zone_null(Jobs::EndDate))
                    .col(text_null(Jobs::Input))
                    .to_owned(),
            )
            .await?;

        // Recovery scans and the claim update filter on status.
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_status")
                    .table(Jobs::Table)
                    .col(Jobs::Status)
                    .to_owned(),
            )
            .await?;

        // Rate-limit window: count by analyzer within a created_at range.
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_analyzer_created_at")
                    .table(Jobs::Table)
                    .col(Jobs::AnalyzerId)
                    .col(Jobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Org-scoped listings, newest first.
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_organization_created_at")
                    .table(Jobs::Table)
                    .col(Jobs::Organization)
                    .col(Jobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Similar-job lookups match analyzer, data type and tlp before
        // comparing the observable.
        manager
            .create_index(
                Index::create()
                    .name("idx_jobs_cache_fingerprint")
                    .table(Jobs::Table)
                    .col(Jobs::AnalyzerId)
                    .col(Jobs::DataType)
                    .col(Jobs::Tlp)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Jobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(super) enum Jobs {
    Table,
    Id,
    AnalyzerDefinitionId,
    AnalyzerId,
    AnalyzerName,
    Organization,
    DataType,
    Tlp,
    Message,
    Parameters,
    Data,
    AttachmentId,
    AttachmentName,
    AttachmentContentType,
    AttachmentSize,
    AttachmentHash,
    Status,
    CreatedAt,
    StartDate,
    EndDate,
    Input,
}
