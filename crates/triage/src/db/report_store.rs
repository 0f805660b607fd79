//! Report store: reports and their extracted artifacts.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use super::entities::{artifact, report};
use crate::error::StoreError;
use crate::model::Attachment;

/// Attributes of an artifact about to be attached to a report.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArtifact {
    pub data_type: String,
    pub data: Option<String>,
    pub attachment: Option<Attachment>,
}

/// Substring filters for artifact lookups within one report.
#[derive(Debug, Default, Clone)]
pub struct ArtifactFilter {
    pub data_type: Option<String>,
    pub data: Option<String>,
}

/// Orderings the artifact read path understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArtifactSort {
    /// Insertion order, oldest first.
    #[default]
    CreatedAsc,
    CreatedDesc,
    /// Grouped by observable type, ties broken by insertion order.
    DataType,
}

pub struct ReportStore {
    conn: DatabaseConnection,
}

impl ReportStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Persists the report of a job. The unique index on `job_id`
    /// enforces the one-report-per-job invariant.
    pub async fn create(
        &self,
        job_id: &str,
        full: String,
        summary: String,
    ) -> Result<report::Model, StoreError> {
        let model = report::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            job_id: Set(job_id.to_string()),
            full: Set(full),
            summary: Set(summary),
            created_at: Set(Utc::now()),
        };
        Ok(model.insert(&self.conn).await?)
    }

    pub async fn add_artifact(
        &self,
        report_id: &str,
        new: NewArtifact,
    ) -> Result<artifact::Model, StoreError> {
        let attachment = new.attachment;
        let model = artifact::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            report_id: Set(report_id.to_string()),
            data_type: Set(new.data_type),
            data: Set(new.data),
            attachment_id: Set(attachment.as_ref().map(|a| a.id.clone())),
            attachment_name: Set(attachment.as_ref().map(|a| a.name.clone())),
            attachment_content_type: Set(attachment.as_ref().map(|a| a.content_type.clone())),
            attachment_size: Set(attachment.as_ref().map(|a| a.size)),
            attachment_hash: Set(attachment.as_ref().map(|a| a.hash.clone())),
            created_at: Set(Utc::now()),
        };
        Ok(model.insert(&self.conn).await?)
    }

    /// The single report of a job, if the job produced one.
    pub async fn for_job(&self, job_id: &str) -> Result<Option<report::Model>, StoreError> {
        Ok(report::Entity::find()
            .filter(report::Column::JobId.eq(job_id))
            .one(&self.conn)
            .await?)
    }

    /// Artifacts of a report matching the filter, with the total count
    /// before pagination.
    pub async fn artifacts(
        &self,
        report_id: &str,
        filter: &ArtifactFilter,
        sort: ArtifactSort,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<(Vec<artifact::Model>, u64), StoreError> {
        let mut query = artifact::Entity::find().filter(artifact::Column::ReportId.eq(report_id));

        if let Some(data_type) = &filter.data_type {
            query = query.filter(artifact::Column::DataType.contains(data_type));
        }
        if let Some(data) = &filter.data {
            query = query.filter(artifact::Column::Data.contains(data));
        }

        let total = query.clone().count(&self.conn).await?;

        let query = match sort {
            ArtifactSort::CreatedAsc => query.order_by_asc(artifact::Column::CreatedAt),
            ArtifactSort::CreatedDesc => query.order_by_desc(artifact::Column::CreatedAt),
            ArtifactSort::DataType => query
                .order_by_asc(artifact::Column::DataType)
                .order_by_asc(artifact::Column::CreatedAt),
        };

        let models = query.offset(offset).limit(limit).all(&self.conn).await?;
        Ok((models, total))
    }
}
