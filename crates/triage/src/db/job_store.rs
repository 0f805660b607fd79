//! Job store: create, claim, finish and query job rows.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use super::entities::job;
use crate::error::StoreError;
use crate::model::{JobStatus, ObservableInput};

/// Attributes of a job about to be persisted in Waiting state.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub analyzer_definition_id: String,
    pub analyzer_id: String,
    pub analyzer_name: String,
    pub organization: String,
    pub data_type: String,
    pub observable: ObservableInput,
    pub tlp: i32,
    pub message: String,
    /// Canonical JSON encoding of the job parameters.
    pub parameters: String,
}

/// Fingerprint used by the similar-job cache lookup.
#[derive(Debug, Clone)]
pub struct SimilarJobQuery<'a> {
    pub analyzer_id: &'a str,
    pub data_type: &'a str,
    pub tlp: i32,
    pub observable: &'a ObservableInput,
    /// Canonical JSON encoding; compared as a plain string.
    pub parameters: &'a str,
    pub started_after: DateTime<Utc>,
}

/// Substring filters for org-scoped job listings.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub data_type: Option<String>,
    pub data: Option<String>,
    /// Matches analyzer id or analyzer name.
    pub analyzer: Option<String>,
}

pub struct JobStore {
    conn: DatabaseConnection,
}

impl JobStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Persists a new job in Waiting state.
    pub async fn create(&self, new: NewJob) -> Result<job::Model, StoreError> {
        let (data, attachment) = match &new.observable {
            ObservableInput::Data(value) => (Some(value.clone()), None),
            ObservableInput::Attachment(attachment) => (None, Some(attachment.clone())),
        };

        let model = job::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            analyzer_definition_id: Set(new.analyzer_definition_id),
            analyzer_id: Set(new.analyzer_id),
            analyzer_name: Set(new.analyzer_name),
            organization: Set(new.organization),
            data_type: Set(new.data_type),
            tlp: Set(new.tlp),
            message: Set(if new.message.is_empty() {
                None
            } else {
                Some(new.message)
            }),
            parameters: Set(new.parameters),
            data: Set(data),
            attachment_id: Set(attachment.as_ref().map(|a| a.id.clone())),
            attachment_name: Set(attachment.as_ref().map(|a| a.name.clone())),
            attachment_content_type: Set(attachment.as_ref().map(|a| a.content_type.clone())),
            attachment_size: Set(attachment.as_ref().map(|a| a.size)),
            attachment_hash: Set(attachment.as_ref().map(|a| a.hash.clone())),
            status: Set(JobStatus::Waiting.as_str().to_string()),
            created_at: Set(Utc::now()),
            start_date: Set(None),
            end_date: Set(None),
            input: Set(None),
        };

        Ok(model.insert(&self.conn).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<job::Model>, StoreError> {
        Ok(job::Entity::find_by_id(id).one(&self.conn).await?)
    }

    /// Moves a Waiting job to InProgress and stamps its start date.
    ///
    /// The update fires only while the row is still Waiting, so when two
    /// runners race for the same job at most one gets it back; the loser
    /// receives `None`.
    pub async fn claim(&self, id: &str) -> Result<Option<job::Model>, StoreError> {
        let result = job::Entity::update_many()
            .col_expr(
                job::Column::Status,
                Expr::value(JobStatus::InProgress.as_str()),
            )
            .col_expr(job::Column::StartDate, Expr::value(Utc::now()))
            .filter(job::Column::Id.eq(id))
            .filter(job::Column::Status.eq(JobStatus::Waiting.as_str()))
            .exec(&self.conn)
            .await?;

        if result.rows_affected == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    /// Moves a job to a terminal state and stamps its end date.
    ///
    /// Only fires while the row is Waiting or InProgress; a job that
    /// already reached a terminal state is left untouched and `false` is
    /// returned.
    pub async fn finish(
        &self,
        id: &str,
        status: JobStatus,
        message: Option<String>,
        input: Option<String>,
    ) -> Result<bool, StoreError> {
        debug_assert!(matches!(status, JobStatus::Success | JobStatus::Failure));

        let mut update = job::Entity::update_many()
            .col_expr(job::Column::Status, Expr::value(status.as_str()))
            .col_expr(job::Column::EndDate, Expr::value(Utc::now()))
            .filter(job::Column::Id.eq(id))
            .filter(job::Column::Status.is_in([
                JobStatus::Waiting.as_str(),
                JobStatus::InProgress.as_str(),
            ]));

        if let Some(message) = message {
            update = update.col_expr(job::Column::Message, Expr::value(message));
        }
        if let Some(input) = input {
            update = update.col_expr(job::Column::Input, Expr::value(input));
        }

        let result = update.exec(&self.conn).await?;
        Ok(result.rows_affected > 0)
    }

    /// Soft delete: the row stays, its status becomes Deleted.
    pub async fn soft_delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = job::Entity::update_many()
            .col_expr(
                job::Column::Status,
                Expr::value(JobStatus::Deleted.as_str()),
            )
            .filter(job::Column::Id.eq(id))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Number of jobs created for an analyzer since the given instant.
    /// Used by the sliding rate-limit window; failed jobs count too.
    pub async fn count_for_analyzer_since(
        &self,
        analyzer_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        Ok(job::Entity::find()
            .filter(job::Column::AnalyzerId.eq(analyzer_id))
            .filter(job::Column::CreatedAt.gte(since))
            .count(&self.conn)
            .await?)
    }

    /// Most recent job matching the cache fingerprint, if any.
    pub async fn find_similar(
        &self,
        query: &SimilarJobQuery<'_>,
    ) -> Result<Option<job::Model>, StoreError> {
        let mut find = job::Entity::find()
            .filter(job::Column::AnalyzerId.eq(query.analyzer_id))
            .filter(job::Column::Status.is_not_in([
                JobStatus::Failure.as_str(),
                JobStatus::Deleted.as_str(),
            ]))
            .filter(job::Column::StartDate.gte(query.started_after))
            .filter(job::Column::DataType.eq(query.data_type))
            .filter(job::Column::Tlp.eq(query.tlp))
            .filter(job::Column::Parameters.eq(query.parameters));

        find = match query.observable {
            ObservableInput::Data(value) => find.filter(job::Column::Data.eq(value.as_str())),
            ObservableInput::Attachment(attachment) => {
                find.filter(job::Column::AttachmentId.eq(attachment.id.as_str()))
            }
        };

        Ok(find
            .order_by_desc(job::Column::CreatedAt)
            .one(&self.conn)
            .await?)
    }

    /// Org-scoped listing, newest first. Deleted jobs are hidden.
    /// Returns the page and the total count before pagination.
    pub async fn list(
        &self,
        organization: &str,
        filter: &JobFilter,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<(Vec<job::Model>, u64), StoreError> {
        let mut query = job::Entity::find()
            .filter(job::Column::Organization.eq(organization))
            .filter(job::Column::Status.ne(JobStatus::Deleted.as_str()));

        if let Some(data_type) = &filter.data_type {
            query = query.filter(job::Column::DataType.contains(data_type));
        }
        if let Some(data) = &filter.data {
            query = query.filter(job::Column::Data.contains(data));
        }
        if let Some(analyzer) = &filter.analyzer {
            query = query.filter(
                Condition::any()
                    .add(job::Column::AnalyzerId.contains(analyzer))
                    .add(job::Column::AnalyzerName.contains(analyzer)),
            );
        }

        let total = query.clone().count(&self.conn).await?;

        let models = query
            .order_by_desc(job::Column::CreatedAt)
            .offset(offset)
            .limit(limit)
            .all(&self.conn)
            .await?;

        Ok((models, total))
    }

    /// All jobs still in Waiting state, oldest first. Recovery input.
    pub async fn waiting(&self) -> Result<Vec<job::Model>, StoreError> {
        Ok(job::Entity::find()
            .filter(job::Column::Status.eq(JobStatus::Waiting.as_str()))
            .order_by_asc(job::Column::CreatedAt)
            .all(&self.conn)
            .await?)
    }

    /// Fails InProgress jobs whose start date is older than the cutoff.
    /// A crash mid-execution would otherwise pin them there forever.
    pub async fn fail_stale_in_progress(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = job::Entity::update_many()
            .col_expr(
                job::Column::Status,
                Expr::value(JobStatus::Failure.as_str()),
            )
            .col_expr(job::Column::EndDate, Expr::value(Utc::now()))
            .col_expr(
                job::Column::Message,
                Expr::value("Job abandoned by a previous run"),
            )
            .filter(job::Column::Status.eq(JobStatus::InProgress.as_str()))
            .filter(job::Column::StartDate.lt(started_before))
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected)
    }

    /// Job counts for one organisation, grouped by status and analyzer.
    pub async fn stats(&self, organization: &str) -> Result<serde_json::Value, StoreError> {
        let by_status: Vec<(String, i64)> = job::Entity::find()
            .select_only()
            .column(job::Column::Status)
            .column_as(job::Column::Id.count(), "count")
            .filter(job::Column::Organization.eq(organization))
            .group_by(job::Column::Status)
            .into_tuple()
            .all(&self.conn)
            .await?;

        let by_analyzer: Vec<(String, i64)> = job::Entity::find()
            .select_only()
            .column(job::Column::AnalyzerName)
            .column_as(job::Column::Id.count(), "count")
            .filter(job::Column::Organization.eq(organization))
            .group_by(job::Column::AnalyzerName)
            .into_tuple()
            .all(&self.conn)
            .await?;

        let total: i64 = by_status.iter().map(|(_, count)| count).sum();

        let mut status_map = serde_json::Map::new();
        for (status, count) in by_status {
            status_map.insert(status, serde_json::Value::from(count));
        }
        let mut analyzer_map = serde_json::Map::new();
        for (analyzer, count) in by_analyzer {
            analyzer_map.insert(analyzer, serde_json::Value::from(count));
        }

        Ok(serde_json::json!({
            "total": total,
            "byStatus": status_map,
            "byAnalyzer": analyzer_map,
        }))
    }
}
