//! Job entity for persistent storage.

use sea_orm::entity::prelude::*;

/// Job entity model. One row per admitted submission.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    /// Unique job identifier (UUID).
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Definition of the program this job invokes.
    pub analyzer_definition_id: String,
    /// Analyzer instance the job was submitted against. Immutable.
    pub analyzer_id: String,
    pub analyzer_name: String,
    /// Owning organisation. Immutable, scopes every read path.
    pub organization: String,
    /// Declared type of the observable (ip, domain, hash, file, ...).
    pub data_type: String,
    /// Traffic-light-protocol label, 0-3.
    pub tlp: i32,
    /// Submission note; replaced by the error message on failure.
    pub message: Option<String>,
    /// Job parameters in their canonical JSON encoding.
    pub parameters: String,
    /// Inline observable value. Exactly one of `data` and
    /// `attachment_id` is set.
    pub data: Option<String>,
    pub attachment_id: Option<String>,
    pub attachment_name: Option<String>,
    pub attachment_content_type: Option<String>,
    pub attachment_size: Option<i64>,
    pub attachment_hash: Option<String>,
    /// Job status: Waiting, InProgress, Success, Failure, Deleted.
    #[sea_orm(default_value = "Waiting")]
    pub status: String,
    pub created_at: DateTimeUtc,
    /// Set when the job leaves Waiting.
    pub start_date: Option<DateTimeUtc>,
    /// Set when the job reaches Success or Failure.
    pub end_date: Option<DateTimeUtc>,
    /// Diagnostic copy of the analyzer input, recorded on failure.
    pub input: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::report::Entity")]
    Reports,
}

impl Related<super::report::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reports.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
