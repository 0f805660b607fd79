//! Domain read models shared across the job service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::entities::{artifact, job, report};

/// Lifecycle state of a job.
///
/// Transitions: Waiting → InProgress → Success | Failure. Any state may
/// move to Deleted; nothing leaves a terminal state otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Waiting,
    InProgress,
    Success,
    Failure,
    Deleted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "Waiting",
            JobStatus::InProgress => "InProgress",
            JobStatus::Success => "Success",
            JobStatus::Failure => "Failure",
            JobStatus::Deleted => "Deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Waiting" => Some(JobStatus::Waiting),
            "InProgress" => Some(JobStatus::InProgress),
            "Success" => Some(JobStatus::Success),
            "Failure" => Some(JobStatus::Failure),
            "Deleted" => Some(JobStatus::Deleted),
            _ => None,
        }
    }

    /// Success, Failure and Deleted are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failure | JobStatus::Deleted
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub size: i64,
    pub hash: String,
}

/// The observable carried by a submission: an inline string or a blob
/// reference, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservableInput {
    Data(String),
    Attachment(Attachment),
}

impl ObservableInput {
    pub fn data(&self) -> Option<&str> {
        match self {
            ObservableInput::Data(value) => Some(value),
            ObservableInput::Attachment(_) => None,
        }
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        match self {
            ObservableInput::Data(_) => None,
            ObservableInput::Attachment(attachment) => Some(attachment),
        }
    }
}

/// Read model of a job row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub analyzer_definition_id: String,
    pub analyzer_id: String,
    pub analyzer_name: String,
    pub organization: String,
    pub data_type: String,
    pub tlp: i32,
    pub message: String,
    /// Job parameters in their canonical persisted encoding.
    pub parameters: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Synthesised on cache reuse; never persisted.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub from_cache: bool,
}

impl Job {
    pub fn from_model(model: &job::Model) -> Self {
        let status = JobStatus::parse(&model.status).unwrap_or_else(|| {
            log::warn!(
                "Unknown job status '{}' for job {}, treating as Waiting",
                model.status,
                model.id
            );
            JobStatus::Waiting
        });

        let parameters = serde_json::from_str(&model.parameters).unwrap_or_else(|_| {
            log::warn!("Job {} carries unparseable parameters", model.id);
            serde_json::Value::Object(serde_json::Map::new())
        });

        Self {
            id: model.id.clone(),
            analyzer_definition_id: model.analyzer_definition_id.clone(),
            analyzer_id: model.analyzer_id.clone(),
            analyzer_name: model.analyzer_name.clone(),
            organization: model.organization.clone(),
            data_type: model.data_type.clone(),
            tlp: model.tlp,
            message: model.message.clone().unwrap_or_default(),
            parameters,
            data: model.data.clone(),
            attachment: attachment_from_model(model),
            status,
            created_at: model.created_at,
            start_date: model.start_date,
            end_date: model.end_date,
            input: model.input.clone(),
            from_cache: false,
        }
    }

    /// The observable this job was submitted with.
    pub fn observable(&self) -> Option<ObservableInput> {
        if let Some(data) = &self.data {
            return Some(ObservableInput::Data(data.clone()));
        }
        self.attachment.clone().map(ObservableInput::Attachment)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

fn attachment_from_model(model: &job::Model) -> Option<Attachment> {
    let id = model.attachment_id.clone()?;
    Some(Attachment {
        id,
        name: model.attachment_name.clone().unwrap_or_default(),
        content_type: model.attachment_content_type.clone().unwrap_or_default(),
        size: model.attachment_size.unwrap_or_default(),
        hash: model.attachment_hash.clone().unwrap_or_default(),
    })
}

/// Read model of a report row, with the stored JSON decoded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub job_id: String,
    pub full: serde_json::Value,
    pub summary: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Report {
    pub fn from_model(model: &report::Model) -> Self {
        let decode = |field: &str, raw: &str| {
            serde_json::from_str(raw).unwrap_or_else(|_| {
                log::warn!("Report {} carries unparseable {}", model.id, field);
                serde_json::Value::Null
            })
        };
        Self {
            id: model.id.clone(),
            job_id: model.job_id.clone(),
            full: decode("full", &model.full),
            summary: decode("summary", &model.summary),
            created_at: model.created_at,
        }
    }
}

/// Read model of an artifact extracted from a report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    pub data_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn from_model(model: &artifact::Model) -> Self {
        let attachment = model.attachment_id.clone().map(|id| Attachment {
            id,
            name: model.attachment_name.clone().unwrap_or_default(),
            content_type: model.attachment_content_type.clone().unwrap_or_default(),
            size: model.attachment_size.unwrap_or_default(),
            hash: model.attachment_hash.clone().unwrap_or_default(),
        });
        Self {
            id: model.id.clone(),
            data_type: model.data_type.clone(),
            data: model.data.clone(),
            attachment,
            created_at: model.created_at,
        }
    }
}
