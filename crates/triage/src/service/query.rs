//! Read-side projections, always scoped by the caller's organisation.

use serde_json::Value;

use super::JobService;
use crate::db::{ArtifactFilter, ArtifactSort, JobFilter};
use crate::error::{AttributeError, Result, StoreError, SubmissionError};
use crate::model::{Artifact, Job, Report};

/// Pagination window parsed from a `"from-to"` string.
///
/// `to` is exclusive; `"all"` lifts the bound. Absent ranges default to
/// the first ten rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    All,
    Window { from: u64, to: u64 },
}

impl Range {
    pub const DEFAULT: Range = Range::Window { from: 0, to: 10 };

    pub fn parse(value: &str) -> std::result::Result<Self, AttributeError> {
        if value == "all" {
            return Ok(Range::All);
        }

        let fault = || AttributeError::InvalidFormat {
            name: "range".to_string(),
            reason: format!("expected 'all' or 'from-to', got '{value}'"),
        };

        let (from, to) = value.split_once('-').ok_or_else(fault)?;
        let from: u64 = from.parse().map_err(|_| fault())?;
        let to: u64 = to.parse().map_err(|_| fault())?;
        if to < from {
            return Err(fault());
        }
        Ok(Range::Window { from, to })
    }

    pub fn offset(&self) -> u64 {
        match self {
            Range::All => 0,
            Range::Window { from, .. } => *from,
        }
    }

    pub fn limit(&self) -> Option<u64> {
        match self {
            Range::All => None,
            Range::Window { from, to } => Some(to - from),
        }
    }
}

impl Default for Range {
    fn default() -> Self {
        Range::DEFAULT
    }
}

impl JobService {
    fn organization_of(&self, user_id: &str) -> Result<String> {
        self.users
            .organization_of(user_id)
            .ok_or_else(|| SubmissionError::NotFound(format!("User {user_id}")).into())
    }

    /// Jobs in the user's organisation, newest first, with the total
    /// count before pagination.
    pub async fn list_for_user(
        &self,
        user_id: &str,
        filter: &JobFilter,
        range: &Range,
    ) -> Result<(Vec<Job>, u64)> {
        let organization = self.organization_of(user_id)?;
        let (models, total) = self
            .jobs
            .list(&organization, filter, range.offset(), range.limit())
            .await?;
        Ok((models.iter().map(Job::from_model).collect(), total))
    }

    /// One job, iff it belongs to the user's organisation.
    pub async fn get_for_user(&self, user_id: &str, job_id: &str) -> Result<Job> {
        let organization = self.organization_of(user_id)?;
        let model = self
            .jobs
            .get(job_id)
            .await?
            .filter(|model| model.organization == organization)
            .ok_or_else(|| StoreError::NotFound(format!("Job {job_id}")))?;
        Ok(Job::from_model(&model))
    }

    /// The job's report, resolved through the org-checked job.
    pub async fn get_report_for_user(&self, user_id: &str, job_id: &str) -> Result<Report> {
        let job = self.get_for_user(user_id, job_id).await?;
        let model = self
            .reports
            .for_job(&job.id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Report of job {job_id}")))?;
        Ok(Report::from_model(&model))
    }

    /// Artifacts of the job's report matching `filter`, optionally
    /// re-ordered. A job without a report has none; an absent sort
    /// keeps insertion order.
    pub async fn find_artifacts(
        &self,
        user_id: &str,
        job_id: &str,
        filter: &ArtifactFilter,
        range: &Range,
        sort: Option<ArtifactSort>,
    ) -> Result<(Vec<Artifact>, u64)> {
        let job = self.get_for_user(user_id, job_id).await?;
        let Some(report) = self.reports.for_job(&job.id).await? else {
            return Ok((Vec::new(), 0));
        };
        let (models, total) = self
            .reports
            .artifacts(
                &report.id,
                filter,
                sort.unwrap_or_default(),
                range.offset(),
                range.limit(),
            )
            .await?;
        Ok((models.iter().map(Artifact::from_model).collect(), total))
    }

    /// Job counts for the user's organisation, grouped by status and
    /// analyzer.
    pub async fn stats_for_user(&self, user_id: &str) -> Result<Value> {
        let organization = self.organization_of(user_id)?;
        Ok(self.jobs.stats(&organization).await?)
    }
}
