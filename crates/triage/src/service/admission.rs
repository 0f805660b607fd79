//! Admission control: similar-job cache and per-analyzer rate limits.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::fields::Submission;
use crate::analyzer::Analyzer;
use crate::db::{JobStore, SimilarJobQuery};
use crate::db::entities::job;
use crate::error::StoreError;

#[derive(Clone)]
pub struct Admission {
    jobs: Arc<JobStore>,
    cache_ttl: Option<chrono::Duration>,
}

impl Admission {
    pub fn new(jobs: Arc<JobStore>, cache_ttl: Option<chrono::Duration>) -> Self {
        Self { jobs, cache_ttl }
    }

    /// Most recent reusable job with the same fingerprint, if the cache
    /// is enabled and one exists inside the window.
    pub async fn find_similar_job(
        &self,
        analyzer: &Analyzer,
        submission: &Submission,
        parameters: &str,
    ) -> Result<Option<job::Model>, StoreError> {
        let Some(ttl) = self.cache_ttl else {
            return Ok(None);
        };

        let query = SimilarJobQuery {
            analyzer_id: &analyzer.id,
            data_type: &submission.data_type,
            tlp: submission.tlp,
            observable: &submission.observable,
            parameters,
            started_after: Utc::now() - ttl,
        };
        self.jobs.find_similar(&query).await
    }

    /// Sliding-window rate limit. Analyzers without a configured rate
    /// or unit are never limited; failed jobs consumed capacity and
    /// count against the window.
    pub async fn is_under_rate_limit(&self, analyzer: &Analyzer) -> Result<bool, StoreError> {
        let (Some(rate), Some(unit)) = (analyzer.rate, analyzer.rate_unit) else {
            return Ok(true);
        };

        let since = Utc::now() - chrono::Duration::seconds(unit.seconds());
        let used = self
            .jobs
            .count_for_analyzer_since(&analyzer.id, since)
            .await?;
        Ok(used < u64::from(rate))
    }
}

/// Canonical JSON encoding used to persist and compare job parameters.
///
/// serde_json's default map keeps keys sorted, so semantically equal
/// objects submitted with different key order produce the same string
/// and hit the cache.
pub fn canonical_parameters(parameters: &Value) -> String {
    serde_json::to_string(parameters).unwrap_or_else(|_| "{}".to_string())
}
