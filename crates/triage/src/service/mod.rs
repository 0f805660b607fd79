//! Job lifecycle: submission, admission, execution, terminal states.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;

use crate::analyzer::{input, Analyzer, AnalyzerRegistry};
use crate::attachment::AttachmentStore;
use crate::config::Config;
use crate::db::{JobStore, NewJob, ReportStore};
use crate::error::{
    AttributeError, AttributeErrors, ExecutionError, Result, StoreError, SubmissionError,
};
use crate::ingest::{self, IngestOutcome};
use crate::model::{Job, JobStatus};
use crate::runner::Runner;
use crate::user::UserRegistry;

mod admission;
pub mod fields;
mod query;
mod recovery;

pub use admission::{canonical_parameters, Admission};
pub use fields::Submission;
pub use query::Range;
pub use recovery::RecoveryReport;

/// The job service. Owns the execution pipeline; persistence, analyzer
/// metadata, users and blobs are consumed through their own interfaces.
///
/// All state is behind `Arc`s, so cloning is cheap; detached execution
/// tasks run on clones.
#[derive(Clone)]
pub struct JobService {
    config: Config,
    jobs: Arc<JobStore>,
    reports: Arc<ReportStore>,
    analyzers: Arc<AnalyzerRegistry>,
    users: Arc<UserRegistry>,
    attachments: Arc<dyn AttachmentStore>,
    admission: Admission,
    runner: Runner,
    /// Bounds the number of analyzer subprocesses running at once, so a
    /// slow analyzer cannot starve storage and submission handling.
    analyzer_slots: Arc<Semaphore>,
}

impl JobService {
    pub fn new(
        config: Config,
        conn: sea_orm::DatabaseConnection,
        analyzers: Arc<AnalyzerRegistry>,
        users: Arc<UserRegistry>,
        attachments: Arc<dyn AttachmentStore>,
    ) -> Self {
        let jobs = Arc::new(JobStore::new(conn.clone()));
        let reports = Arc::new(ReportStore::new(conn));
        let admission = Admission::new(Arc::clone(&jobs), config.cache_ttl());
        let runner = Runner::new(config.max_output_bytes, config.run_timeout());
        let analyzer_slots = Arc::new(Semaphore::new(config.analyzer_workers));

        Self {
            config,
            jobs,
            reports,
            analyzers,
            users,
            attachments,
            admission,
            runner,
            analyzer_slots,
        }
    }

    pub fn job_store(&self) -> &JobStore {
        &self.jobs
    }

    pub fn report_store(&self) -> &ReportStore {
        &self.reports
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accepts a submission on behalf of a user.
    ///
    /// The analyzer must belong to the user's organisation. The returned
    /// job is Waiting (or a cache hit); execution runs detached and its
    /// completion is observed through the stored status.
    pub async fn submit(&self, user_id: &str, analyzer_id: &str, fields: &Value) -> Result<Job> {
        let organization = self
            .users
            .organization_of(user_id)
            .ok_or_else(|| SubmissionError::NotFound(format!("User {user_id}")))?;
        let analyzer = self
            .analyzers
            .analyzer_for_organization(analyzer_id, &organization)
            .ok_or_else(|| SubmissionError::NotFound(format!("Analyzer {analyzer_id}")))?;

        let submission =
            fields::parse_submission(fields).map_err(SubmissionError::AttributeChecking)?;

        self.create(&analyzer, submission).await
    }

    /// Admits a parsed submission and persists its job.
    ///
    /// Without `force`, a reusable prior job short-circuits creation and
    /// is returned with `from_cache` set. Admission failures surface
    /// synchronously; once the Waiting row exists every later fault is
    /// recorded on the job instead.
    pub async fn create(&self, analyzer: &Analyzer, submission: Submission) -> Result<Job> {
        let definition = self
            .analyzers
            .definition(&analyzer.analyzer_definition_id)
            .ok_or_else(|| {
                SubmissionError::NotFound(format!(
                    "Analyzer definition {}",
                    analyzer.analyzer_definition_id
                ))
            })?;

        let mut errors = AttributeErrors::default();
        if !definition.data_type_list.is_empty()
            && !definition.data_type_list.contains(&submission.data_type)
        {
            errors.push(AttributeError::InvalidFormat {
                name: "dataType".to_string(),
                reason: format!(
                    "analyzer {} does not accept '{}'",
                    analyzer.name, submission.data_type
                ),
            });
        }
        if let Err(error) =
            input::check_tlp(analyzer, &definition, &submission.parameters, submission.tlp)
        {
            errors.push(error);
        }
        if !errors.is_empty() {
            return Err(SubmissionError::AttributeChecking(errors).into());
        }

        let parameters = canonical_parameters(&submission.parameters);

        if !submission.force {
            if let Some(previous) = self
                .admission
                .find_similar_job(analyzer, &submission, &parameters)
                .await?
            {
                log::info!(
                    "Reusing job {} for analyzer {} from cache",
                    previous.id,
                    analyzer.name
                );
                let mut job = Job::from_model(&previous);
                job.from_cache = true;
                return Ok(job);
            }
        }

        if !self.admission.is_under_rate_limit(analyzer).await? {
            return Err(SubmissionError::RateLimitExceeded {
                analyzer: analyzer.name.clone(),
            }
            .into());
        }

        let model = self
            .jobs
            .create(NewJob {
                analyzer_definition_id: analyzer.analyzer_definition_id.clone(),
                analyzer_id: analyzer.id.clone(),
                analyzer_name: analyzer.name.clone(),
                organization: analyzer.organization.clone(),
                data_type: submission.data_type,
                observable: submission.observable,
                tlp: submission.tlp,
                message: submission.message,
                parameters,
            })
            .await?;

        log::info!("Created job {} for analyzer {}", model.id, analyzer.name);
        self.spawn_execution(model.id.clone());
        Ok(Job::from_model(&model))
    }

    /// Transitions a Waiting job to InProgress. `None` when another
    /// runner already claimed it.
    pub async fn start_job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self
            .jobs
            .claim(job_id)
            .await?
            .map(|model| Job::from_model(&model)))
    }

    /// Moves a job to Success or Failure. Returns false when the job was
    /// already terminal.
    pub async fn end_job(
        &self,
        job_id: &str,
        status: JobStatus,
        message: Option<String>,
        input: Option<String>,
    ) -> Result<bool> {
        Ok(self.jobs.finish(job_id, status, message, input).await?)
    }

    /// Soft delete: the row stays with status Deleted.
    pub async fn delete(&self, job_id: &str) -> Result<()> {
        if self.jobs.soft_delete(job_id).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("Job {job_id}")).into())
        }
    }

    /// Detaches execution of a persisted job.
    ///
    /// The task is supervised: if it dies without reaching `finish`, the
    /// supervisor records Failure so the job cannot be lost in a
    /// non-terminal state.
    pub(crate) fn spawn_execution(&self, job_id: String) {
        let service = self.clone();
        let task_job_id = job_id.clone();
        let handle = tokio::spawn(async move {
            service.execute(&task_job_id).await;
        });

        let service = self.clone();
        tokio::spawn(async move {
            if let Err(join_error) = handle.await {
                log::error!("Execution task for job {} died: {}", job_id, join_error);
                // The task may have died before claiming; claim first so
                // the failed job still carries a start date.
                if let Err(e) = service.jobs.claim(&job_id).await {
                    log::error!("Failed to claim dead job {}: {}", job_id, e);
                }
                let recorded = service
                    .jobs
                    .finish(
                        &job_id,
                        JobStatus::Failure,
                        Some(format!("Internal error: {join_error}")),
                        None,
                    )
                    .await;
                if let Err(e) = recorded {
                    log::error!("Failed to record failure for job {}: {}", job_id, e);
                }
            }
        });
    }

    /// Drives one job from Waiting to a terminal state. Safe to call
    /// for jobs that are no longer Waiting; those are skipped.
    pub(crate) async fn execute(&self, job_id: &str) {
        let claimed = match self.jobs.claim(job_id).await {
            Ok(Some(model)) => model,
            Ok(None) => {
                log::debug!("Job {} is not Waiting, skipping", job_id);
                return;
            }
            Err(e) => {
                log::error!("Failed to claim job {}: {}", job_id, e);
                return;
            }
        };

        let job = Job::from_model(&claimed);
        log::info!(
            "Starting job {} ({} on {})",
            job.id,
            job.analyzer_name,
            job.data_type
        );

        let (status, message, input) = match self.run_job(&job).await {
            Ok(IngestOutcome::Success) => (JobStatus::Success, None, None),
            Ok(IngestOutcome::Failure { message, input }) => (JobStatus::Failure, message, input),
            Err(error) => (JobStatus::Failure, Some(error.to_string()), None),
        };

        match self.jobs.finish(&job.id, status, message, input).await {
            Ok(true) => log::info!("Job {} ended {}", job.id, status),
            Ok(false) => log::warn!("Job {} was already terminal", job.id),
            Err(e) => log::error!("Failed to finalise job {}: {}", job.id, e),
        }
    }

    async fn run_job(&self, job: &Job) -> std::result::Result<IngestOutcome, ExecutionError> {
        let analyzer = self
            .analyzers
            .analyzer(&job.analyzer_id)
            .ok_or_else(|| ExecutionError::UnknownAnalyzer(job.analyzer_id.clone()))?;
        let definition = self
            .analyzers
            .definition(&job.analyzer_definition_id)
            .ok_or_else(|| ExecutionError::UnknownDefinition(job.analyzer_definition_id.clone()))?;

        // Builds the stdin document; materialises the attachment into a
        // temp file that lives until the end of this function.
        let analyzer_input =
            input::build_input(&analyzer, &definition, job, self.attachments.as_ref()).await?;
        let rendered = analyzer_input.render()?;

        let permit = self
            .analyzer_slots
            .acquire()
            .await
            .map_err(|_| ExecutionError::WorkersUnavailable)?;
        let output = self
            .runner
            .run(&definition.cmd, &definition.base_directory, &rendered)
            .await?;
        drop(permit);

        log::debug!(
            "Analyzer {} for job {} exited with code {:?}",
            analyzer.name,
            job.id,
            output.exit_code
        );

        Ok(ingest::ingest_output(&self.reports, &job.id, &output).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerDefinition;
    use crate::attachment::FileAttachmentStore;
    use crate::db::init_memory_database;
    use serde_json::json;
    use tempfile::TempDir;

    async fn service(blob_dir: &TempDir) -> JobService {
        let conn = init_memory_database().await.unwrap();
        let analyzers = Arc::new(AnalyzerRegistry::new());
        let users = Arc::new(UserRegistry::new());
        users.add("alice", "demo");

        analyzers.register(
            Analyzer {
                id: "ana-1".to_string(),
                name: "MaxMind".to_string(),
                organization: "demo".to_string(),
                rate: None,
                rate_unit: None,
                config: serde_json::Map::new(),
                analyzer_definition_id: "def-1".to_string(),
            },
            AnalyzerDefinition {
                id: "def-1".to_string(),
                cmd: "/nonexistent/analyzer.sh".into(),
                base_directory: "/tmp".into(),
                data_type_list: vec!["ip".to_string()],
                configuration_items: vec![],
                configuration: serde_json::Map::new(),
            },
        );

        JobService::new(
            Config::default(),
            conn,
            analyzers,
            users,
            Arc::new(FileAttachmentStore::new(blob_dir.path())),
        )
    }

    #[tokio::test]
    async fn test_submit_unknown_user() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;

        let result = service
            .submit("mallory", "ana-1", &json!({"dataType":"ip","data":"1.2.3.4"}))
            .await;
        assert!(matches!(
            result,
            Err(crate::error::TriageError::Submission(
                SubmissionError::NotFound(_)
            ))
        ));
    }

    #[tokio::test]
    async fn test_submit_analyzer_outside_organization() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;
        service.users.add("bob", "acme");

        let result = service
            .submit("bob", "ana-1", &json!({"dataType":"ip","data":"1.2.3.4"}))
            .await;
        assert!(matches!(
            result,
            Err(crate::error::TriageError::Submission(
                SubmissionError::NotFound(_)
            ))
        ));
    }

    #[tokio::test]
    async fn test_submit_rejects_undeclared_data_type() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;

        let result = service
            .submit(
                "alice",
                "ana-1",
                &json!({"dataType":"domain","data":"evil.example"}),
            )
            .await;
        match result {
            Err(crate::error::TriageError::Submission(SubmissionError::AttributeChecking(
                errors,
            ))) => {
                assert!(errors.to_string().contains("does not accept"));
            }
            other => panic!("Expected attribute checking failure, got {other:?}"),
        }
        // The submission never reached the store.
        let (jobs, _) = service
            .job_store()
            .list("demo", &Default::default(), 0, None)
            .await
            .unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_malformed_fields() {
        let dir = TempDir::new().unwrap();
        let service = service(&dir).await;

        let result = service.submit("alice", "ana-1", &json!({"tlp": 9})).await;
        match result {
            Err(crate::error::TriageError::Submission(SubmissionError::AttributeChecking(
                errors,
            ))) => assert!(errors.0.len() >= 2),
            other => panic!("Expected attribute checking failure, got {other:?}"),
        }
    }
}
