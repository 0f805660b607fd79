//! triage: job-execution core of an analyzer-dispatch service.
//!
//! Submissions pair an observable with an analyzer; the service decides
//! whether a recent report can be reused, admits the job under the
//! analyzer's rate limit, runs the analyzer subprocess against a JSON
//! input document and ingests its output into a report with extracted
//! artifacts. Storage, blob handling, the analyzer registry and user
//! resolution are consumed through narrow interfaces; the HTTP façade
//! lives outside this crate.

pub mod analyzer;
pub mod attachment;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod model;
pub mod runner;
pub mod service;
pub mod user;

pub use analyzer::{Analyzer, AnalyzerDefinition, AnalyzerRegistry, RateUnit};
pub use attachment::{AttachmentStore, FileAttachmentStore};
pub use config::{load_config, Config};
pub use error::{
    AttributeError, AttributeErrors, ConfigError, ExecutionError, Result, StoreError,
    SubmissionError, TriageError,
};
pub use model::{Artifact, Attachment, Job, JobStatus, ObservableInput, Report};
pub use service::{JobService, Range, RecoveryReport, Submission};
pub use user::UserRegistry;
