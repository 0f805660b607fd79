use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TriageError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, TriageError>;

/// A single fault found while checking submission or analyzer attributes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttributeError {
    #[error("Missing attribute: {0}")]
    Missing(String),

    #[error("Invalid format for attribute '{name}': {reason}")]
    InvalidFormat { name: String, reason: String },
}

/// All faults collected while checking a set of attributes.
///
/// Validation does not stop at the first problem; callers get every
/// fault in one round trip.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AttributeErrors(pub Vec<AttributeError>);

impl AttributeErrors {
    pub fn push(&mut self, error: AttributeError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `Ok(value)` when no fault was recorded, the collected
    /// faults otherwise.
    pub fn into_result<T>(self, value: T) -> std::result::Result<T, AttributeErrors> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for AttributeErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", rendered.join("; "))
    }
}

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("Attribute check failed: {0}")]
    AttributeChecking(AttributeErrors),

    #[error("Rate limit exceeded for analyzer {analyzer}")]
    RateLimitExceeded { analyzer: String },

    #[error("{0} not found")]
    NotFound(String),
}

impl From<AttributeErrors> for SubmissionError {
    fn from(errors: AttributeErrors) -> Self {
        SubmissionError::AttributeChecking(errors)
    }
}

/// Faults raised while executing an admitted job. These are recorded on
/// the job itself and never surface to the submitter.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Analyzer {0} is no longer registered")]
    UnknownAnalyzer(String),

    #[error("Analyzer definition {0} is no longer registered")]
    UnknownDefinition(String),

    #[error("Failed to spawn analyzer '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Analyzer timed out after {0} seconds")]
    Timeout(u64),

    #[error("Failed to materialise attachment '{id}': {reason}")]
    Attachment { id: String, reason: String },

    #[error("Invalid analyzer configuration: {0}")]
    Configuration(AttributeErrors),

    #[error("Failed to encode analyzer input: {0}")]
    InputEncoding(String),

    #[error("Job has neither data nor an attachment")]
    MissingObservable,

    #[error("Analyzer worker pool is shut down")]
    WorkersUnavailable,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("{0} not found")]
    NotFound(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}
