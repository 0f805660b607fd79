//! Test harness for driving the job service end to end.
//!
//! Builds a service over an in-memory database, a temp-dir blob store
//! and shell-script analyzers, and polls the store until jobs reach a
//! terminal state.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use triage::analyzer::{Analyzer, AnalyzerDefinition, AnalyzerRegistry, RateUnit};
use triage::db::init_memory_database;
use triage::{Config, FileAttachmentStore, Job, JobService, JobStatus, UserRegistry};

/// Canonical success document used by most script analyzers.
pub const SUCCESS_BODY: &str = r#"cat > /dev/null
echo '{"success":true,"full":{"verdict":"clean"},"summary":{"tag":"ok"},"artifacts":[{"type":"domain","value":"x.example"}]}'"#;

pub struct TestHarness {
    temp_dir: TempDir,
    pub analyzers: Arc<AnalyzerRegistry>,
    pub users: Arc<UserRegistry>,
    pub attachments: Arc<FileAttachmentStore>,
    pub service: JobService,
}

impl TestHarness {
    /// Harness with default configuration and one user `alice` in the
    /// `demo` organisation.
    pub async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let conn = init_memory_database()
            .await
            .expect("Failed to open in-memory database");

        let analyzers = Arc::new(AnalyzerRegistry::new());
        let users = Arc::new(UserRegistry::new());
        users.add("alice", "demo");

        let attachments = Arc::new(FileAttachmentStore::new(temp_dir.path().join("blobs")));

        let service = JobService::new(
            config,
            conn,
            Arc::clone(&analyzers),
            Arc::clone(&users),
            Arc::clone(&attachments) as Arc<dyn triage::AttachmentStore>,
        );

        Self {
            temp_dir,
            analyzers,
            users,
            attachments,
            service,
        }
    }

    pub fn temp_path(&self) -> &std::path::Path {
        self.temp_dir.path()
    }

    /// A file path inside the harness temp dir, handy for scripts that
    /// capture their stdin.
    pub fn capture_path(&self, tag: &str) -> PathBuf {
        self.temp_dir.path().join(format!("captured-{tag}.json"))
    }

    /// Registers a shell-script analyzer for the `demo` organisation.
    #[cfg(unix)]
    pub fn script_analyzer(
        &self,
        id: &str,
        data_types: &[&str],
        rate: Option<(u32, RateUnit)>,
        body: &str,
    ) -> Analyzer {
        use std::os::unix::fs::PermissionsExt;

        let dir = self.temp_dir.path().join("analyzers");
        std::fs::create_dir_all(&dir).expect("Failed to create analyzers dir");

        let script = dir.join(format!("{id}.sh"));
        std::fs::write(&script, format!("#!/bin/sh\n{body}\n")).expect("Failed to write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod script");

        let definition = AnalyzerDefinition {
            id: format!("{id}-def"),
            cmd: script,
            base_directory: dir,
            data_type_list: data_types.iter().map(|t| t.to_string()).collect(),
            configuration_items: vec![],
            configuration: serde_json::Map::new(),
        };
        let analyzer = Analyzer {
            id: id.to_string(),
            name: format!("{id}-analyzer"),
            organization: "demo".to_string(),
            rate: rate.map(|(count, _)| count),
            rate_unit: rate.map(|(_, unit)| unit),
            config: serde_json::Map::new(),
            analyzer_definition_id: format!("{id}-def"),
        };
        self.analyzers.register(analyzer.clone(), definition);
        analyzer
    }

    /// Polls the store until the job reaches a terminal state.
    pub async fn wait_for_terminal(&self, job_id: &str) -> Job {
        for _ in 0..200 {
            let model = self
                .service
                .job_store()
                .get(job_id)
                .await
                .expect("Failed to fetch job")
                .expect("Job vanished from the store");
            if JobStatus::parse(&model.status).is_some_and(|s| s.is_terminal()) {
                return Job::from_model(&model);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("Job {job_id} never reached a terminal state");
    }
}
