//! End-to-end scenarios: submission, caching, rate limits, failure
//! ingestion and crash recovery against real script analyzers.

#![cfg(unix)]

mod common;

use common::{TestHarness, SUCCESS_BODY};
use serde_json::{json, Value};
use triage::analyzer::RateUnit;
use triage::db::NewJob;
use triage::{Config, JobStatus, ObservableInput, SubmissionError, TriageError};

#[tokio::test]
async fn test_string_submission_success() {
    let harness = TestHarness::new().await;
    let capture = harness.capture_path("geo");
    let body = format!(
        "cat > '{}'\necho '{{\"success\":true,\"full\":{{\"verdict\":\"clean\"}},\"summary\":{{\"tag\":\"ok\"}},\"artifacts\":[{{\"type\":\"domain\",\"value\":\"x.example\"}}]}}'",
        capture.display()
    );
    harness.script_analyzer("geo", &["ip"], None, &body);

    let job = harness
        .service
        .submit(
            "alice",
            "geo",
            &json!({"dataType": "ip", "data": "1.2.3.4", "tlp": 2, "parameters": {}}),
        )
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Waiting);
    assert!(!job.from_cache);

    let finished = harness.wait_for_terminal(&job.id).await;
    assert_eq!(finished.status, JobStatus::Success);
    assert!(finished.start_date.is_some());
    assert!(finished.end_date.is_some());
    assert!(finished.start_date.unwrap() <= finished.end_date.unwrap());

    // The analyzer saw the documented stdin shape.
    let stdin: Value = serde_json::from_str(&std::fs::read_to_string(&capture).unwrap()).unwrap();
    assert_eq!(stdin["data"], json!("1.2.3.4"));
    assert_eq!(stdin["dataType"], json!("ip"));
    assert_eq!(stdin["message"], json!(""));
    assert!(stdin["config"].is_object());
    assert_eq!(stdin["config"]["auto_extract_artifacts"], json!(true));
    assert!(stdin.get("file").is_none());

    // One report with the serialised full/summary objects.
    let report = harness
        .service
        .get_report_for_user("alice", &job.id)
        .await
        .unwrap();
    assert_eq!(report.full, json!({"verdict": "clean"}));
    assert_eq!(report.summary, json!({"tag": "ok"}));

    // One artifact with normalised keys.
    let (artifacts, total) = harness
        .service
        .find_artifacts("alice", &job.id, &Default::default(), &triage::Range::All, None)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(artifacts[0].data_type, "domain");
    assert_eq!(artifacts[0].data.as_deref(), Some("x.example"));

    // The artifact query narrows the listing.
    let misses = triage::db::ArtifactFilter {
        data_type: Some("hash".to_string()),
        data: None,
    };
    let (none, total) = harness
        .service
        .find_artifacts("alice", &job.id, &misses, &triage::Range::All, None)
        .await
        .unwrap();
    assert!(none.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_cache_hit_returns_previous_job() {
    let harness = TestHarness::with_config(Config {
        job_cache_secs: 3600,
        ..Config::default()
    })
    .await;
    harness.script_analyzer("geo", &["ip"], None, SUCCESS_BODY);

    let fields = json!({"dataType": "ip", "data": "1.2.3.4"});
    let first = harness
        .service
        .submit("alice", "geo", &fields)
        .await
        .unwrap();
    harness.wait_for_terminal(&first.id).await;

    let second = harness
        .service
        .submit("alice", "geo", &fields)
        .await
        .unwrap();
    assert_eq!(second.id, first.id);
    assert!(second.from_cache);

    // No new row appeared.
    let (jobs, total) = harness
        .service
        .list_for_user("alice", &Default::default(), &triage::Range::All)
        .await
        .unwrap();
    assert_eq!(total, 1);
    // The stored record does not carry the cache flag.
    assert!(!jobs[0].from_cache);
}

#[tokio::test]
async fn test_force_bypasses_cache() {
    let harness = TestHarness::with_config(Config {
        job_cache_secs: 3600,
        ..Config::default()
    })
    .await;
    harness.script_analyzer("geo", &["ip"], None, SUCCESS_BODY);

    let first = harness
        .service
        .submit("alice", "geo", &json!({"dataType": "ip", "data": "1.2.3.4"}))
        .await
        .unwrap();
    harness.wait_for_terminal(&first.id).await;

    let forced = harness
        .service
        .submit(
            "alice",
            "geo",
            &json!({"dataType": "ip", "data": "1.2.3.4", "force": true}),
        )
        .await
        .unwrap();
    assert_ne!(forced.id, first.id);
    assert!(!forced.from_cache);
    assert_eq!(forced.status, JobStatus::Waiting);
    harness.wait_for_terminal(&forced.id).await;
}

#[tokio::test]
async fn test_rate_limit_rejects_third_submission() {
    let harness = TestHarness::new().await;
    harness.script_analyzer("geo", &["ip"], Some((2, RateUnit::Day)), SUCCESS_BODY);

    for ip in ["1.1.1.1", "2.2.2.2"] {
        harness
            .service
            .submit("alice", "geo", &json!({"dataType": "ip", "data": ip}))
            .await
            .unwrap();
    }

    let third = harness
        .service
        .submit("alice", "geo", &json!({"dataType": "ip", "data": "3.3.3.3"}))
        .await;
    assert!(matches!(
        third,
        Err(TriageError::Submission(
            SubmissionError::RateLimitExceeded { .. }
        ))
    ));

    let (_, total) = harness
        .service
        .list_for_user("alice", &Default::default(), &triage::Range::All)
        .await
        .unwrap();
    assert_eq!(total, 2);
}

#[tokio::test]
async fn test_analyzer_reported_failure() {
    let harness = TestHarness::new().await;
    let body = r#"cat > /dev/null
echo '{"success":false,"errorMessage":"boom","input":"offending input"}'"#;
    harness.script_analyzer("geo", &["ip"], None, body);

    let job = harness
        .service
        .submit("alice", "geo", &json!({"dataType": "ip", "data": "1.2.3.4"}))
        .await
        .unwrap();

    let finished = harness.wait_for_terminal(&job.id).await;
    assert_eq!(finished.status, JobStatus::Failure);
    assert_eq!(finished.message, "boom");
    assert_eq!(finished.input.as_deref(), Some("offending input"));

    let report = harness.service.get_report_for_user("alice", &job.id).await;
    assert!(matches!(
        report,
        Err(TriageError::Store(triage::StoreError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_unparseable_output() {
    let harness = TestHarness::new().await;
    let body = "cat > /dev/null\necho 'not json'\necho 'segfault' >&2";
    harness.script_analyzer("geo", &["ip"], None, body);

    let job = harness
        .service
        .submit("alice", "geo", &json!({"dataType": "ip", "data": "1.2.3.4"}))
        .await
        .unwrap();

    let finished = harness.wait_for_terminal(&job.id).await;
    assert_eq!(finished.status, JobStatus::Failure);
    assert!(finished.message.starts_with("Invalid output\n"));
    assert!(finished.message.contains("segfault"));
    assert!(finished.message.len() <= "Invalid output\n".len() + 8192);
}

#[tokio::test]
async fn test_recovery_drives_waiting_jobs_once() {
    let harness = TestHarness::new().await;
    let analyzer = harness.script_analyzer("geo", &["ip"], None, SUCCESS_BODY);

    // A job persisted Waiting by a run that died before starting it.
    let orphan = harness
        .service
        .job_store()
        .create(NewJob {
            analyzer_definition_id: analyzer.analyzer_definition_id.clone(),
            analyzer_id: analyzer.id.clone(),
            analyzer_name: analyzer.name.clone(),
            organization: "demo".to_string(),
            data_type: "ip".to_string(),
            observable: ObservableInput::Data("1.2.3.4".to_string()),
            tlp: 2,
            message: String::new(),
            parameters: "{}".to_string(),
        })
        .await
        .unwrap();

    let report = harness.service.recover().await.unwrap();
    assert_eq!(report.restarted, 1);
    assert_eq!(report.failed_stale, 0);

    let finished = harness.wait_for_terminal(&orphan.id).await;
    assert_eq!(finished.status, JobStatus::Success);

    // Idempotent: a second scan finds nothing to do and the terminal
    // set is unchanged.
    let report = harness.service.recover().await.unwrap();
    assert_eq!(report.restarted, 0);
    let still = harness
        .service
        .get_for_user("alice", &orphan.id)
        .await
        .unwrap();
    assert_eq!(still.status, JobStatus::Success);
    let (artifacts, total) = harness
        .service
        .find_artifacts("alice", &orphan.id, &Default::default(), &triage::Range::All, None)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(artifacts.len(), 1);
}

#[tokio::test]
async fn test_recovery_fails_stale_in_progress_jobs() {
    let harness = TestHarness::with_config(Config {
        stale_job_secs: 0,
        ..Config::default()
    })
    .await;
    let analyzer = harness.script_analyzer("geo", &["ip"], None, SUCCESS_BODY);

    let stale = harness
        .service
        .job_store()
        .create(NewJob {
            analyzer_definition_id: analyzer.analyzer_definition_id.clone(),
            analyzer_id: analyzer.id.clone(),
            analyzer_name: analyzer.name.clone(),
            organization: "demo".to_string(),
            data_type: "ip".to_string(),
            observable: ObservableInput::Data("9.9.9.9".to_string()),
            tlp: 2,
            message: String::new(),
            parameters: "{}".to_string(),
        })
        .await
        .unwrap();
    // Claimed by a run that crashed mid-execution.
    harness.service.job_store().claim(&stale.id).await.unwrap();

    let report = harness.service.recover().await.unwrap();
    assert_eq!(report.failed_stale, 1);

    let swept = harness
        .service
        .get_for_user("alice", &stale.id)
        .await
        .unwrap();
    assert_eq!(swept.status, JobStatus::Failure);
}

#[tokio::test]
async fn test_reads_are_organisation_scoped() {
    let harness = TestHarness::new().await;
    harness.users.add("bob", "acme");
    harness.script_analyzer("geo", &["ip"], None, SUCCESS_BODY);

    let job = harness
        .service
        .submit("alice", "geo", &json!({"dataType": "ip", "data": "1.2.3.4"}))
        .await
        .unwrap();
    harness.wait_for_terminal(&job.id).await;

    // Same organisation: visible.
    assert!(harness.service.get_for_user("alice", &job.id).await.is_ok());

    // Other organisation: not found, on every read path.
    assert!(harness.service.get_for_user("bob", &job.id).await.is_err());
    assert!(harness
        .service
        .get_report_for_user("bob", &job.id)
        .await
        .is_err());
    assert!(harness
        .service
        .find_artifacts("bob", &job.id, &Default::default(), &triage::Range::All, None)
        .await
        .is_err());
    let (jobs, total) = harness
        .service
        .list_for_user("bob", &Default::default(), &triage::Range::All)
        .await
        .unwrap();
    assert!(jobs.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_artifact_key_normalisation_is_uniform() {
    let harness = TestHarness::new().await;
    let legacy = r#"cat > /dev/null
echo '{"success":true,"full":{},"summary":{},"artifacts":[{"type":"domain","value":"x.example"}]}'"#;
    let modern = r#"cat > /dev/null
echo '{"success":true,"full":{},"summary":{},"artifacts":[{"dataType":"domain","data":"x.example"}]}'"#;
    harness.script_analyzer("legacy", &["ip"], None, legacy);
    harness.script_analyzer("modern", &["ip"], None, modern);

    let mut stored = Vec::new();
    for analyzer in ["legacy", "modern"] {
        let job = harness
            .service
            .submit("alice", analyzer, &json!({"dataType": "ip", "data": "1.2.3.4"}))
            .await
            .unwrap();
        let finished = harness.wait_for_terminal(&job.id).await;
        assert_eq!(finished.status, JobStatus::Success);

        let (artifacts, _) = harness
            .service
            .find_artifacts("alice", &job.id, &Default::default(), &triage::Range::All, None)
            .await
            .unwrap();
        assert_eq!(artifacts.len(), 1);
        stored.push((
            artifacts[0].data_type.clone(),
            artifacts[0].data.clone(),
            artifacts[0].attachment.clone(),
        ));
    }

    assert_eq!(stored[0], stored[1]);
}

#[tokio::test]
async fn test_attachment_submission_end_to_end() {
    let harness = TestHarness::new().await;
    let capture = harness.capture_path("scan");
    let body = format!(
        "cat > '{}'\necho '{{\"success\":true,\"full\":{{\"clamav\":\"clean\"}},\"summary\":{{}}}}'",
        capture.display()
    );
    harness.script_analyzer("scan", &["file"], None, &body);

    use triage::AttachmentStore;
    let saved = harness
        .attachments
        .save("sample.bin", Some("application/octet-stream"), b"MZ\x90")
        .await
        .unwrap();

    let job = harness
        .service
        .submit(
            "alice",
            "scan",
            &json!({"dataType": "file", "attachment": saved}),
        )
        .await
        .unwrap();

    let finished = harness.wait_for_terminal(&job.id).await;
    assert_eq!(finished.status, JobStatus::Success);

    // The analyzer got the file triple, not inline data, and the
    // materialised file held the blob's bytes at run time.
    let stdin: Value = serde_json::from_str(&std::fs::read_to_string(&capture).unwrap()).unwrap();
    assert!(stdin.get("data").is_none());
    assert_eq!(stdin["filename"], json!("sample.bin"));
    assert_eq!(stdin["contentType"], json!("application/octet-stream"));
    let file = stdin["file"].as_str().unwrap();
    assert!(!file.is_empty());
    // The temp file is gone once the job finished.
    assert!(!std::path::Path::new(file).exists());
}

#[tokio::test]
async fn test_delete_is_soft_and_hidden_from_listings() {
    let harness = TestHarness::new().await;
    harness.script_analyzer("geo", &["ip"], None, SUCCESS_BODY);

    let job = harness
        .service
        .submit("alice", "geo", &json!({"dataType": "ip", "data": "1.2.3.4"}))
        .await
        .unwrap();
    harness.wait_for_terminal(&job.id).await;

    harness.service.delete(&job.id).await.unwrap();

    let deleted = harness
        .service
        .get_for_user("alice", &job.id)
        .await
        .unwrap();
    assert_eq!(deleted.status, JobStatus::Deleted);

    let (_, total) = harness
        .service
        .list_for_user("alice", &Default::default(), &triage::Range::All)
        .await
        .unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_timeout_fails_hanging_analyzer() {
    let harness = TestHarness::with_config(Config {
        run_timeout_secs: Some(1),
        ..Config::default()
    })
    .await;
    harness.script_analyzer("hang", &["ip"], None, "sleep 30");

    let job = harness
        .service
        .submit("alice", "hang", &json!({"dataType": "ip", "data": "1.2.3.4"}))
        .await
        .unwrap();

    let finished = harness.wait_for_terminal(&job.id).await;
    assert_eq!(finished.status, JobStatus::Failure);
    assert!(finished.message.contains("timed out"));
}

#[tokio::test]
async fn test_stats_reflect_terminal_states() {
    let harness = TestHarness::new().await;
    harness.script_analyzer("geo", &["ip"], None, SUCCESS_BODY);
    harness.script_analyzer(
        "flaky",
        &["ip"],
        None,
        "cat > /dev/null\necho '{\"success\":false,\"errorMessage\":\"nope\"}'",
    );

    let ok = harness
        .service
        .submit("alice", "geo", &json!({"dataType": "ip", "data": "1.1.1.1"}))
        .await
        .unwrap();
    let bad = harness
        .service
        .submit("alice", "flaky", &json!({"dataType": "ip", "data": "2.2.2.2"}))
        .await
        .unwrap();
    harness.wait_for_terminal(&ok.id).await;
    harness.wait_for_terminal(&bad.id).await;

    let stats = harness.service.stats_for_user("alice").await.unwrap();
    assert_eq!(stats["total"], 2);
    assert_eq!(stats["byStatus"]["Success"], 1);
    assert_eq!(stats["byStatus"]["Failure"], 1);
    assert_eq!(stats["byAnalyzer"]["geo-analyzer"], 1);
    assert_eq!(stats["byAnalyzer"]["flaky-analyzer"], 1);
}
