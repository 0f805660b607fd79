//! Parses analyzer output and persists reports and artifacts.

use futures_util::future::try_join_all;
use serde::Deserialize;
use serde_json::Value;

use crate::db::{NewArtifact, ReportStore};
use crate::model::Attachment;
use crate::runner::RunOutput;

/// Diagnostic text attached to invalid-output failures is capped here.
const MAX_DIAGNOSTIC_BYTES: usize = 8192;

/// Terminal result of ingesting one analyzer run.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Success,
    Failure {
        message: Option<String>,
        input: Option<String>,
    },
}

/// Wire shape of the analyzer's stdout document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzerOutput {
    #[serde(default)]
    success: bool,
    full: Option<Value>,
    summary: Option<Value>,
    #[serde(default)]
    artifacts: Vec<Value>,
    error_message: Option<String>,
    input: Option<String>,
}

/// Consumes the runner's output for one job.
///
/// On success a report row plus its artifacts are persisted before the
/// outcome is returned, so a Success job always has its report in the
/// store. Every failure path is mapped to a Failure outcome; nothing
/// propagates to the submitter.
pub async fn ingest_output(reports: &ReportStore, job_id: &str, output: &RunOutput) -> IngestOutcome {
    if output.stdout_capped {
        return invalid_output(output);
    }

    let parsed: AnalyzerOutput = match serde_json::from_slice(&output.stdout) {
        Ok(parsed) => parsed,
        Err(e) => {
            log::warn!("Analyzer output for job {} is not JSON: {}", job_id, e);
            return invalid_output(output);
        }
    };

    if !parsed.success {
        return IngestOutcome::Failure {
            message: parsed.error_message,
            input: parsed.input,
        };
    }

    let (Some(full @ Value::Object(_)), Some(summary @ Value::Object(_))) =
        (parsed.full, parsed.summary)
    else {
        log::warn!(
            "Analyzer output for job {} lacks the full/summary objects",
            job_id
        );
        return invalid_output(output);
    };

    let report = match reports
        .create(job_id, full.to_string(), summary.to_string())
        .await
    {
        Ok(report) => report,
        Err(e) => {
            return IngestOutcome::Failure {
                message: Some(format!("Report creation failure: {e}")),
                input: None,
            }
        }
    };

    let artifacts: Vec<NewArtifact> = parsed
        .artifacts
        .iter()
        .filter_map(normalise_artifact)
        .collect();
    let skipped = parsed.artifacts.len() - artifacts.len();
    if skipped > 0 {
        log::warn!(
            "Skipped {} malformed artifacts from analyzer output for job {}",
            skipped,
            job_id
        );
    }

    // All artifact rows must exist before the job is finalised.
    let writes = artifacts
        .into_iter()
        .map(|artifact| reports.add_artifact(&report.id, artifact));
    if let Err(e) = try_join_all(writes).await {
        return IngestOutcome::Failure {
            message: Some(format!("Report creation failure: {e}")),
            input: None,
        };
    }

    IngestOutcome::Success
}

fn invalid_output(output: &RunOutput) -> IngestOutcome {
    let mut diagnostic = output.stderr.clone();
    diagnostic.push_str(&String::from_utf8_lossy(&output.stdout));
    IngestOutcome::Failure {
        message: Some(format!(
            "Invalid output\n{}",
            truncate(diagnostic, MAX_DIAGNOSTIC_BYTES)
        )),
        input: None,
    }
}

/// Maps one emitted artifact object to its stored shape, normalising
/// the `value`/`type` aliases to `data`/`dataType`.
fn normalise_artifact(raw: &Value) -> Option<NewArtifact> {
    let object = raw.as_object()?;

    let data_type = object
        .get("dataType")
        .or_else(|| object.get("type"))
        .and_then(Value::as_str)?
        .to_string();

    let data = object
        .get("data")
        .or_else(|| object.get("value"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let attachment = object
        .get("attachment")
        .and_then(|value| serde_json::from_value::<Attachment>(value.clone()).ok());

    if data.is_none() && attachment.is_none() {
        return None;
    }

    Some(NewArtifact {
        data_type,
        data,
        attachment,
    })
}

/// Byte-capped truncation that never splits a UTF-8 character.
fn truncate(mut text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text
}
