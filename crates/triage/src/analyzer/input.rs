//! Builds the JSON document fed to an analyzer's stdin.

use std::path::Path;

use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use super::{Analyzer, AnalyzerDefinition, ConfigItemType, ConfigurationItem};
use crate::attachment::AttachmentStore;
use crate::error::{AttributeError, AttributeErrors, ExecutionError};
use crate::model::{Attachment, Job, ObservableInput};

/// The analyzer input document, together with the materialised
/// attachment file when the observable is a blob.
///
/// The temp file lives exactly as long as this value: dropping the
/// input after the subprocess finished deletes the file on every exit
/// path.
pub struct AnalyzerInput {
    document: Value,
    attachment_file: Option<NamedTempFile>,
}

impl AnalyzerInput {
    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn render(&self) -> Result<String, ExecutionError> {
        serde_json::to_string(&self.document)
            .map_err(|e| ExecutionError::InputEncoding(e.to_string()))
    }

    /// Path of the materialised attachment, when present.
    pub fn file_path(&self) -> Option<&Path> {
        self.attachment_file.as_ref().map(|file| file.path())
    }
}

/// Builds the stdin document for one job.
///
/// Exactly one of `data` or the `file`/`filename`/`contentType` triple
/// ends up in the document, next to `dataType`, `message` and the
/// merged `config` object.
pub async fn build_input(
    analyzer: &Analyzer,
    definition: &AnalyzerDefinition,
    job: &Job,
    attachments: &dyn AttachmentStore,
) -> Result<AnalyzerInput, ExecutionError> {
    let mut document = Map::new();

    let attachment_file = match job.observable() {
        Some(ObservableInput::Data(data)) => {
            document.insert("data".to_string(), Value::String(data));
            None
        }
        Some(ObservableInput::Attachment(attachment)) => {
            let file = materialise(attachments, &attachment).await?;
            document.insert(
                "file".to_string(),
                Value::String(file.path().display().to_string()),
            );
            document.insert("filename".to_string(), Value::String(attachment.name));
            document.insert(
                "contentType".to_string(),
                Value::String(attachment.content_type),
            );
            Some(file)
        }
        None => return Err(ExecutionError::MissingObservable),
    };

    document.insert("dataType".to_string(), Value::String(job.data_type.clone()));
    document.insert("message".to_string(), Value::String(job.message.clone()));

    let config = effective_config(analyzer, definition, &job.parameters)?;
    document.insert("config".to_string(), Value::Object(config));

    Ok(AnalyzerInput {
        document: Value::Object(document),
        attachment_file,
    })
}

/// Streams the blob into a fresh temp file.
async fn materialise(
    store: &dyn AttachmentStore,
    attachment: &Attachment,
) -> Result<NamedTempFile, ExecutionError> {
    let fault = |reason: String| ExecutionError::Attachment {
        id: attachment.id.clone(),
        reason,
    };

    let mut reader = store
        .source(&attachment.id)
        .await
        .map_err(|e| fault(e.to_string()))?;

    let temp = NamedTempFile::new().map_err(|e| fault(e.to_string()))?;
    let mut file = tokio::fs::File::create(temp.path())
        .await
        .map_err(|e| fault(e.to_string()))?;
    tokio::io::copy(&mut reader, &mut file)
        .await
        .map_err(|e| fault(e.to_string()))?;
    file.flush().await.map_err(|e| fault(e.to_string()))?;

    Ok(temp)
}

/// Items every analyzer understands, validated alongside its own schema.
fn base_configuration_items() -> Vec<ConfigurationItem> {
    vec![
        ConfigurationItem {
            name: "proxy_http".to_string(),
            item_type: ConfigItemType::String,
            multi: false,
            required: false,
            default_value: None,
        },
        ConfigurationItem {
            name: "proxy_https".to_string(),
            item_type: ConfigItemType::String,
            multi: false,
            required: false,
            default_value: None,
        },
        ConfigurationItem {
            name: "auto_extract_artifacts".to_string(),
            item_type: ConfigItemType::Boolean,
            multi: false,
            required: false,
            default_value: Some(Value::Bool(true)),
        },
        ConfigurationItem {
            name: "check_tlp".to_string(),
            item_type: ConfigItemType::Boolean,
            multi: false,
            required: false,
            default_value: Some(Value::Bool(false)),
        },
        ConfigurationItem {
            name: "max_tlp".to_string(),
            item_type: ConfigItemType::Number,
            multi: false,
            required: false,
            default_value: Some(Value::from(2)),
        },
    ]
}

/// Computes the `config` object delivered to the analyzer.
///
/// The analyzer config with parameters merged over it (right wins) is
/// validated against the union of the base schema and the definition's
/// items, collecting every fault instead of stopping at the first. The
/// validated values are then laid over the definition's shipped
/// defaults.
pub fn effective_config(
    analyzer: &Analyzer,
    definition: &AnalyzerDefinition,
    parameters: &Value,
) -> Result<Map<String, Value>, ExecutionError> {
    let mut merged = Value::Object(analyzer.config.clone());
    deep_merge(&mut merged, parameters);
    let merged = merged.as_object().cloned().unwrap_or_default();

    let mut errors = AttributeErrors::default();
    let mut validated = Map::new();
    for item in base_configuration_items()
        .iter()
        .chain(definition.configuration_items.iter())
    {
        match item.read(&merged) {
            Ok(Some((key, value))) => {
                validated.insert(key, value);
            }
            Ok(None) => {}
            Err(error) => errors.push(error),
        }
    }
    if !errors.is_empty() {
        return Err(ExecutionError::Configuration(errors));
    }

    let mut config = Value::Object(definition.configuration.clone());
    deep_merge(&mut config, &Value::Object(validated));
    Ok(config.as_object().cloned().unwrap_or_default())
}

/// Rejects submissions above the analyzer's TLP ceiling.
///
/// Evaluated at admission time; a configuration that does not validate
/// is left for the execution pipeline to report.
pub fn check_tlp(
    analyzer: &Analyzer,
    definition: &AnalyzerDefinition,
    parameters: &Value,
    tlp: i32,
) -> Result<(), AttributeError> {
    let Ok(config) = effective_config(analyzer, definition, parameters) else {
        return Ok(());
    };
    let enabled = config
        .get("check_tlp")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if !enabled {
        return Ok(());
    }
    let max_tlp = config.get("max_tlp").and_then(Value::as_i64).unwrap_or(2);
    if i64::from(tlp) > max_tlp {
        return Err(AttributeError::InvalidFormat {
            name: "tlp".to_string(),
            reason: format!("tlp {tlp} exceeds the analyzer's maximum of {max_tlp}"),
        });
    }
    Ok(())
}

/// Recursive merge; objects merge key-wise, anything else from the
/// overlay replaces the target.
pub fn deep_merge(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(target_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match target_map.get_mut(key) {
                    Some(target_value) => deep_merge(target_value, overlay_value),
                    None => {
                        target_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (target, overlay) => *target = overlay.clone(),
    }
}
