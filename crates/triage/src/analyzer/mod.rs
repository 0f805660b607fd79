//! Analyzer registry types consumed by the job service.
//!
//! An analyzer is an organisation-scoped instance of an analyzer
//! definition: the definition describes how to invoke the program, the
//! instance carries per-organisation settings such as rate limits and
//! configuration values.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AttributeError;

pub mod input;
mod registry;

pub use registry::AnalyzerRegistry;

/// Window unit of an analyzer rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateUnit {
    Day,
    Month,
}

impl RateUnit {
    /// Window length in seconds. A month counts as 30 days.
    pub fn seconds(&self) -> i64 {
        match self {
            RateUnit::Day => 86_400,
            RateUnit::Month => 30 * 86_400,
        }
    }
}

/// Organisation-scoped analyzer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analyzer {
    pub id: String,
    pub name: String,
    pub organization: String,
    /// Jobs admitted per rate window. No limit when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_unit: Option<RateUnit>,
    /// Configuration values merged under job parameters.
    #[serde(default)]
    pub config: Map<String, Value>,
    pub analyzer_definition_id: String,
}

/// Invocation metadata shared by all instances of one analyzer program.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerDefinition {
    pub id: String,
    /// Path of the executable.
    pub cmd: PathBuf,
    /// Working directory the program is spawned in.
    pub base_directory: PathBuf,
    /// Observable types this program accepts. Empty accepts everything.
    #[serde(default)]
    pub data_type_list: Vec<String>,
    /// Typed schema of the configuration this program understands.
    #[serde(default)]
    pub configuration_items: Vec<ConfigurationItem>,
    /// Defaults shipped with the program, merged beneath the validated
    /// configuration.
    #[serde(default)]
    pub configuration: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigItemType {
    String,
    Number,
    Boolean,
}

/// One entry of an analyzer configuration schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationItem {
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: ConfigItemType,
    #[serde(default)]
    pub multi: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl ConfigurationItem {
    /// Reads this item's key from `source` with type coercion.
    ///
    /// An absent or null value falls back to the default; a required
    /// item without value or default is a fault. `Ok(None)` means the
    /// key is simply not set.
    pub fn read(
        &self,
        source: &Map<String, Value>,
    ) -> Result<Option<(String, Value)>, AttributeError> {
        let raw = source.get(&self.name).filter(|value| !value.is_null());

        let Some(value) = raw else {
            if let Some(default) = &self.default_value {
                return Ok(Some((self.name.clone(), default.clone())));
            }
            if self.required {
                return Err(AttributeError::Missing(self.name.clone()));
            }
            return Ok(None);
        };

        let coerced = if self.multi {
            let items = value.as_array().ok_or_else(|| AttributeError::InvalidFormat {
                name: self.name.clone(),
                reason: "expected a list".to_string(),
            })?;
            Value::Array(
                items
                    .iter()
                    .map(|item| self.coerce(item))
                    .collect::<Result<Vec<_>, _>>()?,
            )
        } else {
            self.coerce(value)?
        };

        Ok(Some((self.name.clone(), coerced)))
    }

    fn coerce(&self, value: &Value) -> Result<Value, AttributeError> {
        let fault = |reason: &str| AttributeError::InvalidFormat {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        match self.item_type {
            ConfigItemType::String => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(fault("expected a string")),
            },
            ConfigItemType::Number => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) => {
                    if let Ok(integer) = s.parse::<i64>() {
                        return Ok(Value::from(integer));
                    }
                    match s.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                        Some(n) => Ok(Value::Number(n)),
                        None => Err(fault("expected a number")),
                    }
                }
                _ => Err(fault("expected a number")),
            },
            ConfigItemType::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) => match s.as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(fault("expected a boolean")),
                },
                _ => Err(fault("expected a boolean")),
            },
        }
    }
}
