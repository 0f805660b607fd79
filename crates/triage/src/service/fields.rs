//! Parses submission fields into a validated record.
//!
//! Two wire shapes are accepted. The modern one carries everything at
//! the top level; the legacy one nests `dataType`, `tlp`, `message` and
//! `parameters` under an `attributes` object, which takes precedence
//! when present. The observable and `force` always sit at the top
//! level. Faults are accumulated so the caller sees all of them at
//! once.

use serde_json::{Map, Value};

use crate::error::{AttributeError, AttributeErrors};
use crate::model::{Attachment, ObservableInput};

pub const DEFAULT_TLP: i32 = 2;

/// A validated submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub data_type: String,
    pub observable: ObservableInput,
    pub tlp: i32,
    pub message: String,
    pub parameters: Value,
    pub force: bool,
}

pub fn parse_submission(fields: &Value) -> Result<Submission, AttributeErrors> {
    let mut errors = AttributeErrors::default();

    let top = match fields.as_object() {
        Some(object) => object,
        None => {
            errors.push(AttributeError::InvalidFormat {
                name: "fields".to_string(),
                reason: "expected a JSON object".to_string(),
            });
            return Err(errors);
        }
    };

    // Legacy shape: a top-level `attributes` object wins.
    let attributes = top
        .get("attributes")
        .and_then(Value::as_object)
        .unwrap_or(top);

    let data_type = match attributes.get("dataType") {
        Some(Value::String(value)) if !value.is_empty() => value.clone(),
        Some(_) => {
            errors.push(AttributeError::InvalidFormat {
                name: "dataType".to_string(),
                reason: "expected a non-empty string".to_string(),
            });
            String::new()
        }
        None => {
            errors.push(AttributeError::Missing("dataType".to_string()));
            String::new()
        }
    };

    let tlp = read_tlp(attributes, &mut errors);
    let message = read_message(attributes, &mut errors);
    let parameters = read_parameters(attributes, &mut errors);
    let force = read_force(top, &mut errors);
    let observable = read_observable(top, &mut errors);

    let observable = match observable {
        Some(observable) => observable,
        // Placeholder: errors is non-empty on this path.
        None => ObservableInput::Data(String::new()),
    };

    errors.into_result(Submission {
        data_type,
        observable,
        tlp,
        message,
        parameters,
        force,
    })
}

fn read_tlp(attributes: &Map<String, Value>, errors: &mut AttributeErrors) -> i32 {
    match attributes.get("tlp") {
        None | Some(Value::Null) => DEFAULT_TLP,
        Some(value) => match value.as_i64() {
            Some(tlp) if (0..=3).contains(&tlp) => tlp as i32,
            _ => {
                errors.push(AttributeError::InvalidFormat {
                    name: "tlp".to_string(),
                    reason: "expected an integer between 0 and 3".to_string(),
                });
                DEFAULT_TLP
            }
        },
    }
}

fn read_message(attributes: &Map<String, Value>, errors: &mut AttributeErrors) -> String {
    match attributes.get("message") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(message)) => message.clone(),
        Some(_) => {
            errors.push(AttributeError::InvalidFormat {
                name: "message".to_string(),
                reason: "expected a string".to_string(),
            });
            String::new()
        }
    }
}

fn read_parameters(attributes: &Map<String, Value>, errors: &mut AttributeErrors) -> Value {
    match attributes.get("parameters") {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(value @ Value::Object(_)) => value.clone(),
        Some(_) => {
            errors.push(AttributeError::InvalidFormat {
                name: "parameters".to_string(),
                reason: "expected a JSON object".to_string(),
            });
            Value::Object(Map::new())
        }
    }
}

fn read_force(top: &Map<String, Value>, errors: &mut AttributeErrors) -> bool {
    match top.get("force") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(force)) => *force,
        Some(_) => {
            errors.push(AttributeError::InvalidFormat {
                name: "force".to_string(),
                reason: "expected a boolean".to_string(),
            });
            false
        }
    }
}

fn read_observable(
    top: &Map<String, Value>,
    errors: &mut AttributeErrors,
) -> Option<ObservableInput> {
    let data = top.get("data").filter(|value| !value.is_null());
    let attachment = top.get("attachment").filter(|value| !value.is_null());

    match (data, attachment) {
        (Some(_), Some(_)) => {
            errors.push(AttributeError::InvalidFormat {
                name: "data".to_string(),
                reason: "exactly one of data and attachment is allowed".to_string(),
            });
            None
        }
        (Some(Value::String(value)), None) => Some(ObservableInput::Data(value.clone())),
        (Some(_), None) => {
            errors.push(AttributeError::InvalidFormat {
                name: "data".to_string(),
                reason: "expected a string".to_string(),
            });
            None
        }
        (None, Some(value)) => match serde_json::from_value::<Attachment>(value.clone()) {
            Ok(attachment) => Some(ObservableInput::Attachment(attachment)),
            Err(e) => {
                errors.push(AttributeError::InvalidFormat {
                    name: "attachment".to_string(),
                    reason: format!("expected an attachment reference: {e}"),
                });
                None
            }
        },
        (None, None) => {
            errors.push(AttributeError::Missing("data".to_string()));
            None
        }
    }
}
