//! Affinity key extraction from messages.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocatorError {
    #[error("affinity key locator {0:?} is malformed")]
    MalformedLocator(String),

    #[error("field {field:?} not found in message")]
    MissingField { field: String },

    #[error("field {field:?} is not a message")]
    NotAMessage { field: String },

    #[error("field {field:?} is not a non-empty string")]
    NotAString { field: String },
}

/// Follow the dotted `locator` path (e.g. "session.name") through `message`
/// and return the string found at its end.
pub fn extract_affinity_key(locator: &str, message: &Value) -> Result<String, LocatorError> {
    if locator.is_empty() || locator.split('.').any(str::is_empty) {
        return Err(LocatorError::MalformedLocator(locator.to_string()));
    }

    let mut current = message;
    let mut walked = String::new();
    for segment in locator.split('.') {
        let Value::Object(fields) = current else {
            return Err(LocatorError::NotAMessage {
                field: if walked.is_empty() { "<root>".into() } else { walked },
            });
        };
        if !walked.is_empty() {
            walked.push('.');
        }
        walked.push_str(segment);
        current = fields
            .get(segment)
            .ok_or_else(|| LocatorError::MissingField { field: walked.clone() })?;
    }

    match current {
        Value::String(key) if !key.is_empty() => Ok(key.clone()),
        _ => Err(LocatorError::NotAString { field: walked }),
    }
}
