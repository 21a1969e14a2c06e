//! Immutable problem bundle supplied once per investigation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::BundleError;

/// Inputs to a crash-triage session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemBundle {
    /// Fuzz target source that produced the crash.
    pub target_artifact: String,
    /// Requirements the target was generated against.
    pub requirements: String,
    /// Crash stack trace.
    pub stacktrace: String,
    /// Prior crash analysis text.
    pub crash_analysis: String,
}

const FIELDS: [&str; 4] = [
    "target_artifact",
    "requirements",
    "stacktrace",
    "crash_analysis",
];

impl ProblemBundle {
    /// Parse a bundle from JSON, reporting the first offending field in
    /// declaration order.
    pub fn from_json(value: &Value) -> Result<Self, BundleError> {
        let object = value.as_object().ok_or_else(|| BundleError {
            field: "<root>",
            reason: "must be a JSON object".to_string(),
        })?;

        let take = |field: &'static str| -> Result<String, BundleError> {
            let text = match object.get(field) {
                None | Some(Value::Null) => {
                    return Err(BundleError {
                        field,
                        reason: "is missing".to_string(),
                    });
                }
                Some(Value::String(text)) => text,
                Some(other) => {
                    return Err(BundleError {
                        field,
                        reason: format!("must be a string, found {}", json_kind(other)),
                    });
                }
            };
            if text.trim().is_empty() {
                return Err(BundleError {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
            Ok(text.clone())
        };

        // Struct fields evaluate in order, so errors surface in FIELDS order.
        Ok(Self {
            target_artifact: take(FIELDS[0])?,
            requirements: take(FIELDS[1])?,
            stacktrace: take(FIELDS[2])?,
            crash_analysis: take(FIELDS[3])?,
        })
    }

    /// Deterministic session id: `s-` plus 12 hex digits of the SHA-256 of the
    /// fields as a JSON array in declaration order.
    pub fn session_id(&self) -> String {
        let canonical = serde_json::json!([
            self.target_artifact,
            self.requirements,
            self.stacktrace,
            self.crash_analysis,
        ])
        .to_string();
        let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
        format!("s-{}", &digest[..12])
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
