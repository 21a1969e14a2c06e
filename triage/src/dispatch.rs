//! Tool registry and dispatcher.
//!
//! Every proposed call is resolved against the closed tool set and validated
//! against the tool's embedded JSON Schema (Draft 2020-12) before a backend is
//! invoked. The dispatcher never mutates the session; it returns a
//! [`Dispatch`] that the investigation loop records.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use jsonschema::{Draft, Validator};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::evidence::EvidenceSource;
use crate::core::types::{ToolCall, ToolName};
use crate::error::TurnError;
use crate::io::tools::ToolBackend;

const LOOKUP_FUNCTION_SCHEMA: &str = include_str!("../schemas/tools/lookup_function.schema.json");
const SEARCH_FILES_SCHEMA: &str = include_str!("../schemas/tools/search_files.schema.json");
const REPORT_RESULT_SCHEMA: &str = include_str!("../schemas/tools/report_result.schema.json");

fn schema_source(tool: ToolName) -> &'static str {
    match tool {
        ToolName::LookupFunction => LOOKUP_FUNCTION_SCHEMA,
        ToolName::SearchFiles => SEARCH_FILES_SCHEMA,
        ToolName::ReportResult => REPORT_RESULT_SCHEMA,
    }
}

/// Compile a JSON Schema (Draft 2020-12).
pub fn compile_schema(raw: &str, label: &str) -> Result<Validator> {
    let value: Value =
        serde_json::from_str(raw).with_context(|| format!("parse {label} schema"))?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&value)
        .map_err(|err| anyhow::anyhow!("compile {label} schema: {err}"))
}

/// Schema error messages for `instance`, empty when valid.
pub fn schema_errors(validator: &Validator, instance: &Value) -> Vec<String> {
    validator
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect()
}

/// What happened to one proposed call.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The collaborator ran; `outcome` is its payload or a `ToolFailed` error.
    Completed {
        tool: ToolName,
        args: Value,
        outcome: Result<Value, TurnError>,
    },
    /// A schema-valid terminal report. The session validates the verdict.
    Report { args: Value },
    /// Rejected before any collaborator was invoked.
    Rejected {
        source: EvidenceSource,
        args: Value,
        error: TurnError,
    },
}

pub struct ToolRegistry {
    backends: BTreeMap<ToolName, Box<dyn ToolBackend>>,
    schemas: BTreeMap<ToolName, Validator>,
    output_limit_bytes: usize,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("output_limit_bytes", &self.output_limit_bytes)
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    /// Registry with only the terminal tool registered.
    pub fn new(output_limit_bytes: usize) -> Result<Self> {
        let mut schemas = BTreeMap::new();
        for tool in ToolName::ALL {
            schemas.insert(tool, compile_schema(schema_source(tool), tool.as_str())?);
        }
        Ok(Self {
            backends: BTreeMap::new(),
            schemas,
            output_limit_bytes,
        })
    }

    pub fn register(&mut self, tool: ToolName, backend: Box<dyn ToolBackend>) -> Result<()> {
        if tool.is_terminal() {
            bail!("{tool} is handled by the session and cannot have a backend");
        }
        self.backends.insert(tool, backend);
        Ok(())
    }

    /// Registered tool names in stable order, terminal tool included.
    pub fn registered(&self) -> Vec<String> {
        ToolName::ALL
            .into_iter()
            .filter(|tool| self.is_registered(*tool))
            .map(|tool| tool.as_str().to_string())
            .collect()
    }

    pub fn is_registered(&self, tool: ToolName) -> bool {
        tool.is_terminal() || self.backends.contains_key(&tool)
    }

    pub fn resolve(&self, name: &str) -> Option<ToolName> {
        ToolName::parse(name).filter(|tool| self.is_registered(*tool))
    }

    #[instrument(skip_all, fields(tool = %call.tool))]
    pub fn dispatch(&self, call: ToolCall) -> Dispatch {
        let ToolCall { tool: name, args } = call;
        let Some(tool) = self.resolve(&name) else {
            warn!("unknown tool");
            return Dispatch::Rejected {
                source: EvidenceSource::Unregistered(name.clone()),
                args,
                error: TurnError::UnknownTool {
                    name,
                    registered: self.registered(),
                },
            };
        };

        let messages = self
            .schemas
            .get(&tool)
            .map(|schema| schema_errors(schema, &args))
            .unwrap_or_default();
        if !messages.is_empty() {
            debug!(count = messages.len(), "arguments rejected by schema");
            let error = if tool.is_terminal() {
                TurnError::MalformedVerdict {
                    reason: messages.join("; "),
                }
            } else {
                TurnError::SchemaViolation { tool, messages }
            };
            return Dispatch::Rejected {
                source: EvidenceSource::Tool(tool),
                args,
                error,
            };
        }

        if tool.is_terminal() {
            return Dispatch::Report { args };
        }

        let Some(backend) = self.backends.get(&tool) else {
            // `resolve` only admits tools with a backend.
            return Dispatch::Rejected {
                source: EvidenceSource::Unregistered(name.clone()),
                args,
                error: TurnError::UnknownTool {
                    name,
                    registered: self.registered(),
                },
            };
        };
        let outcome = match backend.call(tool, &args) {
            Ok(payload) => Ok(bound_payload(payload, self.output_limit_bytes)),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "tool backend failed");
                Err(TurnError::ToolFailed {
                    tool,
                    reason: format!("{err:#}"),
                })
            }
        };
        Dispatch::Completed {
            tool,
            args,
            outcome,
        }
    }
}

/// Cap a payload at `limit` bytes, appending a truncation notice.
///
/// Non-string payloads that exceed the limit are stored as truncated JSON text.
fn bound_payload(payload: Value, limit: usize) -> Value {
    let text = match payload {
        Value::String(text) => text,
        other => {
            let rendered = other.to_string();
            if rendered.len() <= limit {
                return other;
            }
            rendered
        }
    };
    if text.len() <= limit {
        return Value::String(text);
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!(
        "{}\n[truncated {} bytes]",
        &text[..cut],
        text.len() - cut
    ))
}
