//! Typed error taxonomy shared by both loops.
//!
//! Turn-level failures ([`TurnError`]) are recoverable: they are recorded as
//! evidence and count against the retry budget. The remaining errors are
//! fatal for the operation that raised them.

use serde::{Deserialize, Serialize};

use crate::core::session::SessionStatus;
use crate::core::types::ToolName;

/// Failure of a single investigation turn, stored verbatim in the evidence log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnError {
    /// The proposal named a tool that is not registered for this session.
    #[error("unknown tool '{name}' (registered: {})", .registered.join(", "))]
    UnknownTool {
        name: String,
        registered: Vec<String>,
    },
    /// Arguments did not satisfy the tool's declared schema.
    #[error("arguments for '{tool}' violate its schema: {}", .messages.join("; "))]
    SchemaViolation {
        tool: ToolName,
        messages: Vec<String>,
    },
    /// The terminal report payload was rejected.
    #[error("malformed verdict: {reason}")]
    MalformedVerdict { reason: String },
    /// A required investigation step is still open.
    #[error("investigation step '{step}' must be completed before reporting")]
    ProtocolIncomplete { step: String },
    /// The proposal generator errored or produced an unusable action.
    #[error("proposal generator failed: {reason}")]
    ProposalFailed { reason: String },
    /// The external collaborator ran and reported a failure.
    #[error("tool '{tool}' failed: {reason}")]
    ToolFailed { tool: ToolName, reason: String },
}

impl TurnError {
    /// True when the error should count against the consecutive-failure budget.
    ///
    /// A failing collaborator is still a gathered fact, so it does not.
    pub fn is_turn_failure(&self) -> bool {
        !matches!(self, TurnError::ToolFailed { .. })
    }
}

/// Errors raised by the session state machine itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session {id} is {status} and accepts no further turns")]
    SessionClosed { id: String, status: SessionStatus },
}

/// Field-level problem bundle error, raised before the first turn.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("problem bundle field '{field}' {reason}")]
pub struct BundleError {
    pub field: &'static str,
    pub reason: String,
}

/// Field-level repair request error, raised before the first build.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("repair request field '{field}' {reason}")]
pub struct RequestError {
    pub field: &'static str,
    pub reason: String,
}

/// Constraint rule set load errors.
#[derive(Debug, thiserror::Error)]
pub enum RuleSetError {
    #[error("unsupported rule set version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("duplicate rule id '{0}'")]
    DuplicateId(String),
    #[error("rule '{rule}': invalid pattern: {source}")]
    InvalidPattern {
        rule: String,
        #[source]
        source: regex::Error,
    },
    #[error("rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
}
