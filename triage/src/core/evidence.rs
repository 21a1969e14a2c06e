//! Append-only evidence store for a single session.
//!
//! Entries are indexed by dispatch-completion order and can never be removed
//! or rewritten; the store only exposes shared slices.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::ToolName;
use crate::error::TurnError;

/// Who produced an evidence entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum EvidenceSource {
    /// A registered tool (including the terminal tool on rejection).
    Tool(ToolName),
    /// A tool name the registry did not recognize.
    Unregistered(String),
    /// The proposal generator itself failed.
    Proposer,
    /// The orchestrator recorded a session-level event.
    Orchestrator,
}

impl fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceSource::Tool(tool) => write!(f, "{tool}"),
            EvidenceSource::Unregistered(name) => write!(f, "{name} (unregistered)"),
            EvidenceSource::Proposer => f.write_str("proposer"),
            EvidenceSource::Orchestrator => f.write_str("orchestrator"),
        }
    }
}

/// Result half of an evidence entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EvidenceOutcome {
    /// Verbatim collaborator payload.
    Payload { payload: Value },
    /// Typed failure.
    Failure { error: TurnError },
    /// Session ended without a reported verdict.
    Abort { reason: String },
}

impl EvidenceOutcome {
    pub fn is_payload(&self) -> bool {
        matches!(self, EvidenceOutcome::Payload { .. })
    }
}

/// One immutable fact gathered during a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Position in the store (0-based).
    pub index: usize,
    /// Turn that produced the entry (0 for events before the first turn).
    pub turn: u32,
    pub source: EvidenceSource,
    pub args: Value,
    pub outcome: EvidenceOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct EvidenceStore {
    entries: Vec<Evidence>,
}

impl EvidenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its index.
    pub fn append(
        &mut self,
        turn: u32,
        source: EvidenceSource,
        args: Value,
        outcome: EvidenceOutcome,
    ) -> usize {
        let index = self.entries.len();
        self.entries.push(Evidence {
            index,
            turn,
            source,
            args,
            outcome,
        });
        index
    }

    pub fn entries(&self) -> &[Evidence] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&Evidence> {
        self.entries.get(index)
    }

    pub fn last(&self) -> Option<&Evidence> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
