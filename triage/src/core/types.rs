//! Shared deterministic types for the orchestration core.
//!
//! These types define the contracts between the state machine, the
//! dispatcher, and the proposal generator. They carry no I/O.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The closed set of tools a session can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    LookupFunction,
    SearchFiles,
    ReportResult,
}

impl ToolName {
    pub const ALL: [ToolName; 3] = [
        ToolName::LookupFunction,
        ToolName::SearchFiles,
        ToolName::ReportResult,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::LookupFunction => "lookup_function",
            ToolName::SearchFiles => "search_files",
            ToolName::ReportResult => "report_result",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str() == name)
    }

    /// The terminal tool seals the session instead of reaching a collaborator.
    pub fn is_terminal(self) -> bool {
        self == ToolName::ReportResult
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool invocation as proposed. The name is resolved by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default = "empty_args")]
    pub args: Value,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
        }
    }
}

fn empty_args() -> Value {
    Value::Object(Map::new())
}

/// Next action chosen by the proposal generator.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Gather evidence through a registered tool.
    Call(ToolCall),
    /// Terminal report; `args` follow the `report_result` schema.
    Report { args: Value },
}

impl Action {
    /// Lower the action to the wire-level tool call the dispatcher validates.
    pub fn into_call(self) -> ToolCall {
        match self {
            Action::Call(call) => call,
            Action::Report { args } => ToolCall::new(ToolName::ReportResult.as_str(), args),
        }
    }
}

impl From<ToolCall> for Action {
    fn from(call: ToolCall) -> Self {
        if call.tool == ToolName::ReportResult.as_str() {
            Action::Report { args: call.args }
        } else {
            Action::Call(call)
        }
    }
}
