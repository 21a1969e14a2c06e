//! Ordered investigation protocol with step-skipping rules.
//!
//! Steps are configuration. A cursor walks the list: a successful tool call
//! satisfies the first step at or after the cursor that lists the tool, as long
//! as every step it passes over is skippable. The terminal step (the one that
//! lists `report_result`) must be last and can only be reached once every
//! required step before it is satisfied.

use serde::{Deserialize, Serialize};

use crate::core::types::ToolName;
use crate::error::TurnError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestigationStep {
    pub id: String,
    pub title: String,
    pub tools: Vec<ToolName>,
    #[serde(default)]
    pub skippable: bool,
}

impl InvestigationStep {
    fn new(id: &str, title: &str, tools: &[ToolName], skippable: bool) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            tools: tools.to_vec(),
            skippable,
        }
    }

    fn is_terminal(&self) -> bool {
        self.tools.iter().any(|tool| tool.is_terminal())
    }
}

/// Default five-step crash triage protocol.
pub fn default_steps() -> Vec<InvestigationStep> {
    vec![
        InvestigationStep::new(
            "locate-crash",
            "Look up the function at the top of the crash stack",
            &[ToolName::LookupFunction],
            false,
        ),
        InvestigationStep::new(
            "review-target",
            "Review how the fuzz target drives the project API",
            &[ToolName::LookupFunction, ToolName::SearchFiles],
            true,
        ),
        InvestigationStep::new(
            "trace-entry-points",
            "Search for public entry points that reach the crashing code",
            &[ToolName::SearchFiles],
            false,
        ),
        InvestigationStep::new(
            "check-preconditions",
            "Check the preconditions the crashing code relies on",
            &[ToolName::LookupFunction, ToolName::SearchFiles],
            true,
        ),
        InvestigationStep::new(
            "report",
            "Report whether the crash is reachable",
            &[ToolName::ReportResult],
            false,
        ),
    ]
}

/// Check a step list for structural problems. Returns stable messages.
pub fn validate_steps(steps: &[InvestigationStep]) -> Vec<String> {
    let mut errors = Vec::new();
    if steps.is_empty() {
        errors.push("steps must not be empty".to_string());
        return errors;
    }

    let mut seen = std::collections::HashSet::new();
    for (idx, step) in steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            errors.push(format!("steps[{idx}]: id must not be empty"));
        }
        if !seen.insert(step.id.as_str()) {
            errors.push(format!("duplicate step id '{}'", step.id));
        }
        if step.tools.is_empty() {
            errors.push(format!("step '{}': tools must not be empty", step.id));
        }
        let is_last = idx + 1 == steps.len();
        if step.is_terminal() && !is_last {
            errors.push(format!(
                "step '{}': report_result may only appear in the last step",
                step.id
            ));
        }
        if step.is_terminal() && step.tools.len() > 1 {
            errors.push(format!(
                "step '{}': the report step must list only report_result",
                step.id
            ));
        }
    }

    if let Some(last) = steps.last()
        && !last.is_terminal()
    {
        errors.push(format!(
            "last step '{}' must be the report step (tools = [\"report_result\"])",
            last.id
        ));
    }
    errors
}

/// Required steps that no available tool can satisfy.
///
/// A report is refused until every required step is satisfied, so any step
/// returned here would make every session abort.
pub fn unreachable_steps(
    steps: &[InvestigationStep],
    available: impl Fn(ToolName) -> bool,
) -> Vec<String> {
    steps
        .iter()
        .filter(|step| !step.skippable && !step.tools.iter().any(|tool| available(*tool)))
        .map(|step| {
            let tools: Vec<String> = step
                .tools
                .iter()
                .map(|tool| format!("tools.{tool}.command"))
                .collect();
            format!(
                "step '{}' needs one of its tools but none is registered (set {})",
                step.id,
                tools.join(" or ")
            )
        })
        .collect()
}

/// Progress view of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepProgress<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub skippable: bool,
    pub satisfied: bool,
}

/// Cursor over a validated step list.
#[derive(Debug, Clone)]
pub struct ProtocolTracker {
    steps: Vec<InvestigationStep>,
    satisfied: Vec<bool>,
    cursor: usize,
}

impl ProtocolTracker {
    /// Build a tracker. `steps` must pass [`validate_steps`].
    pub fn new(steps: Vec<InvestigationStep>) -> Self {
        let satisfied = vec![false; steps.len()];
        Self {
            steps,
            satisfied,
            cursor: 0,
        }
    }

    fn terminal_index(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    /// Record a successful tool call. Returns the id of the step it satisfied.
    pub fn observe(&mut self, tool: ToolName) -> Option<&str> {
        if tool.is_terminal() {
            return None;
        }
        for idx in self.cursor..self.terminal_index() {
            if self.steps[idx].tools.contains(&tool) {
                self.satisfied[idx] = true;
                self.cursor = idx + 1;
                return Some(self.steps[idx].id.as_str());
            }
            if !self.steps[idx].skippable {
                break;
            }
        }
        None
    }

    /// Reject the terminal report while a required step is still open.
    pub fn check_report(&self) -> Result<(), TurnError> {
        for idx in self.cursor..self.terminal_index() {
            if !self.steps[idx].skippable {
                return Err(TurnError::ProtocolIncomplete {
                    step: self.steps[idx].id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Step the investigation is currently expected to work on.
    pub fn current(&self) -> &InvestigationStep {
        &self.steps[self.cursor.min(self.terminal_index())]
    }

    /// Ids of required steps still blocking the report.
    pub fn pending_required(&self) -> Vec<&str> {
        (self.cursor..self.terminal_index())
            .filter(|idx| !self.steps[*idx].skippable)
            .map(|idx| self.steps[idx].id.as_str())
            .collect()
    }

    pub fn progress(&self) -> Vec<StepProgress<'_>> {
        self.steps
            .iter()
            .zip(&self.satisfied)
            .map(|(step, satisfied)| StepProgress {
                id: &step.id,
                title: &step.title,
                skippable: step.skippable,
                satisfied: *satisfied,
            })
            .collect()
    }
}
