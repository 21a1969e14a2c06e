//! Prompt rendering for the command-backed proposal generator.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::evidence::{Evidence, EvidenceOutcome};
use crate::core::harness::{Finding, HarnessDraft, TargetUnderTest};
use crate::core::session::SessionView;

const INVESTIGATE_TEMPLATE: &str = include_str!("prompts/investigate.md");
const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");

/// Evidence entry flattened to strings for the template.
#[derive(Debug, Clone, Serialize)]
struct EvidenceContext {
    index: usize,
    turn: u32,
    source: String,
    args: String,
    outcome: String,
}

impl EvidenceContext {
    fn from_evidence(entry: &Evidence) -> Self {
        let outcome = match &entry.outcome {
            EvidenceOutcome::Payload { payload } => match payload {
                serde_json::Value::String(text) => format!("```\n{}\n```", text.trim_end()),
                other => format!("```json\n{other}\n```"),
            },
            EvidenceOutcome::Failure { error } => format!("error: {error}"),
            EvidenceOutcome::Abort { reason } => format!("aborted: {reason}"),
        };
        Self {
            index: entry.index,
            turn: entry.turn,
            source: entry.source.to_string(),
            args: entry.args.to_string(),
            outcome,
        }
    }
}

/// One line per finding, as shown to the repair generator.
pub fn describe_finding(finding: &Finding) -> String {
    match finding {
        Finding::ConstraintViolation(v) => match v.line {
            Some(line) => format!("[{}] line {line}: {} ({})", v.rule_id, v.detail, v.message),
            None => format!("[{}] {} ({})", v.rule_id, v.detail, v.message),
        },
        Finding::CompileDiagnostic(d) => match &d.location {
            Some(location) => format!("compiler error at {location}:\n{}", d.message),
            None => format!("compiler error:\n{}", d.message),
        },
    }
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("investigate", INVESTIGATE_TEMPLATE)
            .expect("investigate template should be valid");
        env.add_template("repair", REPAIR_TEMPLATE)
            .expect("repair template should be valid");
        Self { env }
    }

    pub fn render_investigation(&self, view: &SessionView<'_>, tools: &[String]) -> Result<String> {
        let evidence: Vec<EvidenceContext> =
            view.evidence.iter().map(EvidenceContext::from_evidence).collect();
        let template = self.env.get_template("investigate")?;
        let rendered = template.render(context! {
            session_id => view.id,
            turn => view.turn,
            turn_limit => view.turn_limit,
            bundle => view.bundle,
            steps => &view.steps,
            current_step => view.current_step,
            pending_required => &view.pending_required,
            evidence => evidence,
            tools => tools,
        })?;
        Ok(rendered)
    }

    pub fn render_repair(
        &self,
        draft: &HarnessDraft,
        findings: &[Finding],
        target: Option<&TargetUnderTest>,
        iteration: u32,
        iteration_limit: u32,
    ) -> Result<String> {
        let findings: Vec<String> = findings.iter().map(describe_finding).collect();
        let template = self.env.get_template("repair")?;
        let rendered = template.render(context! {
            class_name => &draft.class_name,
            source => draft.source.trim_end(),
            findings => findings,
            target => target,
            iteration => iteration,
            iteration_limit => iteration_limit,
        })?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::evidence::EvidenceSource;
    use crate::core::harness::Diagnostic;
    use crate::core::protocol::default_steps;
    use crate::core::session::{Session, SessionLimits};
    use crate::core::types::ToolName;
    use crate::core::validator::Violation;
    use crate::test_support::sample_bundle;
    use serde_json::json;

    #[test]
    fn investigation_prompt_lists_protocol_and_evidence() {
        let mut session = Session::new(sample_bundle(), SessionLimits::default(), default_steps());
        session.begin_turn().expect("open");
        session
            .record_tool_result(
                ToolName::LookupFunction,
                json!({"name": "Parser.parse"}),
                Ok(json!("public Node parse(Reader r) { ... }")),
            )
            .expect("record");
        session.end_turn();
        session.begin_turn().expect("open");
        session
            .record_rejection(
                EvidenceSource::Unregistered("grep".to_string()),
                json!({}),
                crate::error::TurnError::UnknownTool {
                    name: "grep".to_string(),
                    registered: vec!["lookup_function".to_string()],
                },
            )
            .expect("record");

        let tools = vec!["lookup_function".to_string(), "report_result".to_string()];
        let prompt = PromptEngine::new()
            .render_investigation(&session.view(), &tools)
            .expect("render");
        assert!(prompt.contains("turn 2 of 30"));
        assert!(prompt.contains("- [x] `locate-crash`"));
        assert!(prompt.contains("Current step: `review-target`"));
        assert!(prompt.contains("Required before reporting: trace-entry-points."));
        assert!(prompt.contains("### [0] turn 1, lookup_function"));
        assert!(prompt.contains("public Node parse(Reader r)"));
        assert!(prompt.contains("error: unknown tool 'grep'"));
        assert!(prompt.contains("Registered for this session: lookup_function, report_result."));
    }

    #[test]
    fn repair_prompt_lists_findings() {
        let draft = HarnessDraft::new("public class ParserFuzzer {}\n", "ParserFuzzer");
        let findings = vec![
            Finding::ConstraintViolation(Violation {
                rule_id: "provider-api".to_string(),
                category: "api_whitelist".to_string(),
                message: "Only documented methods".to_string(),
                detail: "data.consumeUnsignedInt is not an allowed FuzzedDataProvider method"
                    .to_string(),
                line: Some(12),
            }),
            Finding::CompileDiagnostic(Diagnostic {
                message: "ParserFuzzer.java:3: error: ';' expected".to_string(),
                location: Some("ParserFuzzer.java:3".to_string()),
            }),
        ];
        let target = TargetUnderTest {
            type_name: "Parser".to_string(),
            method: "parse".to_string(),
        };
        let prompt = PromptEngine::new()
            .render_repair(&draft, &findings, Some(&target), 2, 5)
            .expect("render");
        assert!(prompt.contains("Keep the class name `ParserFuzzer`"));
        assert!(prompt.contains("1. [provider-api] line 12: data.consumeUnsignedInt"));
        assert!(prompt.contains("2. compiler error at ParserFuzzer.java:3:"));
        assert!(prompt.contains("`Parser.parse`"));
        assert!(prompt.contains("Attempt 2 of 5."));
    }
}
