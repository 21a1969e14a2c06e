//! Proposal generator adapters.
//!
//! [`Proposer`] picks the next investigation action and [`RepairProposer`]
//! revises harness source. Both are opaque: the orchestrator only sees actions
//! and candidate sources. The shipped [`CommandProposer`] pipes a rendered
//! prompt into a configured command; tests use scripted implementations.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::Validator;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::harness::{Finding, HarnessDraft, TargetUnderTest};
use crate::core::session::SessionView;
use crate::core::types::{Action, ToolCall};
use crate::dispatch::{compile_schema, schema_errors};
use crate::io::process::{build_command, run_command_with_timeout};
use crate::io::prompt::PromptEngine;

const ACTION_SCHEMA: &str = include_str!("../../schemas/action.schema.json");

/// Chooses the next investigation action from the full session view.
pub trait Proposer {
    fn propose(&self, view: &SessionView<'_>, tools: &[String]) -> Result<Action>;
}

/// Inputs for one repair revision.
#[derive(Debug, Clone, Copy)]
pub struct RevisionRequest<'a> {
    pub draft: &'a HarnessDraft,
    pub findings: &'a [Finding],
    pub target: Option<&'a TargetUnderTest>,
    /// 1-based repair iteration.
    pub iteration: u32,
    pub iteration_limit: u32,
}

/// Produces candidate revisions of a harness draft.
pub trait RepairProposer {
    fn revise(&self, request: &RevisionRequest<'_>) -> Result<Vec<String>>;
}

/// Proposer that runs a command with the prompt on stdin and reads stdout.
pub struct CommandProposer {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    prompts: PromptEngine,
    action_schema: Validator,
}

impl CommandProposer {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        if command.is_empty() {
            bail!("proposer command must not be empty");
        }
        Ok(Self {
            command,
            timeout,
            output_limit_bytes,
            prompts: PromptEngine::new(),
            action_schema: compile_schema(ACTION_SCHEMA, "action")?,
        })
    }

    fn run(&self, prompt: &str) -> Result<String> {
        let cmd = build_command(&self.command, &[], None)?;
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("run proposer command")?;
        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "proposer timed out");
            bail!("proposer timed out after {}s", self.timeout.as_secs());
        }
        if !output.status.success() {
            bail!("proposer failed: {}", output.failure_summary());
        }
        Ok(output.stdout_text())
    }
}

impl Proposer for CommandProposer {
    #[instrument(skip_all, fields(session = view.id, turn = view.turn))]
    fn propose(&self, view: &SessionView<'_>, tools: &[String]) -> Result<Action> {
        let prompt = self.prompts.render_investigation(view, tools)?;
        let stdout = self.run(&prompt)?;
        let action = parse_action(&stdout, &self.action_schema)?;
        debug!(?action, "proposer chose action");
        Ok(action)
    }
}

impl RepairProposer for CommandProposer {
    #[instrument(skip_all, fields(class = %request.draft.class_name, iteration = request.iteration))]
    fn revise(&self, request: &RevisionRequest<'_>) -> Result<Vec<String>> {
        let prompt = self.prompts.render_repair(
            request.draft,
            request.findings,
            request.target,
            request.iteration,
            request.iteration_limit,
        )?;
        let stdout = self.run(&prompt)?;
        let candidates = extract_code_blocks(&stdout);
        debug!(count = candidates.len(), "proposer returned candidates");
        Ok(candidates)
    }
}

static FENCED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").expect("static regex")
});

/// Parse a proposer reply into an action.
///
/// Accepts a bare JSON object, a fenced JSON block, or the outermost `{...}`
/// span of the reply. The object must match the action schema.
pub fn parse_action(text: &str, schema: &Validator) -> Result<Action> {
    let value = extract_json(text).ok_or_else(|| anyhow!("no JSON object in proposer output"))?;
    let errors = schema_errors(schema, &value);
    if !errors.is_empty() {
        bail!("proposer output violates action schema: {}", errors.join("; "));
    }
    let call: ToolCall = serde_json::from_value(value).context("decode proposed action")?;
    Ok(Action::from(call))
}

fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    for caps in FENCED.captures_iter(text) {
        if let Some(body) = caps.get(1)
            && let Ok(value @ Value::Object(_)) = serde_json::from_str(body.as_str().trim())
        {
            return Some(value);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&trimmed[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Candidate sources from a reply: every fenced block, or the whole reply
/// when it has none.
pub fn extract_code_blocks(text: &str) -> Vec<String> {
    let blocks: Vec<String> = FENCED
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|body| body.as_str().trim_end().to_string())
        .filter(|body| !body.trim().is_empty())
        .collect();
    if !blocks.is_empty() {
        return blocks;
    }
    let whole = text.trim();
    if whole.is_empty() {
        Vec::new()
    } else {
        vec![format!("{whole}\n")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Validator {
        compile_schema(ACTION_SCHEMA, "action").expect("schema")
    }

    #[test]
    fn parses_bare_and_fenced_actions() {
        let action = parse_action(r#"{"tool":"lookup_function","args":{"name":"parse"}}"#, &schema())
            .expect("bare");
        assert_eq!(
            action,
            Action::Call(ToolCall::new("lookup_function", json!({"name": "parse"})))
        );

        let reply = "I will report now.\n```json\n{\"tool\": \"report_result\", \"args\": {\"feasible\": true, \"analysis\": \"reachable\"}}\n```\n";
        let action = parse_action(reply, &schema()).expect("fenced");
        assert!(matches!(action, Action::Report { .. }));
    }

    #[test]
    fn rejects_output_without_a_valid_action() {
        let err = parse_action("no idea", &schema()).expect_err("no json");
        assert!(err.to_string().contains("no JSON object"));

        let err = parse_action(r#"{"args": {}}"#, &schema()).expect_err("missing tool");
        assert!(err.to_string().contains("violates action schema"));
    }

    #[test]
    fn code_blocks_become_candidates() {
        let reply = "Here you go:\n```java\nclass A {}\n```\nor\n```\nclass A { }\n```\n";
        assert_eq!(
            extract_code_blocks(reply),
            vec!["class A {}".to_string(), "class A { }".to_string()]
        );
        assert_eq!(extract_code_blocks("class B {}"), vec!["class B {}\n".to_string()]);
        assert!(extract_code_blocks("  \n").is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn command_proposer_reads_action_from_stdout() {
        use crate::core::protocol::default_steps;
        use crate::core::session::{Session, SessionLimits};
        use crate::test_support::sample_bundle;

        let proposer = CommandProposer::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                r#"cat >/dev/null; echo '{"tool":"search_files","args":{"pattern":"parse("}}'"#
                    .to_string(),
            ],
            Duration::from_secs(5),
            10_000,
        )
        .expect("proposer");
        let session = Session::new(sample_bundle(), SessionLimits::default(), default_steps());
        let action = proposer
            .propose(&session.view(), &["search_files".to_string()])
            .expect("propose");
        assert_eq!(
            action,
            Action::Call(ToolCall::new("search_files", json!({"pattern": "parse("})))
        );
    }
}
