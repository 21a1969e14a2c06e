//! Tool backends: the external collaborators behind registered tools.
//!
//! The [`ToolBackend`] trait decouples dispatch from how a tool is actually
//! answered. The shipped backend runs a configured command; tests use scripted
//! backends that return predetermined payloads without spawning processes.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::types::ToolName;
use crate::io::process::{build_command, run_command_with_timeout};

/// Abstraction over tool collaborators.
///
/// `args` have already passed the tool's schema. An `Err` is recorded as a
/// `ToolFailed` evidence entry; it never aborts the session.
pub trait ToolBackend {
    fn call(&self, tool: ToolName, args: &Value) -> Result<Value>;
}

/// Backend that runs a command per call.
///
/// Arguments may reference `{name}`, `{pattern}`, and `{path}`; `{path}`
/// defaults to `.` when the call omits it. Stdout becomes the payload.
#[derive(Debug, Clone)]
pub struct CommandToolBackend {
    pub command: Vec<String>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
    pub workdir: Option<PathBuf>,
}

impl ToolBackend for CommandToolBackend {
    #[instrument(skip_all, fields(tool = %tool))]
    fn call(&self, tool: ToolName, args: &Value) -> Result<Value> {
        let field = |key: &str| args.get(key).and_then(Value::as_str);
        let substitutions = [
            ("name", field("name").unwrap_or_default()),
            ("pattern", field("pattern").unwrap_or_default()),
            ("path", field("path").unwrap_or(".")),
        ];
        let cmd = build_command(&self.command, &substitutions, self.workdir.as_deref())?;
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "tool command timed out");
            return Err(anyhow!("{tool} timed out after {}s", self.timeout.as_secs()));
        }
        if !output.status.success() {
            return Err(anyhow!("{tool} failed: {}", output.failure_summary()));
        }
        debug!(bytes = output.stdout.len(), "tool command succeeded");
        Ok(Value::String(output.stdout_text()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn backend(script: &str) -> CommandToolBackend {
        CommandToolBackend {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout: Duration::from_secs(5),
            output_limit_bytes: 10_000,
            workdir: None,
        }
    }

    #[test]
    fn stdout_becomes_payload() {
        let payload = backend("echo 'def {name}:'")
            .call(ToolName::LookupFunction, &json!({"name": "parse"}))
            .expect("call");
        assert_eq!(payload, json!("def parse:\n"));
    }

    #[test]
    fn path_defaults_to_current_directory() {
        let payload = backend("echo {pattern} in {path}")
            .call(ToolName::SearchFiles, &json!({"pattern": "needle"}))
            .expect("call");
        assert_eq!(payload, json!("needle in .\n"));
    }

    #[test]
    fn default_commands_treat_dashed_values_as_patterns() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("notes.txt"), "-f/etc/passwd marker\n").expect("write");
        let tools = crate::io::config::ToolsConfig::default();
        let backend = CommandToolBackend {
            command: tools.search_files.command,
            timeout: Duration::from_secs(5),
            output_limit_bytes: 10_000,
            workdir: Some(temp.path().to_path_buf()),
        };
        let payload = backend
            .call(ToolName::SearchFiles, &json!({"pattern": "-f/etc/passwd", "path": "."}))
            .expect("call");
        let text = payload.as_str().expect("text");
        assert!(text.contains("notes.txt:1:-f/etc/passwd marker"), "{text}");
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let err = backend("echo missing >&2; exit 3")
            .call(ToolName::LookupFunction, &json!({"name": "x"}))
            .expect_err("failure");
        assert_eq!(
            err.to_string(),
            "lookup_function failed: exit status 3: missing"
        );
    }
}
