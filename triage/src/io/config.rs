//! Orchestrator configuration stored in `triage.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::protocol::{InvestigationStep, default_steps, validate_steps};
use crate::core::session::SessionLimits;

/// Orchestrator configuration (TOML).
///
/// Missing fields default to the values below, so an empty file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TriageConfig {
    /// Hard cap on investigation turns per session.
    pub turn_limit: u32,

    /// Consecutive failed turns tolerated before a session aborts.
    pub max_turn_retries: u32,

    /// Revision budget for the repair loop.
    pub repair_iteration_limit: u32,

    /// Compiler diagnostic blocks kept per build.
    pub max_diagnostics: usize,

    /// Tool payloads and collaborator output beyond this many bytes are truncated.
    pub tool_output_limit_bytes: usize,

    /// Rule file; the embedded default rule set is used when unset.
    pub rules_path: Option<PathBuf>,

    pub proposer: CommandConfig,
    pub tools: ToolsConfig,
    pub compiler: CompilerConfig,

    /// Investigation protocol, in order.
    pub steps: Vec<InvestigationStep>,
}

/// A collaborator command and its timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl CommandConfig {
    fn new(command: &[&str], timeout_secs: u64) -> Self {
        Self {
            command: command.iter().map(|arg| arg.to_string()).collect(),
            timeout_secs,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn is_configured(&self) -> bool {
        self.command.first().is_some_and(|program| !program.trim().is_empty())
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self::new(&["triage-proposer"], 5 * 60)
    }
}

/// Tool backends. An empty command leaves the tool unregistered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolsConfig {
    pub lookup_function: CommandConfig,
    pub search_files: CommandConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            // `--` keeps proposer-supplied values from being read as grep options.
            lookup_function: CommandConfig::new(&["grep", "-rn", "-F", "--", "{name}(", "."], 60),
            search_files: CommandConfig::new(
                &["grep", "-rn", "-E", "--", "{pattern}", "{path}"],
                60,
            ),
        }
    }
}

/// Build step for harness drafts.
///
/// `command` may reference `{source}` (the written `.java` file) and
/// `{class}`. An empty command skips compilation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CompilerConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub workdir: PathBuf,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 5 * 60,
            workdir: PathBuf::from(".triage/build"),
        }
    }
}

impl Default for TriageConfig {
    fn default() -> Self {
        let limits = SessionLimits::default();
        Self {
            turn_limit: limits.turn_limit,
            max_turn_retries: limits.max_turn_retries,
            repair_iteration_limit: 5,
            max_diagnostics: 20,
            tool_output_limit_bytes: 100_000,
            rules_path: None,
            proposer: CommandConfig::default(),
            tools: ToolsConfig::default(),
            compiler: CompilerConfig::default(),
            steps: default_steps(),
        }
    }
}

impl TriageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.turn_limit == 0 {
            return Err(anyhow!("turn_limit must be > 0"));
        }
        if self.repair_iteration_limit == 0 {
            return Err(anyhow!("repair_iteration_limit must be > 0"));
        }
        if self.max_diagnostics == 0 {
            return Err(anyhow!("max_diagnostics must be > 0"));
        }
        if self.tool_output_limit_bytes == 0 {
            return Err(anyhow!("tool_output_limit_bytes must be > 0"));
        }
        if !self.proposer.is_configured() {
            return Err(anyhow!("proposer.command must be a non-empty array"));
        }
        for (name, timeout_secs) in [
            ("proposer", self.proposer.timeout_secs),
            ("tools.lookup_function", self.tools.lookup_function.timeout_secs),
            ("tools.search_files", self.tools.search_files.timeout_secs),
            ("compiler", self.compiler.timeout_secs),
        ] {
            if timeout_secs == 0 {
                return Err(anyhow!("{name}.timeout_secs must be > 0"));
            }
        }
        let step_errors = validate_steps(&self.steps);
        if !step_errors.is_empty() {
            return Err(anyhow!("invalid steps: {}", step_errors.join("; ")));
        }
        Ok(())
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            turn_limit: self.turn_limit,
            max_turn_retries: self.max_turn_retries,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TriageConfig::default()`.
pub fn load_config(path: &Path) -> Result<TriageConfig> {
    if !path.exists() {
        let cfg = TriageConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TriageConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &TriageConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, TriageConfig::default());
        assert_eq!(cfg.session_limits(), SessionLimits::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("triage.toml");
        let mut cfg = TriageConfig::default();
        cfg.turn_limit = 5;
        cfg.compiler.command = vec!["javac".to_string(), "{source}".to_string()];
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("triage.toml");
        fs::write(&path, "turn_limit = 7\n[proposer]\ncommand = [\"my-model\"]\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.turn_limit, 7);
        assert_eq!(cfg.proposer.command, vec!["my-model".to_string()]);
        assert_eq!(cfg.proposer.timeout_secs, 300);
        assert_eq!(cfg.steps, default_steps());
    }

    #[test]
    fn rejects_invalid_values() {
        let mut cfg = TriageConfig::default();
        cfg.turn_limit = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = TriageConfig::default();
        cfg.proposer.command = vec![" ".to_string()];
        assert!(cfg.validate().is_err());

        let mut cfg = TriageConfig::default();
        cfg.steps.swap(0, 4);
        let err = cfg.validate().expect_err("report step first");
        assert!(err.to_string().starts_with("invalid steps:"));
    }
}
