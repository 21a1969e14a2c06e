//! Compiler collaborators for harness drafts.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument, warn};

use crate::core::diagnostics::{log_tail, parse_build_log};
use crate::core::harness::{Diagnostic, HarnessDraft, is_java_identifier};
use crate::io::process::{build_command, run_command_with_timeout};

const LOG_TAIL_LINES: usize = 20;

/// Builds a draft and reports its error diagnostics, empty when it compiles.
///
/// An `Err` means the build could not be attempted at all; it is not a
/// finding.
pub trait Compiler {
    fn compile(&self, draft: &HarnessDraft) -> Result<Vec<Diagnostic>>;
}

/// Compiler used when no build command is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipCompiler;

impl Compiler for SkipCompiler {
    fn compile(&self, _draft: &HarnessDraft) -> Result<Vec<Diagnostic>> {
        Ok(Vec::new())
    }
}

/// Writes `<workdir>/<ClassName>.java` and runs the build command in `workdir`.
///
/// `{source}` expands to the written file and `{class}` to the class name.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    pub command: Vec<String>,
    pub timeout: Duration,
    pub workdir: PathBuf,
    pub max_diagnostics: usize,
    pub output_limit_bytes: usize,
}

impl Compiler for CommandCompiler {
    #[instrument(skip_all, fields(class = %draft.class_name))]
    fn compile(&self, draft: &HarnessDraft) -> Result<Vec<Diagnostic>> {
        if !is_java_identifier(&draft.class_name) {
            bail!("class name '{}' is not a valid file name", draft.class_name);
        }
        fs::create_dir_all(&self.workdir)
            .with_context(|| format!("create build directory {}", self.workdir.display()))?;
        let source_path = self.workdir.join(format!("{}.java", draft.class_name));
        fs::write(&source_path, &draft.source)
            .with_context(|| format!("write {}", source_path.display()))?;

        let source_arg = source_path.to_string_lossy();
        let cmd = build_command(
            &self.command,
            &[("source", source_arg.as_ref()), ("class", draft.class_name.as_str())],
            Some(&self.workdir),
        )?;
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .context("run build command")?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "build timed out");
            return Ok(vec![Diagnostic::new(format!(
                "build timed out after {}s",
                self.timeout.as_secs()
            ))]);
        }

        let log = output.combined_text();
        let diagnostics = parse_build_log(&log, self.max_diagnostics);
        if output.status.success() {
            debug!(count = diagnostics.len(), "build succeeded");
            return Ok(diagnostics);
        }
        if diagnostics.is_empty() {
            debug!("build failed without parseable diagnostics");
            return Ok(vec![log_tail(&log, LOG_TAIL_LINES)]);
        }
        debug!(count = diagnostics.len(), "build failed");
        Ok(diagnostics)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn compiler(dir: &std::path::Path, script: &str) -> CommandCompiler {
        CommandCompiler {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                script.to_string(),
                "build".to_string(),
                "{source}".to_string(),
            ],
            timeout: Duration::from_secs(5),
            workdir: dir.to_path_buf(),
            max_diagnostics: 20,
            output_limit_bytes: 100_000,
        }
    }

    #[test]
    fn successful_build_has_no_diagnostics() {
        let temp = tempfile::tempdir().expect("tempdir");
        let draft = HarnessDraft::new("public class A {}\n", "A");
        let diagnostics = compiler(temp.path(), "test -f \"$1\"")
            .compile(&draft)
            .expect("compile");
        assert!(diagnostics.is_empty());
        let written = fs::read_to_string(temp.path().join("A.java")).expect("read");
        assert_eq!(written, draft.source);
    }

    #[test]
    fn failed_build_is_grouped_into_diagnostics() {
        let temp = tempfile::tempdir().expect("tempdir");
        let script = "echo 'A.java:3: error: cannot find symbol' >&2; \
                      echo '    foo();' >&2; echo '1 error' >&2; exit 1";
        let diagnostics = compiler(temp.path(), script)
            .compile(&HarnessDraft::new("class A {}", "A"))
            .expect("compile");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].location.as_deref(), Some("A.java:3"));
        assert!(diagnostics[0].message.contains("foo();"));
    }

    #[test]
    fn unparseable_failure_keeps_the_log_tail() {
        let temp = tempfile::tempdir().expect("tempdir");
        let diagnostics = compiler(temp.path(), "echo 'toolchain exploded' >&2; exit 2")
            .compile(&HarnessDraft::new("class A {}", "A"))
            .expect("compile");
        assert_eq!(diagnostics, vec![Diagnostic::new("toolchain exploded")]);
    }

    #[test]
    fn rejects_class_names_that_escape_the_workdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(
            compiler(temp.path(), "true")
                .compile(&HarnessDraft::new("class A {}", "../A"))
                .is_err()
        );
    }
}
