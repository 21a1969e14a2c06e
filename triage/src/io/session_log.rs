//! Audit artifacts for investigations and repairs.
//!
//! Sessions land in `<out>/sessions/<id>/` and repairs in
//! `<out>/repairs/<class>/`, one directory per revision.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::harness::{Finding, TargetUnderTest};
use crate::core::session::{AbortReason, Session, SessionLimits, SessionStatus};
use crate::repair::{RepairOutcome, RepairStatus};

#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub bundle_path: PathBuf,
    pub evidence_path: PathBuf,
    pub verdict_path: PathBuf,
    pub meta_path: PathBuf,
}

impl SessionPaths {
    pub fn new(out: &Path, session_id: &str) -> Self {
        let dir = out.join("sessions").join(session_id);
        Self {
            bundle_path: dir.join("bundle.json"),
            evidence_path: dir.join("evidence.jsonl"),
            verdict_path: dir.join("verdict.json"),
            meta_path: dir.join("meta.json"),
            dir,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionMeta<'a> {
    pub session_id: &'a str,
    pub status: SessionStatus,
    pub turns: u32,
    pub limits: SessionLimits,
    pub evidence_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<&'a AbortReason>,
}

/// Write every artifact of a session. Re-running overwrites the directory's files.
pub fn write_session(out: &Path, session: &Session) -> Result<SessionPaths> {
    let paths = SessionPaths::new(out, session.id());
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create session dir {}", paths.dir.display()))?;

    write_json(&paths.bundle_path, session.bundle())?;

    let mut evidence = String::new();
    for entry in session.evidence() {
        evidence.push_str(&serde_json::to_string(entry).context("serialize evidence entry")?);
        evidence.push('\n');
    }
    write_text(&paths.evidence_path, &evidence)?;

    if let Some(verdict) = session.verdict() {
        write_json(&paths.verdict_path, verdict)?;
    }
    write_json(
        &paths.meta_path,
        &SessionMeta {
            session_id: session.id(),
            status: session.status(),
            turns: session.turn(),
            limits: session.limits(),
            evidence_count: session.evidence().len(),
            abort_reason: session.abort_reason(),
        },
    )?;
    Ok(paths)
}

#[derive(Debug, Clone)]
pub struct RepairPaths {
    pub dir: PathBuf,
    pub outcome_path: PathBuf,
}

impl RepairPaths {
    pub fn new(out: &Path, class_name: &str) -> Self {
        let dir = out.join("repairs").join(class_name);
        Self {
            outcome_path: dir.join("outcome.json"),
            dir,
        }
    }

    pub fn revision_dir(&self, number: u32) -> PathBuf {
        self.dir.join(number.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairSummary<'a> {
    pub class_name: &'a str,
    pub status: RepairStatus,
    pub final_revision: u32,
    pub passes: u32,
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<&'a TargetUnderTest>,
    pub findings: &'a [Finding],
}

/// Write each revision's `draft.java` and `findings.json` (the findings that
/// triggered it), then `outcome.json`.
pub fn write_repair(out: &Path, outcome: &RepairOutcome) -> Result<RepairPaths> {
    let class_name = outcome.draft().class_name.as_str();
    let paths = RepairPaths::new(out, class_name);
    for revision in outcome.chain.revisions() {
        let dir = paths.revision_dir(revision.number);
        fs::create_dir_all(&dir).with_context(|| format!("create revision dir {}", dir.display()))?;
        write_text(&dir.join("draft.java"), &revision.draft.source)?;
        write_json(&dir.join("findings.json"), &revision.trigger)?;
    }
    write_json(
        &paths.outcome_path,
        &RepairSummary {
            class_name,
            status: outcome.status,
            final_revision: outcome.final_revision().number,
            passes: outcome.passes,
            iterations: outcome.iterations,
            target: outcome.target.as_ref(),
            findings: &outcome.findings,
        },
    )?;
    Ok(paths)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    let mut file = fs::File::create(path).with_context(|| format!("create {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::default_steps;
    use crate::core::types::ToolName;
    use crate::test_support::sample_bundle;
    use serde_json::{Value, json};

    #[test]
    fn session_paths_are_stable() {
        let paths = SessionPaths::new(Path::new("/out"), "s-0123456789ab");
        assert!(paths.dir.ends_with("sessions/s-0123456789ab"));
        assert!(paths.evidence_path.ends_with("evidence.jsonl"));
    }

    #[test]
    fn writes_aborted_session_artifacts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut session = Session::new(
            sample_bundle(),
            SessionLimits {
                turn_limit: 1,
                max_turn_retries: 3,
            },
            default_steps(),
        );
        session.begin_turn().expect("turn");
        session
            .record_tool_result(
                ToolName::LookupFunction,
                json!({"name": "parse"}),
                Ok(json!("Node parse(Reader r)")),
            )
            .expect("record");
        session.end_turn();

        let paths = write_session(temp.path(), &session).expect("write");
        let evidence = fs::read_to_string(&paths.evidence_path).expect("evidence");
        let lines: Vec<Value> = evidence
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["index"], json!(1));

        let meta: Value =
            serde_json::from_str(&fs::read_to_string(&paths.meta_path).expect("meta")).expect("json");
        assert_eq!(meta["status"], json!("aborted"));
        assert_eq!(meta["abort_reason"]["kind"], json!("budget_exhausted"));

        let verdict: Value =
            serde_json::from_str(&fs::read_to_string(&paths.verdict_path).expect("verdict"))
                .expect("json");
        assert_eq!(verdict["inconclusive"], json!(true));
    }
}
