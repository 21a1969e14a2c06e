//! Investigation session state machine.
//!
//! A session owns its bundle, evidence store, protocol cursor, and verdict.
//! It moves from `Investigating` to exactly one of `Terminated` (a reported
//! verdict was sealed) or `Aborted` (an inconclusive verdict was synthesized).
//! Closed sessions reject every further mutation with `SessionClosed`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::bundle::ProblemBundle;
use crate::core::evidence::{Evidence, EvidenceOutcome, EvidenceSource, EvidenceStore};
use crate::core::protocol::{InvestigationStep, ProtocolTracker, StepProgress};
use crate::core::types::ToolName;
use crate::core::verdict::{self, Verdict};
use crate::error::{SessionError, TurnError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Investigating,
    Terminated,
    Aborted,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::Investigating => "investigating",
            SessionStatus::Terminated => "terminated",
            SessionStatus::Aborted => "aborted",
        })
    }
}

/// Why a session was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    BudgetExhausted { turn_limit: u32 },
    RetriesExhausted { failures: u32 },
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::BudgetExhausted { turn_limit } => {
                write!(f, "turn budget of {turn_limit} exhausted")
            }
            AbortReason::RetriesExhausted { failures } => {
                write!(f, "{failures} consecutive failed turns")
            }
            AbortReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLimits {
    pub turn_limit: u32,
    pub max_turn_retries: u32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            turn_limit: 30,
            max_turn_retries: 3,
        }
    }
}

/// Result of submitting a terminal report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Sealed,
    Rejected(TurnError),
}

/// Snapshot handed to the proposal generator.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView<'a> {
    pub id: &'a str,
    pub bundle: &'a ProblemBundle,
    pub turn: u32,
    pub turn_limit: u32,
    pub current_step: &'a InvestigationStep,
    pub pending_required: Vec<&'a str>,
    pub steps: Vec<StepProgress<'a>>,
    pub evidence: &'a [Evidence],
}

#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    bundle: ProblemBundle,
    limits: SessionLimits,
    turn: u32,
    status: SessionStatus,
    consecutive_failures: u32,
    evidence: EvidenceStore,
    protocol: ProtocolTracker,
    verdict: Option<Verdict>,
    abort_reason: Option<AbortReason>,
}

impl Session {
    /// Start a session. `steps` must already be validated.
    pub fn new(bundle: ProblemBundle, limits: SessionLimits, steps: Vec<InvestigationStep>) -> Self {
        Self {
            id: bundle.session_id(),
            bundle,
            limits,
            turn: 0,
            status: SessionStatus::Investigating,
            consecutive_failures: 0,
            evidence: EvidenceStore::new(),
            protocol: ProtocolTracker::new(steps),
            verdict: None,
            abort_reason: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bundle(&self) -> &ProblemBundle {
        &self.bundle
    }

    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Investigating
    }

    pub fn evidence(&self) -> &[Evidence] {
        self.evidence.entries()
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        self.abort_reason.as_ref()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(SessionError::SessionClosed {
                id: self.id.clone(),
                status: self.status,
            })
        }
    }

    /// Count a new turn attempt. Returns the 1-based turn number.
    pub fn begin_turn(&mut self) -> Result<u32, SessionError> {
        self.ensure_open()?;
        self.turn += 1;
        Ok(self.turn)
    }

    /// Record a rejected action. Counts against the retry budget.
    pub fn record_rejection(
        &mut self,
        source: EvidenceSource,
        args: Value,
        error: TurnError,
    ) -> Result<usize, SessionError> {
        self.ensure_open()?;
        let counts = error.is_turn_failure();
        let index = self
            .evidence
            .append(self.turn, source, args, EvidenceOutcome::Failure { error });
        if counts {
            self.consecutive_failures += 1;
            if self.consecutive_failures > self.limits.max_turn_retries {
                self.abort(AbortReason::RetriesExhausted {
                    failures: self.consecutive_failures,
                });
            }
        } else {
            self.consecutive_failures = 0;
        }
        Ok(index)
    }

    /// Record the outcome of a dispatched tool call.
    ///
    /// Collaborator failures are facts, not failed turns, so both arms reset
    /// the retry counter. Only payloads advance the protocol.
    pub fn record_tool_result(
        &mut self,
        tool: ToolName,
        args: Value,
        result: Result<Value, TurnError>,
    ) -> Result<usize, SessionError> {
        self.ensure_open()?;
        let outcome = match result {
            Ok(payload) => {
                self.protocol.observe(tool);
                EvidenceOutcome::Payload { payload }
            }
            Err(error) if error.is_turn_failure() => {
                return self.record_rejection(EvidenceSource::Tool(tool), args, error);
            }
            Err(error) => EvidenceOutcome::Failure { error },
        };
        self.consecutive_failures = 0;
        Ok(self
            .evidence
            .append(self.turn, EvidenceSource::Tool(tool), args, outcome))
    }

    /// Try to seal a verdict from `report_result` arguments.
    ///
    /// A rejected report is recorded as evidence and counts as a failed turn.
    pub fn submit_report(&mut self, args: Value) -> Result<ReportOutcome, SessionError> {
        self.ensure_open()?;
        let checked = self
            .protocol
            .check_report()
            .and_then(|()| verdict::verdict_from_report(&args, self.evidence.len()));
        match checked {
            Ok(verdict) => {
                self.verdict = Some(verdict);
                self.status = SessionStatus::Terminated;
                self.consecutive_failures = 0;
                Ok(ReportOutcome::Sealed)
            }
            Err(error) => {
                self.record_rejection(
                    EvidenceSource::Tool(ToolName::ReportResult),
                    args,
                    error.clone(),
                )?;
                Ok(ReportOutcome::Rejected(error))
            }
        }
    }

    /// Close the turn; aborts once the turn budget is spent.
    pub fn end_turn(&mut self) {
        if self.is_open() && self.turn >= self.limits.turn_limit {
            self.abort(AbortReason::BudgetExhausted {
                turn_limit: self.limits.turn_limit,
            });
        }
    }

    /// Abort between turns on external request.
    pub fn cancel(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.abort(AbortReason::Cancelled);
        Ok(())
    }

    fn abort(&mut self, reason: AbortReason) {
        let text = reason.to_string();
        self.evidence.append(
            self.turn,
            EvidenceSource::Orchestrator,
            Value::Null,
            EvidenceOutcome::Abort {
                reason: text.clone(),
            },
        );
        self.verdict = Some(verdict::inconclusive(&text, self.evidence.len()));
        self.status = SessionStatus::Aborted;
        self.abort_reason = Some(reason);
    }

    pub fn view(&self) -> SessionView<'_> {
        SessionView {
            id: &self.id,
            bundle: &self.bundle,
            turn: self.turn,
            turn_limit: self.limits.turn_limit,
            current_step: self.protocol.current(),
            pending_required: self.protocol.pending_required(),
            steps: self.protocol.progress(),
            evidence: self.evidence.entries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::default_steps;
    use serde_json::json;

    fn bundle() -> ProblemBundle {
        ProblemBundle {
            target_artifact: "class F {}".to_string(),
            requirements: "req".to_string(),
            stacktrace: "at P.parse".to_string(),
            crash_analysis: "NPE".to_string(),
        }
    }

    fn session(turn_limit: u32, max_turn_retries: u32) -> Session {
        Session::new(
            bundle(),
            SessionLimits {
                turn_limit,
                max_turn_retries,
            },
            default_steps(),
        )
    }

    fn lookup(session: &mut Session) {
        session.begin_turn().expect("open");
        session
            .record_tool_result(
                ToolName::LookupFunction,
                json!({"name": "parse"}),
                Ok(json!("int parse() {}")),
            )
            .expect("record");
        session.end_turn();
    }

    #[test]
    fn consecutive_failures_beyond_budget_abort() {
        let mut session = session(30, 2);
        for _ in 0..3 {
            session.begin_turn().expect("open");
            session
                .record_rejection(
                    EvidenceSource::Proposer,
                    Value::Null,
                    TurnError::ProposalFailed {
                        reason: "bad json".to_string(),
                    },
                )
                .expect("record");
            session.end_turn();
        }
        assert_eq!(session.status(), SessionStatus::Aborted);
        assert_eq!(
            session.abort_reason(),
            Some(&AbortReason::RetriesExhausted { failures: 3 })
        );
        // three failures plus one orchestrator entry
        assert_eq!(session.evidence().len(), 4);
        assert!(session.verdict().is_some_and(|v| v.inconclusive));
    }

    #[test]
    fn successful_turn_resets_failure_counter() {
        let mut session = session(30, 1);
        session.begin_turn().expect("open");
        session
            .record_rejection(
                EvidenceSource::Unregistered("x".to_string()),
                json!({}),
                TurnError::UnknownTool {
                    name: "x".to_string(),
                    registered: Vec::new(),
                },
            )
            .expect("record");
        lookup(&mut session);
        assert_eq!(session.consecutive_failures(), 0);
        assert!(session.is_open());
    }

    #[test]
    fn tool_failure_is_evidence_not_a_failed_turn() {
        let mut session = session(30, 0);
        session.begin_turn().expect("open");
        session
            .record_tool_result(
                ToolName::SearchFiles,
                json!({"pattern": "x"}),
                Err(TurnError::ToolFailed {
                    tool: ToolName::SearchFiles,
                    reason: "exit 2".to_string(),
                }),
            )
            .expect("record");
        assert!(session.is_open());
        assert_eq!(session.consecutive_failures(), 0);
    }

    #[test]
    fn sealed_session_rejects_further_turns() {
        let mut session = session(30, 3);
        lookup(&mut session);
        session.begin_turn().expect("open");
        session
            .record_tool_result(ToolName::SearchFiles, json!({"pattern": "p"}), Ok(json!("hit")))
            .expect("record");
        session.end_turn();
        session.begin_turn().expect("open");
        session
            .record_tool_result(ToolName::SearchFiles, json!({"pattern": "q"}), Ok(json!("hit")))
            .expect("record");
        session.end_turn();

        session.begin_turn().expect("open");
        let outcome = session
            .submit_report(json!({"feasible": true, "analysis": "reachable", "evidence": [0]}))
            .expect("open");
        assert_eq!(outcome, ReportOutcome::Sealed);
        assert_eq!(session.status(), SessionStatus::Terminated);

        let sealed = session.verdict().cloned();
        let err = session
            .submit_report(json!({"feasible": false, "analysis": "x", "recommendations": "y"}))
            .expect_err("closed");
        assert!(matches!(
            err,
            SessionError::SessionClosed {
                status: SessionStatus::Terminated,
                ..
            }
        ));
        assert!(session.begin_turn().is_err());
        assert_eq!(session.verdict().cloned(), sealed);
    }

    #[test]
    fn early_report_is_rejected_as_protocol_incomplete() {
        let mut session = session(30, 3);
        session.begin_turn().expect("open");
        let outcome = session
            .submit_report(json!({"feasible": true, "analysis": "guess"}))
            .expect("open");
        assert_eq!(
            outcome,
            ReportOutcome::Rejected(TurnError::ProtocolIncomplete {
                step: "locate-crash".to_string()
            })
        );
        assert_eq!(session.evidence().len(), 1);
        assert!(session.is_open());
    }

    #[test]
    fn turn_budget_exhaustion_aborts() {
        let mut session = session(2, 3);
        lookup(&mut session);
        lookup(&mut session);
        assert_eq!(session.status(), SessionStatus::Aborted);
        assert_eq!(
            session.abort_reason(),
            Some(&AbortReason::BudgetExhausted { turn_limit: 2 })
        );
        let verdict = session.verdict().expect("verdict");
        assert_eq!(verdict.evidence, vec![0, 1, 2]);
    }

    #[test]
    fn cancel_closes_the_session() {
        let mut session = session(30, 3);
        session.cancel().expect("open");
        assert_eq!(session.abort_reason(), Some(&AbortReason::Cancelled));
        assert!(session.cancel().is_err());
    }

    #[test]
    fn view_exposes_protocol_position() {
        let mut session = session(30, 3);
        lookup(&mut session);
        let view = session.view();
        assert_eq!(view.turn, 1);
        assert_eq!(view.current_step.id, "review-target");
        assert_eq!(view.pending_required, vec!["trace-entry-points"]);
        assert_eq!(view.evidence.len(), 1);
    }
}
