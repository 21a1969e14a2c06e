//! Turn loop for crash investigations.
//!
//! Each turn asks the proposer for one action, dispatches it through the tool
//! registry, and records exactly one evidence entry (or seals the verdict).
//! The loop stops once the session closes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::evidence::EvidenceSource;
use crate::core::session::{ReportOutcome, Session, SessionStatus};
use crate::dispatch::{Dispatch, ToolRegistry};
use crate::error::{SessionError, TurnError};
use crate::io::proposer::Proposer;

/// Shared cancellation flag, checked before each turn.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What one turn did.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEffect {
    /// An evidence entry was appended at `index`.
    Recorded { index: usize },
    /// The report was accepted and the verdict sealed.
    Sealed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnRecord {
    pub turn: u32,
    pub effect: TurnEffect,
    pub status: SessionStatus,
}

/// Run a single turn against an open session.
///
/// Returns `SessionClosed` when the session already holds a verdict.
#[instrument(skip_all, fields(session = %session.id(), turn = session.turn() + 1))]
pub fn run_turn<P: Proposer + ?Sized>(
    session: &mut Session,
    registry: &ToolRegistry,
    proposer: &P,
) -> Result<TurnRecord, SessionError> {
    let turn = session.begin_turn()?;
    let tools = registry.registered();

    let proposal = proposer.propose(&session.view(), &tools);
    let effect = match proposal {
        Err(err) => {
            warn!(err = %format!("{err:#}"), "proposal failed");
            let index = session.record_rejection(
                EvidenceSource::Proposer,
                Value::Null,
                TurnError::ProposalFailed {
                    reason: format!("{err:#}"),
                },
            )?;
            TurnEffect::Recorded { index }
        }
        Ok(action) => match registry.dispatch(action.into_call()) {
            Dispatch::Completed {
                tool,
                args,
                outcome,
            } => {
                let index = session.record_tool_result(tool, args, outcome)?;
                TurnEffect::Recorded { index }
            }
            Dispatch::Report { args } => match session.submit_report(args)? {
                ReportOutcome::Sealed => TurnEffect::Sealed,
                ReportOutcome::Rejected(error) => {
                    debug!(%error, "report rejected");
                    TurnEffect::Recorded {
                        index: rejected_index(session),
                    }
                }
            },
            Dispatch::Rejected {
                source,
                args,
                error,
            } => {
                debug!(%error, "action rejected");
                let index = session.record_rejection(source, args, error)?;
                TurnEffect::Recorded { index }
            }
        },
    };

    session.end_turn();
    Ok(TurnRecord {
        turn,
        effect,
        status: session.status(),
    })
}

/// Index of the rejection a failed report just appended.
///
/// When the rejection exhausted the retry budget, the abort entry follows it.
fn rejected_index(session: &Session) -> usize {
    let len = session.evidence().len();
    if session.status() == SessionStatus::Aborted {
        len.saturating_sub(2)
    } else {
        len.saturating_sub(1)
    }
}

/// Drive a session until it closes, calling `on_turn` after every turn.
///
/// Cancellation is observed only between turns. The returned session always
/// holds a verdict.
pub fn run_investigation<P: Proposer + ?Sized, F: FnMut(&TurnRecord)>(
    mut session: Session,
    registry: &ToolRegistry,
    proposer: &P,
    cancel: &CancelFlag,
    mut on_turn: F,
) -> Session {
    info!(
        session = %session.id(),
        turn_limit = session.limits().turn_limit,
        "investigation started"
    );
    while session.is_open() {
        if cancel.is_cancelled() {
            // Open was checked above, so this cannot fail.
            if let Err(err) = session.cancel() {
                warn!(%err, "cancel failed");
            }
            break;
        }
        match run_turn(&mut session, registry, proposer) {
            Ok(record) => on_turn(&record),
            Err(err) => {
                warn!(%err, "turn refused");
                break;
            }
        }
    }
    info!(
        session = %session.id(),
        status = %session.status(),
        turns = session.turn(),
        evidence = session.evidence().len(),
        "investigation finished"
    );
    session
}
