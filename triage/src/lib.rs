//! Bounded crash-triage and fuzz-harness repair orchestrator.
//!
//! Two deterministic loops live here:
//!
//! - **Investigation** ([`investigate`]): a turn-bounded tool-use session that
//!   gathers evidence about a fuzz crash and ends in exactly one sealed
//!   [`core::verdict::Verdict`], either reported by the proposal generator or
//!   synthesized as inconclusive when the budget runs out.
//! - **Repair** ([`repair`]): a revision-bounded loop that drives generated
//!   harness source towards a declarative constraint rule set and a clean
//!   compile.
//!
//! The layout follows a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (evidence, protocol, verdicts,
//!   rules, source scanning, validation). No I/O.
//! - **[`io`]**: Side effects (config, child processes, collaborators, logs).
//!
//! [`dispatch`], [`investigate`], and [`repair`] coordinate the two.

pub mod core;
pub mod dispatch;
pub mod error;
pub mod exit_codes;
pub mod investigate;
pub mod io;
pub mod logging;
pub mod repair;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
