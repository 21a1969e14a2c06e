//! Stable exit codes for `triage` CLI commands.

/// Command succeeded: verdict sealed, draft accepted, or draft conforms.
pub const OK: i32 = 0;
/// Invalid input/config or an infrastructure error.
pub const INVALID: i32 = 1;
/// `triage investigate` aborted with an inconclusive verdict.
pub const ABORTED: i32 = 2;
/// `triage repair` exhausted its iteration budget.
pub const NOT_CONVERGED: i32 = 3;
/// `triage check` found constraint violations.
pub const VIOLATIONS: i32 = 4;
