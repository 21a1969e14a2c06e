//! Deterministic, pure logic for both loops.
//!
//! Core modules never touch the filesystem or spawn processes. They operate on
//! in-memory values and return deterministic outputs suitable for tests.

pub mod bundle;
pub mod diagnostics;
pub mod evidence;
pub mod harness;
pub mod protocol;
pub mod rules;
pub mod scan;
pub mod session;
pub mod types;
pub mod validator;
pub mod verdict;
