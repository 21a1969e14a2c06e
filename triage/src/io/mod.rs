//! I/O helpers: configuration, child processes, external collaborators, and
//! session artifacts.

pub mod compiler;
pub mod config;
pub mod init;
pub mod process;
pub mod prompt;
pub mod proposer;
pub mod rule_store;
pub mod session_log;
pub mod tools;
