//! Command-line interface
//!
//! Argument parsing for the `pow-ledger` binary.

pub mod commands;

pub use commands::{Command, Opt};
