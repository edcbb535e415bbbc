//! Subcommands of the `solaudit` binary
//!
//! `scan` runs every enabled rule over a file or directory and renders the
//! findings; `rules` lists what the analyzer can detect.

pub mod rules;
pub mod scan;

/// How a command finished, mapped to the process exit code by `main`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing at high severity or above.
    Clean,
    /// At least one critical or high finding.
    Blocking,
}
