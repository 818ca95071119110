//! Doctrine CLI
//!
//! Command-line front end for [`doctrine_core`]: validate candidate records,
//! project them for a sink, normalize stored rows, describe contracts, read
//! saved violation reports and run the HTTP service.

pub mod commands;
pub mod output;

pub use commands::{DoctrineCli, DoctrineCommands};
pub use output::OutputFormat;

use doctrine_core::{ConfigError, DoctrineError};
use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for CLI operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Every candidate validated
    Success = 0,
    /// At least one candidate was rejected
    ContractViolation = 1,
    /// Candidates were repaired or passed through unvalidated
    Degraded = 2,
    /// Invalid input or arguments
    InvalidInput = 3,
    /// File not found or inaccessible
    FileError = 4,
    /// Internal error
    InternalError = 10,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Exit code for a batch of enforcement outcomes
    pub fn from_outcomes(rejected: usize, degraded: usize) -> Self {
        if rejected > 0 {
            ExitCode::ContractViolation
        } else if degraded > 0 {
            ExitCode::Degraded
        } else {
            ExitCode::Success
        }
    }
}

/// Failures attributable to the caller's input
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Map an error chain to the exit code reported for it
pub fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    if let Some(cli) = err.downcast_ref::<CliError>() {
        return match cli {
            CliError::File { .. } => ExitCode::FileError,
            CliError::InvalidInput(_) => ExitCode::InvalidInput,
        };
    }
    if let Some(config) = err.downcast_ref::<ConfigError>() {
        return match config {
            ConfigError::Read { .. } => ExitCode::FileError,
            _ => ExitCode::InvalidInput,
        };
    }
    match err.downcast_ref::<DoctrineError>() {
        Some(DoctrineError::ContractViolation { .. }) => ExitCode::ContractViolation,
        Some(e) if e.is_recoverable() => ExitCode::InvalidInput,
        Some(DoctrineError::Config(_)) => ExitCode::InvalidInput,
        _ => ExitCode::InternalError,
    }
}

/// Run the CLI and return the process exit code
pub fn run_cli(cli: DoctrineCli) -> ExitCode {
    match commands::run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_code_for(&e)
        }
    }
}
