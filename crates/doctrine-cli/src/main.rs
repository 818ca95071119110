//! Doctrine CLI
//!
//! # Usage
//!
//! ```bash
//! # Validate candidates produced by a tool
//! doctrine validate --tool neon-sync --input records.json
//!
//! # Project records for the relational and columnar stores
//! doctrine format --tool neon-sync --input records.json --sink relational,columnar --format json
//!
//! # Map stored rows back to base records
//! doctrine normalize --input rows.json
//!
//! # Run the HTTP API
//! doctrine serve --addr 0.0.0.0:8080
//! ```
//!
//! # Exit Codes
//!
//! - 0: Success - every candidate validated
//! - 1: At least one candidate was rejected
//! - 2: Candidates were repaired or bypassed
//! - 3: Invalid input or arguments
//! - 4: File not found or inaccessible
//! - 10: Internal error

use clap::Parser;
use doctrine_cli::{run_cli, DoctrineCli, DoctrineCommands};
use tracing::Level;

fn log_level(cli: &DoctrineCli) -> Level {
    if cli.quiet {
        return Level::ERROR;
    }
    let base = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    // The server always reports its lifecycle
    if matches!(cli.command, DoctrineCommands::Serve { .. }) && base < Level::INFO {
        Level::INFO
    } else {
        base
    }
}

fn main() {
    let cli = DoctrineCli::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level(&cli).into());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let exit_code = run_cli(cli);
    std::process::exit(exit_code.into());
}
