// rollbook CLI - two-phase name reconciliation between a source dataset and
// an authoritative roster

mod exit_codes;
mod logging;
mod recon;

use std::process::ExitCode;

use clap::Parser;

use exit_codes::{EXIT_SUCCESS, EXIT_USAGE};
use logging::{init_logging, LogConfig};
use rollbook_recon::ReconError;

#[derive(Parser)]
#[command(name = "rollbook")]
#[command(about = "Reconcile a name-keyed dataset against an id-keyed roster")]
#[command(version)]
struct Cli {
    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: recon::ReconCommands,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&LogConfig::from_verbosity(cli.verbose));

    match recon::cmd_recon(cli.command) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    /// Engine error with its registered exit code.
    pub fn recon(err: ReconError) -> Self {
        let code = exit_codes::recon_exit_code(&err);
        let hint = match &err {
            ReconError::Session(_) => {
                Some("run `rollbook run --json` to list the names and ids still on offer".to_string())
            }
            ReconError::Ingestion(_) => {
                Some("check the dataset paths and column names in the config".to_string())
            }
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }
}
