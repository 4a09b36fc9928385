//! `rollbook run`, `finalize` and `validate`: two-phase name reconciliation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::Subcommand;
use serde::Serialize;

use rollbook_io::{exporter_for, FileIngest};
use rollbook_recon::engine::{finalize, upload, Export, Inputs, PendingResolution, UploadOutcome};
use rollbook_recon::model::{Match, MatchOrigin, MergedSet, PendingPayload, Selection};
use rollbook_recon::session::OfferedCandidate;
use rollbook_recon::RollbookConfig;

use crate::exit_codes::{EXIT_EXPORT, EXIT_PENDING, EXIT_SELECTION};
use crate::CliError;

#[derive(Subcommand)]
pub enum ReconCommands {
    /// Match the configured datasets; write the spreadsheet or a pending payload
    #[command(after_help = "\
Examples:
  rollbook run funding.toml
  rollbook run funding.toml --pending pending.json
  rollbook run funding.toml --json --filter smith
  rollbook run funding.toml --output summary.xlsx

Exit code 3 means some names need a manual match: pick an id for each
and pass them to `rollbook finalize`.")]
    Run {
        /// Path to the .toml config file
        config: PathBuf,

        /// Print the JSON result to stdout
        #[arg(long)]
        json: bool,

        /// Only list pending names containing this text (case-insensitive)
        #[arg(long)]
        filter: Option<String>,

        /// Write the pending payload to this file
        #[arg(long)]
        pending: Option<PathBuf>,

        /// Output file (overrides [output].file)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Apply manual selections and write the spreadsheet
    #[command(after_help = "\
Examples:
  rollbook finalize funding.toml --selections selections.json

selections.json is a list of {\"name\": ..., \"id\": ...} objects, one per
pending name.")]
    Finalize {
        /// Path to the .toml config file
        config: PathBuf,

        /// JSON file with the chosen matches
        #[arg(long, short)]
        selections: PathBuf,

        /// Print the JSON result to stdout
        #[arg(long)]
        json: bool,

        /// Output file (overrides [output].file)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Validate a config without reading any dataset
    #[command(after_help = "\
Examples:
  rollbook validate funding.toml")]
    Validate {
        /// Path to the .toml config file
        config: PathBuf,
    },
}

pub fn cmd_recon(cmd: ReconCommands) -> Result<(), CliError> {
    match cmd {
        ReconCommands::Run { config, json, filter, pending, output } => {
            cmd_run(config, json, filter, pending, output)
        }
        ReconCommands::Finalize { config, selections, json, output } => {
            cmd_finalize(config, selections, json, output)
        }
        ReconCommands::Validate { config } => cmd_validate(config),
    }
}

// ---------------------------------------------------------------------------
// JSON shapes
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct CompleteOutput {
    status: &'static str,
    output: String,
    rows: usize,
    automatic: usize,
    confirmed: usize,
}

/// Pending payload plus, per listed name, the candidates in offer order.
#[derive(Serialize)]
struct PendingOutput<'a> {
    #[serde(flatten)]
    payload: &'a PendingPayload,
    options: BTreeMap<&'a str, Vec<OfferedCandidate>>,
}

// ---------------------------------------------------------------------------
// Shared steps
// ---------------------------------------------------------------------------

fn load_config(config_path: &Path) -> Result<(RollbookConfig, PathBuf), CliError> {
    let config_str = std::fs::read_to_string(config_path).map_err(|e| {
        CliError::usage(format!("cannot read config {}: {e}", config_path.display()))
    })?;
    let config = RollbookConfig::from_toml(&config_str).map_err(CliError::recon)?;

    // File paths resolve relative to the config file's directory
    let base_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    tracing::debug!(name = %config.name, base_dir = %base_dir.display(), "config loaded");
    Ok((config, base_dir))
}

fn load_inputs(config: &RollbookConfig, base_dir: &Path) -> Result<Inputs, CliError> {
    Inputs::load(config, &FileIngest::new(base_dir)).map_err(|e| CliError::recon(e.into()))
}

/// `--output`, then `[output].file` relative to the config, then
/// `<config stem>_summary.<ext>` next to the config.
fn output_path(
    config: &RollbookConfig,
    config_path: &Path,
    base_dir: &Path,
    output: Option<PathBuf>,
) -> PathBuf {
    if let Some(path) = output {
        return path;
    }
    if let Some(ref file) = config.output.file {
        return base_dir.join(file);
    }
    let stem = config_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("rollbook");
    base_dir.join(format!("{stem}_summary.{}", config.output.format.extension()))
}

fn write_merged(config: &RollbookConfig, merged: &MergedSet, path: &Path) -> Result<(), CliError> {
    let bytes = exporter_for(config.output.format)
        .export(merged, &config.output)
        .map_err(|e| CliError::recon(e.into()))?;
    std::fs::write(path, bytes).map_err(|e| CliError {
        code: EXIT_EXPORT,
        message: format!("cannot write output {}: {e}", path.display()),
        hint: None,
    })?;
    Ok(())
}

fn report_complete(merged: &MergedSet, path: &Path, json: bool) -> Result<(), CliError> {
    let automatic = merged
        .entities
        .iter()
        .filter(|e| e.origin == MatchOrigin::Automatic)
        .count();
    let summary = CompleteOutput {
        status: "complete",
        output: path.display().to_string(),
        rows: merged.entities.len(),
        automatic,
        confirmed: merged.entities.len() - automatic,
    };

    eprintln!(
        "reconciled {} records ({} automatic, {} confirmed) -> {}",
        summary.rows, summary.automatic, summary.confirmed, summary.output
    );
    if json {
        println!("{}", to_json(&summary)?);
    }
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, CliError> {
    serde_json::to_string_pretty(value).map_err(|e| CliError {
        code: EXIT_EXPORT,
        message: format!("JSON serialization error: {e}"),
        hint: None,
    })
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

fn cmd_run(
    config_path: PathBuf,
    json: bool,
    filter: Option<String>,
    pending_file: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<(), CliError> {
    let (config, base_dir) = load_config(&config_path)?;
    let inputs = load_inputs(&config, &base_dir)?;

    match upload(&config, &inputs).map_err(CliError::recon)? {
        UploadOutcome::Complete(merged) => {
            let path = output_path(&config, &config_path, &base_dir, output);
            write_merged(&config, &merged, &path)?;
            report_complete(&merged, &path, json)
        }
        UploadOutcome::NeedsResolution(pending) => {
            report_pending(&config_path, pending, filter.as_deref(), pending_file, json)
        }
    }
}

fn report_pending(
    config_path: &Path,
    pending: PendingResolution,
    filter: Option<&str>,
    pending_file: Option<PathBuf>,
    json: bool,
) -> Result<(), CliError> {
    let PendingResolution { mut payload, session, .. } = pending;
    let total = payload.unmatched.len();
    if let Some(query) = filter {
        payload.unmatched = session.filter(query).into_iter().map(String::from).collect();
    }

    let options: BTreeMap<&str, Vec<OfferedCandidate>> = payload
        .unmatched
        .iter()
        .filter_map(|name| Some((name.as_str(), session.candidates_for(name)?)))
        .collect();
    let out = PendingOutput {
        payload: &payload,
        options,
    };
    let json_str = to_json(&out)?;

    if let Some(ref path) = pending_file {
        std::fs::write(path, &json_str).map_err(|e| CliError {
            code: EXIT_EXPORT,
            message: format!("cannot write pending payload {}: {e}", path.display()),
            hint: None,
        })?;
        eprintln!("wrote {}", path.display());
    }

    if json {
        println!("{json_str}");
    } else {
        for (name, candidates) in &out.options {
            let suggested: Vec<&str> = candidates
                .iter()
                .filter(|c| c.suggested)
                .map(|c| c.candidate.id.as_str())
                .collect();
            if suggested.is_empty() {
                eprintln!("  {name}: no same-name candidate");
            } else {
                eprintln!("  {name}: candidates {}", suggested.join(", "));
            }
        }
    }

    Err(CliError {
        code: EXIT_PENDING,
        message: format!(
            "{total} record(s) need a manual match ({} automatic)",
            payload.automatic
        ),
        hint: Some(format!(
            "pick an id for each name, then: rollbook finalize {} --selections <file.json>",
            config_path.display()
        )),
    })
}

// ---------------------------------------------------------------------------
// finalize
// ---------------------------------------------------------------------------

fn read_selections(path: &Path) -> Result<Vec<Match>, CliError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CliError::usage(format!("cannot read selections {}: {e}", path.display()))
    })?;
    let selections: Vec<Selection> = serde_json::from_str(&content).map_err(|e| CliError {
        code: EXIT_SELECTION,
        message: format!("malformed selections {}: {e}", path.display()),
        hint: Some("expected a JSON list of {\"name\": ..., \"id\": ...} objects".into()),
    })?;
    Ok(selections.into_iter().map(Match::from).collect())
}

fn cmd_finalize(
    config_path: PathBuf,
    selections_path: PathBuf,
    json: bool,
    output: Option<PathBuf>,
) -> Result<(), CliError> {
    let (config, base_dir) = load_config(&config_path)?;
    let selections = read_selections(&selections_path)?;
    let inputs = load_inputs(&config, &base_dir)?;

    let merged = finalize(&config, &inputs, selections).map_err(CliError::recon)?;
    let path = output_path(&config, &config_path, &base_dir, output);
    write_merged(&config, &merged, &path)?;
    report_complete(&merged, &path, json)
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let (config, base_dir) = load_config(&config_path)?;

    eprintln!("config ok: {}", config.name);
    for (role, dataset) in config.datasets() {
        let path = FileIngest::new(&base_dir).resolve(&dataset.file);
        let marker = if path.is_file() { "" } else { " (missing)" };
        eprintln!("  {role}: {}{marker}", path.display());
    }
    Ok(())
}
