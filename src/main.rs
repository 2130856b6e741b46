// ==========================================
// Molecular data portal - import command line
// ==========================================
// Usage: molmod-import [OPTIONS] [INPUT]
// Output: import report as JSON on stdout, diagnostics on stderr
// Exit: 0 on commit or dry run, ErrorKind::exit_code() otherwise
// ==========================================

use anyhow::{Context, Result};
use clap::Parser;
use molmod_importer::config::{load_mapping, ConfigManager, ImportSettings};
use molmod_importer::db::{default_db_path, open_sqlite_connection, DB_PATH_ENV};
use molmod_importer::importer::{ImportError, ImportOptions, ImportOrchestrator};
use molmod_importer::logging;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

/// Command-line arguments for molmod-import
#[derive(Parser, Debug)]
#[command(name = "molmod-import")]
#[command(about = "Import a tabular data bundle into the molecular data portal")]
#[command(version)]
struct Args {
    /// Input bundle (tar archive or workbook); `-` or omitted reads stdin
    input: Option<PathBuf>,

    /// Perform every write, then roll back
    #[arg(long)]
    dry_run: bool,

    /// Rows per insert statement
    #[arg(long)]
    batch_size: Option<usize>,

    /// Data mapping document
    #[arg(long)]
    mapping_file: Option<PathBuf>,

    /// Skip pattern and uniqueness checks
    #[arg(long)]
    no_validation: bool,

    /// Portal database
    #[arg(long, env = DB_PATH_ENV)]
    db_path: Option<PathBuf>,

    /// More log output (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Less log output (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let verbosity = (args.verbose as i16 - args.quiet as i16).clamp(-8, 8) as i8;
    logging::init(verbosity, args.log_json);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            match err.downcast_ref::<ImportError>() {
                Some(import_err) => {
                    print_details(import_err);
                    ExitCode::from(import_err.kind().exit_code())
                }
                None => ExitCode::FAILURE,
            }
        }
    }
}

fn run(args: Args) -> Result<()> {
    let db_path = args.db_path.clone().unwrap_or_else(default_db_path);
    info!(db_path = %db_path.display(), "opening portal database");
    let mut conn = open_sqlite_connection(&db_path)
        .with_context(|| format!("cannot open database {}", db_path.display()))?;

    let settings =
        ImportSettings::resolve(&ConfigManager::new(&conn), args.batch_size, args.mapping_file)?;
    let mapping = load_mapping(&settings.mapping_file)?;

    let options = ImportOptions {
        batch_size: settings.batch_size,
        dry_run: args.dry_run,
        validate: !args.no_validation,
    };
    let orchestrator = ImportOrchestrator::new(mapping, options)?;

    let input = read_input(args.input.as_ref())?;
    let report = orchestrator.run_with_connection(&mut conn, input)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn read_input(path: Option<&PathBuf>) -> Result<Vec<u8>> {
    match path {
        Some(p) if p.as_os_str() != "-" => {
            std::fs::read(p).with_context(|| format!("cannot read input {}", p.display()))
        }
        _ => {
            let mut buffer = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buffer)
                .context("cannot read input from stdin")?;
            Ok(buffer)
        }
    }
}

/// Lists every violation or conflict behind an aggregated error.
fn print_details(err: &ImportError) {
    match err {
        ImportError::Validation(report) => {
            for violation in &report.violations {
                eprintln!("  {}", violation);
            }
        }
        ImportError::Reconciliation(conflicts) => {
            for conflict in conflicts {
                eprintln!("  {}", conflict);
            }
        }
        _ => {}
    }
}
