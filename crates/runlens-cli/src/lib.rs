#![forbid(unsafe_code)]

mod commands;

use clap::{error::ErrorKind, ArgAction, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode as ProcessExitCode;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_REPORTS_ROOT: &str = "public/playwright-reports";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    Usage = 2,
    /// The command ran but some entries could not be processed.
    Partial = 3,
    Internal = 10,
}

#[derive(Parser, Debug)]
#[command(name = "runlens")]
#[command(version)]
#[command(about = "Maintenance commands for extracted Playwright reports")]
#[command(
    after_help = "Environment:\n  RUST_LOG   Log filter override (logs go to stderr)"
)]
struct Cli {
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    #[arg(long, global = true, default_value_t = false)]
    quiet: bool,
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Delete extracted reports older than the retention age.
    Sweep {
        #[arg(long, default_value = DEFAULT_REPORTS_ROOT)]
        root: PathBuf,
        #[arg(long, default_value_t = 24)]
        max_age_hours: u64,
        /// List what would be deleted without touching the disk.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// List extracted reports, oldest first.
    Inspect {
        #[arg(long, default_value = DEFAULT_REPORTS_ROOT)]
        root: PathBuf,
        #[arg(long, default_value = "index.html")]
        entry_point: String,
    },
    Version,
}

#[derive(Clone, Copy)]
pub(crate) struct OutputMode {
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct MachineError {
    code: &'static str,
    message: String,
    details: BTreeMap<String, String>,
}

impl MachineError {
    fn new(code: &'static str, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            details: BTreeMap::new(),
        }
    }

    fn with_detail(mut self, key: &str, value: &str) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug)]
pub(crate) struct CliError {
    exit_code: ExitCode,
    machine: MachineError,
}

impl CliError {
    pub(crate) fn internal(message: String) -> Self {
        Self {
            exit_code: ExitCode::Internal,
            machine: MachineError::new("internal_error", &message),
        }
    }

    pub(crate) fn partial(message: String) -> Self {
        Self {
            exit_code: ExitCode::Partial,
            machine: MachineError::new("partial_failure", &message),
        }
    }
}

fn emit_error(error: &CliError, machine_json: bool) {
    if machine_json {
        match serde_json::to_string(&error.machine) {
            Ok(payload) => eprintln!("{payload}"),
            Err(_) => eprintln!(
                "{{\"code\":\"internal_error\",\"message\":\"failed to encode structured error\",\"details\":{{}}}}"
            ),
        }
    } else {
        eprintln!("{}", error.machine.message);
    }
}

pub(crate) fn emit_ok_payload(output_mode: OutputMode, payload: Value) -> Result<(), CliError> {
    let text = if output_mode.json {
        serde_json::to_string(&payload)
    } else {
        serde_json::to_string_pretty(&payload)
    }
    .map_err(|e| CliError::internal(e.to_string()))?;
    println!("{text}");
    Ok(())
}

fn init_logging(quiet: bool, verbose: u8) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn main_entry() -> ProcessExitCode {
    let wants_json = std::env::args().any(|arg| arg == "--json");
    match run() {
        Ok(()) => ProcessExitCode::from(ExitCode::Success as u8),
        Err(err) => {
            emit_error(&err, wants_json);
            ProcessExitCode::from(err.exit_code as u8)
        }
    }
}

fn run() -> Result<(), CliError> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{err}");
                return Ok(());
            }
            _ => {
                return Err(CliError {
                    exit_code: ExitCode::Usage,
                    machine: MachineError::new("usage_error", "invalid command line arguments")
                        .with_detail("error", &err.to_string()),
                });
            }
        },
    };
    init_logging(cli.quiet, cli.verbose);
    let output_mode = OutputMode { json: cli.json };
    let command = cli.command.ok_or_else(|| CliError {
        exit_code: ExitCode::Usage,
        machine: MachineError::new("usage_error", "missing command; see --help"),
    })?;

    match command {
        Commands::Sweep {
            root,
            max_age_hours,
            dry_run,
        } => commands::sweep(&root, max_age_hours, dry_run, output_mode),
        Commands::Inspect { root, entry_point } => {
            commands::inspect(&root, &entry_point, output_mode)
        }
        Commands::Version => emit_ok_payload(
            output_mode,
            json!({
                "name": "runlens",
                "version": env!("CARGO_PKG_VERSION"),
                "server_crate": runlens_server::CRATE_NAME,
            }),
        ),
    }
}
