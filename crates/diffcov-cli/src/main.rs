//! diffcov restricts a coverage report to the lines a diff modified, so a
//! review sees how well the new and changed code is tested.
//!
//! This CLI reads a unified diff and one or more LCOV tracefiles, writes a JSON
//! report (and optionally a markdown summary) and prints a console summary.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Args, Parser, Subcommand};
use diffcov_app::{AppError, CheckRequest, check};
use diffcov_config::{CliOverrides, discover_config, load_config, resolve_config};
use diffcov_types::explain;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Diff-scoped code coverage: coverage of only the lines a change touched.
#[derive(Parser)]
#[command(name = "diffcov")]
#[command(about = "Diff-scoped code coverage: coverage of only the lines a change touched.")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace); overrides RUST_LOG
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute coverage of the lines modified by a diff
    Check(CheckArgs),
    /// Explain an error or rule code
    Explain {
        /// Code to explain
        code: String,
    },
}

#[derive(Args)]
struct CheckArgs {
    /// Path to the unified diff file
    #[arg(long)]
    diff_file: Option<String>,

    /// Path to an LCOV tracefile (repeatable)
    #[arg(long)]
    lcov: Vec<String>,

    /// Source directory root used to match coverage paths (repeatable)
    #[arg(long)]
    source_dir: Vec<String>,

    /// Prefix to strip from LCOV SF paths (repeatable)
    #[arg(long)]
    path_strip: Vec<String>,

    /// Path to config file (default: auto-discover diffcov.toml)
    #[arg(long, short = 'c')]
    config: Option<String>,

    /// Output path for the report JSON
    #[arg(long, default_value = "artifacts/diffcov/report.json")]
    out: String,

    /// Output path for the markdown summary
    #[arg(long)]
    md: Option<String>,

    /// Minimum line coverage ratio of modified lines (0-1)
    #[arg(long)]
    min_lines: Option<f64>,

    /// Minimum branch coverage ratio of modified lines (0-1)
    #[arg(long)]
    min_branches: Option<f64>,

    /// Exit with code 2 when a minimum is not met
    #[arg(long)]
    fail_on_violation: bool,

    /// Maximum number of files listed in the markdown summary
    #[arg(long)]
    max_files: Option<usize>,
}

/// CLI errors
#[derive(Debug, Error)]
enum CliError {
    #[error("Failed to load config: {0}")]
    ConfigLoad(String),

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory '{path}': {source}")]
    DirCreate {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    App(#[from] AppError),
}

/// Exit codes:
/// - 0: pass, or warn when not configured to fail
/// - 1: tool/input error
/// - 2: rule violation with `--fail-on-violation`
const EXIT_CODE_ERROR: i32 = 1;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            if let CliError::App(app) = &e {
                eprintln!("hint: run `diffcov explain {}` for details", app.code());
            }
            EXIT_CODE_ERROR
        }
    };
    std::process::exit(exit_code);
}

/// Install a stderr fmt subscriber.
///
/// `-v` flags win over `RUST_LOG`; without either only warnings are shown.
fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli) -> Result<i32, CliError> {
    match cli.command {
        Commands::Check(args) => run_check(args),
        Commands::Explain { code } => Ok(run_explain(&code)),
    }
}

fn build_overrides(args: &CheckArgs) -> CliOverrides {
    CliOverrides {
        diff_file: args.diff_file.as_ref().map(PathBuf::from),
        lcov_paths: (!args.lcov.is_empty()).then(|| args.lcov.iter().map(PathBuf::from).collect()),
        source_dirs: (!args.source_dir.is_empty()).then(|| args.source_dir.clone()),
        path_strip: (!args.path_strip.is_empty()).then(|| args.path_strip.clone()),
        min_lines: args.min_lines,
        min_branches: args.min_branches,
        fail_on_violation: args.fail_on_violation.then_some(true),
        max_files: args.max_files,
    }
}

fn run_check(args: CheckArgs) -> Result<i32, CliError> {
    let file_config = match &args.config {
        Some(path) => Some(
            load_config(Path::new(path)).map_err(|e| CliError::ConfigLoad(format!("{path}: {e}")))?,
        ),
        None => discover_config()
            .map_err(|e| CliError::ConfigLoad(e.to_string()))?
            .map(|(path, config)| {
                debug!("Using config {}", path.display());
                config
            }),
    };

    let effective = resolve_config(file_config.as_ref(), &build_overrides(&args));
    effective
        .validate()
        .map_err(|e| CliError::ConfigLoad(e.to_string()))?;

    let result = check(CheckRequest::from(&effective))?;

    ensure_parent_dir(&args.out)?;
    let report_json = serde_json::to_string_pretty(&result.report)?;
    fs::write(&args.out, &report_json).map_err(|e| CliError::FileWrite {
        path: args.out.clone(),
        source: e,
    })?;

    if let Some(md_path) = args.md {
        ensure_parent_dir(&md_path)?;
        fs::write(&md_path, &result.markdown).map_err(|e| CliError::FileWrite {
            path: md_path,
            source: e,
        })?;
    }

    print!("{}", result.console);
    Ok(result.exit_code)
}

fn run_explain(code: &str) -> i32 {
    if let Some(info) = explain(code) {
        println!("Code: {}", info.code);
        println!("Name: {}", info.name);
        println!("Meaning: {}", info.full_description);
        println!("Remediation: {}", info.remediation);
        0
    } else {
        eprintln!("Unknown code: {code}");
        1
    }
}

/// Ensure the parent directory of a path exists
fn ensure_parent_dir(path: &str) -> Result<(), CliError> {
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| CliError::DirCreate {
            path: parent.display().to_string(),
            source: e,
        })?;
    }
    Ok(())
}
