//! Application orchestration for diffcov.
//!
//! This crate provides the high-level `check` function that runs the whole
//! diff coverage pipeline:
//!
//! 1. Validate and read the diff and LCOV inputs
//! 2. Parse the diff into a modified-lines index
//! 3. Drop files rejected by include/exclude patterns
//! 4. Parse and merge LCOV coverage
//! 5. Filter coverage to modified lines and assemble the report
//! 6. Apply violation rules and render markdown and console output
//!
//! # Example
//!
//! ```rust,ignore
//! use diffcov_app::{check, CheckRequest};
//!
//! let request = CheckRequest {
//!     diff_file: Some("changes.diff".into()),
//!     lcov_paths: vec!["lcov.info".into()],
//!     ..Default::default()
//! };
//!
//! let result = check(request)?;
//! println!("Exit code: {}", result.exit_code);
//! ```

use std::path::{Path, PathBuf};

use diffcov_adapters_coverage::{
    CoverageMap, LcovError, merge_coverage, parse_lcov_with_strip, to_raw_units,
};
use diffcov_adapters_diff::{MalformedDiffError, parse_diff_with_meta};
use diffcov_config::{ConfigError, DEFAULT_MAX_FILES, EffectiveConfig, should_include_path};
pub use diffcov_domain::ViolationRules;
use diffcov_domain::{apply_rules, assemble, filter_all};
use diffcov_render::{render_console, render_markdown};
use diffcov_types::{
    CODE_INVALID_CONFIG, CODE_INVALID_LCOV, CODE_MALFORMED_DIFF, CODE_MISSING_COVERAGE,
    DiffCoverageReport, Inputs, Run, Tool, VerdictStatus,
};
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Clock Trait
// ============================================================================

/// A trait for obtaining the current time.
///
/// This allows for testing with deterministic timestamps.
pub trait Clock {
    /// Get the current time in UTC.
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}

/// System clock implementation that returns the actual current time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}

// ============================================================================
// Request and Result Types
// ============================================================================

/// Request for a diff coverage check read from the filesystem.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    /// Unified diff file.
    pub diff_file: Option<PathBuf>,
    /// LCOV tracefiles.
    pub lcov_paths: Vec<PathBuf>,
    /// Source directory roots for path matching.
    pub source_dirs: Vec<String>,
    /// Prefixes to strip from LCOV SF paths.
    pub path_strip: Vec<String>,
    /// Glob patterns to include (allowlist).
    pub include_patterns: Vec<String>,
    /// Glob patterns to exclude.
    pub exclude_patterns: Vec<String>,
    /// Minimum coverage rules.
    pub rules: ViolationRules,
    /// Maximum files listed in the markdown summary.
    pub max_files: usize,
}

impl Default for CheckRequest {
    fn default() -> Self {
        Self {
            diff_file: None,
            lcov_paths: Vec::new(),
            source_dirs: Vec::new(),
            path_strip: Vec::new(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            rules: ViolationRules::default(),
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

impl From<&EffectiveConfig> for CheckRequest {
    fn from(config: &EffectiveConfig) -> Self {
        Self {
            diff_file: config.diff_file.clone(),
            lcov_paths: config.lcov_paths.clone(),
            source_dirs: config.source_dirs.clone(),
            path_strip: config.path_strip.clone(),
            include_patterns: config.include_patterns.clone(),
            exclude_patterns: config.exclude_patterns.clone(),
            rules: ViolationRules {
                min_lines: config.min_lines,
                min_branches: config.min_branches,
                fail_on_violation: config.fail_on_violation,
            },
            max_files: config.max_files,
        }
    }
}

/// One LCOV tracefile already read into memory.
#[derive(Debug, Clone)]
pub struct LcovInput {
    /// Where the text came from, for messages and report metadata.
    pub path: String,
    /// Tracefile content.
    pub text: String,
}

/// Inputs for the in-memory pipeline.
#[derive(Debug, Clone, Default)]
pub struct AnalysisInput {
    /// Unified diff content.
    pub diff_text: String,
    /// Path to the diff, for report metadata.
    pub diff_file: Option<String>,
    /// LCOV tracefiles.
    pub lcov: Vec<LcovInput>,
    /// Source directory roots for path matching.
    pub source_dirs: Vec<String>,
    /// Prefixes to strip from LCOV SF paths.
    pub path_strip: Vec<String>,
    /// Glob patterns to include (allowlist).
    pub include_patterns: Vec<String>,
    /// Glob patterns to exclude.
    pub exclude_patterns: Vec<String>,
    /// Minimum coverage rules.
    pub rules: ViolationRules,
}

/// Result of a coverage check operation.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// The diff coverage report.
    pub report: DiffCoverageReport,
    /// Markdown rendering of the report.
    pub markdown: String,
    /// Plain-text summary of the report.
    pub console: String,
    /// Exit code for the CLI.
    /// - 0: pass or warn
    /// - 2: rule violation with `fail_on_violation`
    /// - 1: tool/input error (not returned here, only via AppError)
    pub exit_code: i32,
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur during the check operation.
#[derive(Debug, Error)]
pub enum AppError {
    /// Inputs or settings are unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The diff could not be parsed.
    #[error(transparent)]
    MalformedDiff(#[from] MalformedDiffError),

    /// Coverage data the analysis depends on is not available.
    #[error("Missing coverage input: {0}")]
    MissingCollaborator(String),

    /// An LCOV tracefile could not be parsed.
    #[error("Failed to parse LCOV {path}: {source}")]
    CoverageParse {
        path: String,
        #[source]
        source: LcovError,
    },

    /// An input exists but could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Configuration(e.to_string())
    }
}

impl AppError {
    /// Stable code for this kind of error, as listed by `diffcov explain`.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Configuration(_) | AppError::Io { .. } => CODE_INVALID_CONFIG,
            AppError::MalformedDiff(_) => CODE_MALFORMED_DIFF,
            AppError::MissingCollaborator(_) => CODE_MISSING_COVERAGE,
            AppError::CoverageParse { .. } => CODE_INVALID_LCOV,
        }
    }
}

// ============================================================================
// Input Loading
// ============================================================================

/// Check that the diff path is set and names a regular file.
pub fn validate_diff_path(diff_file: Option<&Path>) -> Result<&Path, AppError> {
    let Some(path) = diff_file else {
        return Err(AppError::Configuration(
            "diff file is not set (use --diff-file or `diff_file` in diffcov.toml)".to_string(),
        ));
    };
    if !path.exists() {
        return Err(AppError::Configuration(format!(
            "diff file {} does not exist",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(AppError::Configuration(format!(
            "diff file {} is not a regular file",
            path.display()
        )));
    }
    Ok(path)
}

fn read_input(path: &Path) -> Result<String, AppError> {
    std::fs::read_to_string(path).map_err(|source| AppError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn read_lcov_inputs(paths: &[PathBuf]) -> Result<Vec<LcovInput>, AppError> {
    if paths.is_empty() {
        return Err(AppError::MissingCollaborator(
            "no LCOV tracefile configured (use --lcov or `lcov` in diffcov.toml)".to_string(),
        ));
    }

    paths
        .iter()
        .map(|path| {
            if !path.is_file() {
                return Err(AppError::MissingCollaborator(format!(
                    "LCOV tracefile {} not found",
                    path.display()
                )));
            }
            debug!("Reading coverage from {}", path.display());
            Ok(LcovInput {
                path: path.display().to_string(),
                text: read_input(path)?,
            })
        })
        .collect()
}

// ============================================================================
// Main Check Function
// ============================================================================

/// Run a diff coverage check.
///
/// # Errors
///
/// - [`AppError::Configuration`] if the diff path is unset, missing or not a
///   regular file, or a rule ratio is out of range.
/// - [`AppError::MissingCollaborator`] if no LCOV tracefile is configured or
///   one does not exist.
/// - [`AppError::MalformedDiff`] / [`AppError::CoverageParse`] for unparsable input.
pub fn check(request: CheckRequest) -> Result<CheckResult, AppError> {
    check_with_clock(request, &SystemClock)
}

/// Run a diff coverage check with a custom clock.
///
/// This allows for deterministic testing with fixed timestamps.
pub fn check_with_clock<C: Clock>(request: CheckRequest, clock: &C) -> Result<CheckResult, AppError> {
    validate_rules(&request.rules)?;
    let diff_path = validate_diff_path(request.diff_file.as_deref())?;

    debug!("Starting to retrieve modified lines from {}", diff_path.display());
    let diff_text = read_input(diff_path)?;
    let lcov = read_lcov_inputs(&request.lcov_paths)?;

    let input = AnalysisInput {
        diff_text,
        diff_file: Some(diff_path.display().to_string()),
        lcov,
        source_dirs: request.source_dirs,
        path_strip: request.path_strip,
        include_patterns: request.include_patterns,
        exclude_patterns: request.exclude_patterns,
        rules: request.rules,
    };

    let report = analyze_with_clock(input, clock)?;
    Ok(finish(report, request.max_files))
}

/// Render a report and pick the exit code.
pub fn finish(report: DiffCoverageReport, max_files: usize) -> CheckResult {
    let markdown = render_markdown(&report, max_files);
    let console = render_console(&report);
    let exit_code = match report.verdict {
        VerdictStatus::Pass | VerdictStatus::Warn => 0,
        VerdictStatus::Fail => 2,
    };

    CheckResult {
        report,
        markdown,
        console,
        exit_code,
    }
}

fn validate_rules(rules: &ViolationRules) -> Result<(), AppError> {
    for (name, ratio) in [("min_lines", rules.min_lines), ("min_branches", rules.min_branches)] {
        if let Some(ratio) = ratio
            && !(0.0..=1.0).contains(&ratio)
        {
            return Err(AppError::Configuration(format!(
                "{name} must be between 0 and 1, got {ratio}"
            )));
        }
    }
    Ok(())
}

/// Run the pipeline on in-memory inputs.
pub fn analyze(input: AnalysisInput) -> Result<DiffCoverageReport, AppError> {
    analyze_with_clock(input, &SystemClock)
}

/// Run the pipeline on in-memory inputs with a custom clock.
pub fn analyze_with_clock<C: Clock>(
    input: AnalysisInput,
    clock: &C,
) -> Result<DiffCoverageReport, AppError> {
    let started_at = clock.now();
    validate_rules(&input.rules)?;
    if input.lcov.is_empty() {
        return Err(AppError::MissingCollaborator(
            "no LCOV tracefile provided".to_string(),
        ));
    }

    let parsed = parse_diff_with_meta(&input.diff_text)?;
    let mut index = parsed.index;
    debug!(
        files = index.len(),
        lines = index.total_lines(),
        "Collected modified lines"
    );
    if !parsed.binary_files.is_empty() {
        warn!(
            files = parsed.binary_files.len(),
            "Skipping binary files in diff"
        );
    }

    let excluded_files = index.retain_files(|path| {
        should_include_path(path, &input.include_patterns, &input.exclude_patterns)
    }) as u32;
    if excluded_files > 0 {
        debug!(excluded_files, "Applied include/exclude patterns");
    }

    let mut coverage_maps: Vec<CoverageMap> = Vec::with_capacity(input.lcov.len());
    for lcov in &input.lcov {
        let map = parse_lcov_with_strip(&lcov.text, &input.path_strip).map_err(|source| {
            AppError::CoverageParse {
                path: lcov.path.clone(),
                source,
            }
        })?;
        debug!(path = %lcov.path, files = map.len(), "Parsed LCOV tracefile");
        coverage_maps.push(map);
    }
    let raw_units = to_raw_units(&merge_coverage(coverage_maps));

    let units = filter_all(&index, &raw_units, &input.source_dirs);
    let without_data = units
        .iter()
        .filter(|u| u.modified_lines > 0 && !u.has_coverage_data())
        .count();
    if without_data > 0 {
        debug!(files = without_data, "Modified files without coverage data");
    }

    let mut report = assemble(units);
    apply_rules(&mut report, &input.rules);

    let ended_at = clock.now();
    report.tool = Tool::default();
    report.run = Run {
        started_at: started_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        ended_at: Some(ended_at.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        duration_ms: Some((ended_at - started_at).num_milliseconds().max(0) as u64),
    };
    report.inputs = Inputs {
        diff_file: input.diff_file,
        lcov_paths: input.lcov.iter().map(|l| l.path.clone()).collect(),
        source_dirs: input.source_dirs,
    };
    report.excluded_files = excluded_files;
    report.binary_files = parsed.binary_files;

    info!(
        verdict = ?report.verdict,
        files = report.overall.files,
        lines_covered = report.overall.lines.covered,
        lines_total = report.overall.lines.total(),
        branches_covered = report.overall.branches.covered,
        branches_total = report.overall.branches.total(),
        "Diff coverage computed"
    );

    Ok(report)
}

// ============================================================================
// Tests
// ============================================================================
