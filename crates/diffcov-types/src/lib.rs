//! Core types and DTOs for diffcov.
//!
//! This crate defines the data shared by every other diffcov crate:
//! the modified-lines index produced from a diff, the raw and filtered
//! coverage units, the report schema, and the error code registry.
//! It also owns [`normalize_path`], the single canonicalization rule that
//! both the diff parser and the coverage reader apply to file paths.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

// ============================================================================
// Schema and Code Constants
// ============================================================================

/// Schema identifier for the diffcov report format.
pub const SCHEMA_ID: &str = "diffcov.report.v1";

/// Error code for a diff that could not be parsed.
pub const CODE_MALFORMED_DIFF: &str = "diffcov.input.malformed_diff";

/// Error code for invalid LCOV input.
pub const CODE_INVALID_LCOV: &str = "diffcov.input.invalid_lcov";

/// Error code for absent coverage data.
pub const CODE_MISSING_COVERAGE: &str = "diffcov.input.missing_coverage";

/// Error code for configuration problems (diff path, config file).
pub const CODE_INVALID_CONFIG: &str = "diffcov.config.invalid";

/// Violation code for line coverage below the configured minimum.
pub const CODE_MIN_LINES: &str = "diffcov.rule.min_lines";

/// Violation code for branch coverage below the configured minimum.
pub const CODE_MIN_BRANCHES: &str = "diffcov.rule.min_branches";

// ============================================================================
// Code Registry
// ============================================================================

/// Metadata for a diffcov error or violation code.
#[derive(Debug, Clone, Copy)]
pub struct CodeInfo {
    pub code: &'static str,
    pub name: &'static str,
    pub short_description: &'static str,
    pub full_description: &'static str,
    pub remediation: &'static str,
}

/// Registry of all diffcov codes.
pub const CODE_REGISTRY: &[CodeInfo] = &[
    CodeInfo {
        code: CODE_MALFORMED_DIFF,
        name: "MalformedDiff",
        short_description: "Malformed diff input",
        full_description: "A hunk header could not be parsed, or a hunk ended before its declared line counts were consumed.",
        remediation: "Regenerate the diff with `git diff` and make sure it was not truncated or edited by hand.",
    },
    CodeInfo {
        code: CODE_INVALID_LCOV,
        name: "InvalidLcov",
        short_description: "Invalid LCOV input",
        full_description: "A coverage tracefile contained a record that is not valid LCOV.",
        remediation: "Regenerate the tracefile and ensure it is not truncated or corrupted.",
    },
    CodeInfo {
        code: CODE_MISSING_COVERAGE,
        name: "MissingCoverage",
        short_description: "Coverage data unavailable",
        full_description: "No coverage tracefile was configured, or a configured tracefile does not exist.",
        remediation: "Run the test suite with coverage enabled before diffcov, and pass the tracefile with --lcov.",
    },
    CodeInfo {
        code: CODE_INVALID_CONFIG,
        name: "InvalidConfig",
        short_description: "Invalid configuration",
        full_description: "The diff file path is unset, missing, or not a regular file, or diffcov.toml is invalid.",
        remediation: "Point --diff-file at an existing diff file and check diffcov.toml values.",
    },
    CodeInfo {
        code: CODE_MIN_LINES,
        name: "MinLines",
        short_description: "Line coverage below minimum",
        full_description: "Line coverage over the modified lines is below the configured `min_lines` ratio.",
        remediation: "Add tests that execute the changed lines, or lower rules.min_lines.",
    },
    CodeInfo {
        code: CODE_MIN_BRANCHES,
        name: "MinBranches",
        short_description: "Branch coverage below minimum",
        full_description: "Branch coverage over the modified lines is below the configured `min_branches` ratio.",
        remediation: "Add tests for both outcomes of the changed conditions, or lower rules.min_branches.",
    },
];

/// Lookup code metadata by code string.
pub fn explain(code: &str) -> Option<&'static CodeInfo> {
    CODE_REGISTRY.iter().find(|info| info.code == code)
}

// ============================================================================
// Path Normalization
// ============================================================================

/// Normalize a file path to the canonical form used as index key.
///
/// - Converts backslashes to forward slashes
/// - Collapses repeated separators
/// - Removes leading `./` segments and surrounding whitespace
///
/// Both the diff parser and the coverage reader call this after their own
/// source-specific stripping, so their keys compare equal.
///
/// # Examples
///
/// ```
/// use diffcov_types::normalize_path;
///
/// assert_eq!(normalize_path("src/lib.rs"), "src/lib.rs");
/// assert_eq!(normalize_path("./src/lib.rs"), "src/lib.rs");
/// assert_eq!(normalize_path("src\\main\\A.kt"), "src/main/A.kt");
/// assert_eq!(normalize_path("src//main///A.kt"), "src/main/A.kt");
/// ```
pub fn normalize_path(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");

    // Each pass either shrinks the string or stops, so the result is a fixpoint.
    loop {
        let before = normalized.len();

        normalized = normalized.trim().to_string();
        while normalized.contains("//") {
            normalized = normalized.replace("//", "/");
        }
        if let Some(rest) = normalized.strip_prefix("./") {
            normalized = rest.to_string();
        }

        if normalized.len() == before {
            break;
        }
    }

    normalized
}

// ============================================================================
// Modified Lines Index
// ============================================================================

static NO_LINES: BTreeSet<u32> = BTreeSet::new();

/// Which new-revision lines a diff added or modified, per file.
///
/// Keys are paths produced by [`normalize_path`]. A file that appears in the
/// diff without additions (pure rename, deletion-only hunks) is present with
/// an empty set; a file the diff never mentions is absent. Both cases answer
/// [`lines`](Self::lines) with an empty set.
///
/// Files are remembered in the order the diff first mentions them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModifiedLinesIndex {
    files: BTreeMap<String, BTreeSet<u32>>,
    order: Vec<String>,
}

impl ModifiedLinesIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a file without recording any line.
    pub fn touch_file(&mut self, path: &str) {
        if !self.files.contains_key(path) {
            self.files.insert(path.to_string(), BTreeSet::new());
            self.order.push(path.to_string());
        }
    }

    /// Record a modified line for `path`. Line 0 is not a valid line and is ignored.
    pub fn record(&mut self, path: &str, line: u32) {
        self.touch_file(path);
        if line == 0 {
            return;
        }
        if let Some(lines) = self.files.get_mut(path) {
            lines.insert(line);
        }
    }

    /// Modified lines for `path`; empty when the file is unknown.
    pub fn lines(&self, path: &str) -> &BTreeSet<u32> {
        self.files.get(path).unwrap_or(&NO_LINES)
    }

    /// Whether `line` of `path` was modified.
    pub fn contains(&self, path: &str, line: u32) -> bool {
        self.lines(path).contains(&line)
    }

    /// Whether the diff mentioned `path` at all.
    pub fn contains_file(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// File paths in diff encounter order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// `(path, lines)` pairs in diff encounter order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<u32>)> {
        self.order
            .iter()
            .map(|path| (path.as_str(), self.lines(path)))
    }

    /// Remove a file from the index. Returns whether it was present.
    pub fn remove_file(&mut self, path: &str) -> bool {
        if self.files.remove(path).is_some() {
            self.order.retain(|p| p != path);
            true
        } else {
            false
        }
    }

    /// Keep only files for which `keep` returns true. Returns the number removed.
    pub fn retain_files<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let before = self.order.len();
        let files = &mut self.files;
        self.order.retain(|path| {
            if keep(path) {
                true
            } else {
                files.remove(path);
                false
            }
        });
        before - self.order.len()
    }

    /// Number of files in the index.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the index holds no file at all.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Total number of modified lines across all files.
    pub fn total_lines(&self) -> usize {
        self.files.values().map(BTreeSet::len).sum()
    }
}

impl<S, I> FromIterator<(S, I)> for ModifiedLinesIndex
where
    S: AsRef<str>,
    I: IntoIterator<Item = u32>,
{
    fn from_iter<T: IntoIterator<Item = (S, I)>>(iter: T) -> Self {
        let mut index = ModifiedLinesIndex::new();
        for (path, lines) in iter {
            let path = path.as_ref();
            index.touch_file(path);
            for line in lines {
                index.record(path, line);
            }
        }
        index
    }
}

// ============================================================================
// Coverage Data
// ============================================================================

/// Execution counters for one source line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineCoverage {
    /// Line number (1-indexed).
    pub line: u32,
    /// Number of times the line's instructions executed.
    pub hits: u32,
    /// Branches on this line that were taken at least once.
    pub branches_covered: u32,
    /// Branches on this line in total.
    pub branches_total: u32,
}

impl LineCoverage {
    /// Line counters without branch data.
    pub fn new(line: u32, hits: u32) -> Self {
        Self {
            line,
            hits,
            branches_covered: 0,
            branches_total: 0,
        }
    }

    /// Attach branch counters.
    pub fn with_branches(mut self, covered: u32, total: u32) -> Self {
        self.branches_covered = covered.min(total);
        self.branches_total = total;
        self
    }

    /// Whether the line executed at least once.
    pub fn is_covered(&self) -> bool {
        self.hits > 0
    }

    /// Branches on this line never taken.
    pub fn branches_missed(&self) -> u32 {
        self.branches_total.saturating_sub(self.branches_covered)
    }
}

/// Raw coverage for one file as reported by the instrumentation.
///
/// `lines` is ordered by line number with at most one entry per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawCoverageUnit {
    /// Normalized path of the file.
    pub path: String,
    /// Per-line counters.
    pub lines: Vec<LineCoverage>,
}

impl RawCoverageUnit {
    /// Create a unit, sorting and de-duplicating lines (last entry wins).
    pub fn new(path: impl Into<String>, lines: impl IntoIterator<Item = LineCoverage>) -> Self {
        let by_line: BTreeMap<u32, LineCoverage> = lines.into_iter().map(|l| (l.line, l)).collect();
        Self {
            path: path.into(),
            lines: by_line.into_values().collect(),
        }
    }
}

/// Covered/missed pair for one metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageCounter {
    pub covered: u32,
    pub missed: u32,
}

impl CoverageCounter {
    pub fn new(covered: u32, missed: u32) -> Self {
        Self { covered, missed }
    }

    pub fn total(&self) -> u32 {
        self.covered + self.missed
    }

    /// Covered fraction in `[0, 1]`, or `None` when nothing was counted.
    pub fn ratio(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(f64::from(self.covered) / f64::from(total)),
        }
    }

    /// Covered percentage in `[0, 100]`, or `None` when nothing was counted.
    pub fn percent(&self) -> Option<f64> {
        self.ratio().map(|r| r * 100.0)
    }
}

impl Add for CoverageCounter {
    type Output = CoverageCounter;

    fn add(self, rhs: CoverageCounter) -> CoverageCounter {
        CoverageCounter {
            covered: self.covered + rhs.covered,
            missed: self.missed + rhs.missed,
        }
    }
}

impl AddAssign for CoverageCounter {
    fn add_assign(&mut self, rhs: CoverageCounter) {
        *self = *self + rhs;
    }
}

/// Coverage of one file restricted to its modified lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilteredCoverageUnit {
    /// Normalized path as reported by the diff.
    pub path: String,
    /// Number of modified lines the diff reports for this file.
    pub modified_lines: u32,
    /// Retained line counters, ordered by line.
    pub lines: Vec<LineCoverage>,
    /// Lines covered/missed among retained lines.
    pub line_counter: CoverageCounter,
    /// Branches covered/missed among retained lines.
    pub branch_counter: CoverageCounter,
}

impl FilteredCoverageUnit {
    /// A unit with no retained lines.
    pub fn empty(path: impl Into<String>, modified_lines: u32) -> Self {
        Self {
            path: path.into(),
            modified_lines,
            ..Default::default()
        }
    }

    /// Whether any modified line had instrumentation data.
    pub fn has_coverage_data(&self) -> bool {
        !self.lines.is_empty()
    }

    /// Retained line numbers.
    pub fn line_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.lines.iter().map(|l| l.line)
    }

    /// Retained lines that never executed.
    pub fn missed_lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.lines.iter().filter(|l| !l.is_covered()).map(|l| l.line)
    }
}

/// Aggregate over every file in a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSummary {
    /// Number of files in the breakdown.
    pub files: u32,
    /// Modified lines across all files.
    pub modified_lines: u32,
    /// Summed line counters.
    pub lines: CoverageCounter,
    /// Summed branch counters.
    pub branches: CoverageCounter,
}

// ============================================================================
// Verdict
// ============================================================================

/// Outcome of applying the violation rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictStatus {
    #[default]
    Pass,
    Warn,
    Fail,
}

/// A violated minimum-coverage rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Violation code (e.g. `diffcov.rule.min_lines`).
    pub code: String,
    /// Minimum ratio configured.
    pub expected: f64,
    /// Ratio measured.
    pub actual: f64,
    /// Human-readable message.
    pub message: String,
}

// ============================================================================
// Report
// ============================================================================

/// Information about the tool that generated the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub version: String,
}

impl Default for Tool {
    fn default() -> Self {
        Self {
            name: "diffcov".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Information about the run timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// ISO 8601 timestamp when the run started.
    pub started_at: String,
    /// ISO 8601 timestamp when the run ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    /// Duration of the run in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl Default for Run {
    fn default() -> Self {
        Self {
            started_at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            ended_at: None,
            duration_ms: None,
        }
    }
}

/// Information about the inputs used for the analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inputs {
    /// Path to the diff file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_file: Option<String>,
    /// Paths to LCOV tracefiles.
    pub lcov_paths: Vec<String>,
    /// Source directory roots used for path matching.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_dirs: Vec<String>,
}

/// The diff coverage report handed to renderers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffCoverageReport {
    /// Schema identifier.
    pub schema: String,
    /// Tool information.
    pub tool: Tool,
    /// Run timing information.
    pub run: Run,
    /// Input metadata.
    pub inputs: Inputs,
    /// Verdict after applying violation rules.
    pub verdict: VerdictStatus,
    /// Violated rules.
    #[serde(default)]
    pub violations: Vec<Violation>,
    /// Aggregate over all files.
    pub overall: CoverageSummary,
    /// Per-file breakdown in diff order.
    pub files: Vec<FilteredCoverageUnit>,
    /// Files dropped by include/exclude patterns.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub excluded_files: u32,
    /// Binary files seen in the diff.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub binary_files: Vec<String>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl Default for DiffCoverageReport {
    fn default() -> Self {
        Self {
            schema: SCHEMA_ID.to_string(),
            tool: Tool::default(),
            run: Run::default(),
            inputs: Inputs::default(),
            verdict: VerdictStatus::Pass,
            violations: Vec::new(),
            overall: CoverageSummary::default(),
            files: Vec::new(),
            excluded_files: 0,
            binary_files: Vec::new(),
        }
    }
}

impl DiffCoverageReport {
    /// Look up a file in the breakdown.
    pub fn file(&self, path: &str) -> Option<&FilteredCoverageUnit> {
        self.files.iter().find(|f| f.path == path)
    }
}

// ============================================================================
// Tests
// ============================================================================
