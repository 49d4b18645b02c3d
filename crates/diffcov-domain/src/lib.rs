//! Pure domain logic for diffcov.
//!
//! This crate restricts raw coverage to the lines a diff modified, assembles
//! the filtered units into a report and applies minimum-coverage rules. It has
//! no side effects: every function takes its inputs by reference and returns
//! fresh values.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use diffcov_types::{
    CODE_MIN_BRANCHES, CODE_MIN_LINES, CoverageCounter, CoverageSummary, DiffCoverageReport,
    FilteredCoverageUnit, LineCoverage, ModifiedLinesIndex, RawCoverageUnit, VerdictStatus,
    Violation, normalize_path,
};

// ============================================================================
// Filtering
// ============================================================================

/// Restrict one file's raw coverage to its modified lines.
///
/// A raw entry is retained iff its line is in `index.lines(path)`. A path the
/// index does not know yields an empty unit. Counters are recomputed from the
/// retained entries only.
///
/// # Examples
///
/// ```
/// use diffcov_domain::filter;
/// use diffcov_types::{LineCoverage, ModifiedLinesIndex, RawCoverageUnit};
///
/// let index: ModifiedLinesIndex = [("A.kt", vec![11, 12])].into_iter().collect();
/// let raw = RawCoverageUnit::new(
///     "A.kt",
///     [LineCoverage::new(10, 1), LineCoverage::new(11, 1), LineCoverage::new(12, 0)],
/// );
///
/// let unit = filter("A.kt", &raw, &index);
/// assert_eq!(unit.line_numbers().collect::<Vec<_>>(), vec![11, 12]);
/// assert_eq!(unit.line_counter.ratio(), Some(0.5));
/// ```
pub fn filter(path: &str, raw: &RawCoverageUnit, index: &ModifiedLinesIndex) -> FilteredCoverageUnit {
    let modified = index.lines(path);
    let lines: Vec<LineCoverage> = raw
        .lines
        .iter()
        .filter(|l| modified.contains(&l.line))
        .copied()
        .collect();

    let mut line_counter = CoverageCounter::default();
    let mut branch_counter = CoverageCounter::default();
    for line in &lines {
        if line.is_covered() {
            line_counter.covered += 1;
        } else {
            line_counter.missed += 1;
        }
        branch_counter += CoverageCounter::new(line.branches_covered, line.branches_missed());
    }

    FilteredCoverageUnit {
        path: path.to_string(),
        modified_lines: modified.len() as u32,
        lines,
        line_counter,
        branch_counter,
    }
}

// ============================================================================
// Path Matching
// ============================================================================

/// Find the diff path a coverage path refers to.
///
/// Tried in order:
/// 1. exact match;
/// 2. `root/coverage_path` for each source root;
/// 3. a suffix match on path components, in either direction, preferring
///    the diff path that shares the longest suffix.
///
/// # Examples
///
/// ```
/// use diffcov_domain::match_coverage_path;
///
/// let diff_paths = ["app/src/main/kotlin/com/acme/A.kt", "README.md"];
/// let roots = vec!["app/src/main/kotlin".to_string()];
///
/// assert_eq!(
///     match_coverage_path("com/acme/A.kt", &diff_paths, &roots),
///     Some("app/src/main/kotlin/com/acme/A.kt")
/// );
/// assert_eq!(match_coverage_path("com/acme/B.kt", &diff_paths, &roots), None);
/// ```
pub fn match_coverage_path<'a>(
    coverage_path: &str,
    diff_paths: &[&'a str],
    source_roots: &[String],
) -> Option<&'a str> {
    if let Some(exact) = diff_paths.iter().find(|p| **p == coverage_path) {
        return Some(*exact);
    }

    for root in source_roots {
        let root = normalize_path(root);
        let joined = normalize_path(&format!("{}/{}", root.trim_end_matches('/'), coverage_path));
        if let Some(rooted) = diff_paths.iter().find(|p| **p == joined) {
            return Some(*rooted);
        }
    }

    // The candidate sharing the most trailing components wins; a tie is ambiguous.
    let mut best: Option<&'a str> = None;
    let mut best_len = 0;
    let mut tied = false;
    for path in diff_paths {
        if !is_component_suffix(path, coverage_path) && !is_component_suffix(coverage_path, path) {
            continue;
        }
        let shared = path.len().min(coverage_path.len());
        match shared.cmp(&best_len) {
            Ordering::Greater => {
                best = Some(*path);
                best_len = shared;
                tied = false;
            }
            Ordering::Equal => tied = true,
            Ordering::Less => {}
        }
    }
    if tied { None } else { best }
}

/// Whether `path` ends with `suffix` at a `/` boundary.
fn is_component_suffix(path: &str, suffix: &str) -> bool {
    !suffix.is_empty()
        && path.len() > suffix.len()
        && path.ends_with(suffix)
        && path.as_bytes()[path.len() - suffix.len() - 1] == b'/'
}

/// Filter every diff file against a set of raw coverage units.
///
/// Produces one unit per diff file, in diff encounter order, including files
/// without any coverage data. Raw units that match the same diff file are
/// combined by taking the maximum counters per line.
pub fn filter_all(
    index: &ModifiedLinesIndex,
    units: &[RawCoverageUnit],
    source_roots: &[String],
) -> Vec<FilteredCoverageUnit> {
    let diff_paths: Vec<&str> = index.paths().collect();

    let mut matched: BTreeMap<&str, BTreeMap<u32, LineCoverage>> = BTreeMap::new();
    for unit in units {
        let Some(path) = match_coverage_path(&unit.path, &diff_paths, source_roots) else {
            continue;
        };
        let lines = matched.entry(path).or_default();
        for line in &unit.lines {
            lines
                .entry(line.line)
                .and_modify(|existing| *existing = max_line(*existing, *line))
                .or_insert(*line);
        }
    }

    diff_paths
        .iter()
        .map(|path| match matched.remove(path) {
            Some(lines) => filter(path, &RawCoverageUnit::new(*path, lines.into_values()), index),
            None => FilteredCoverageUnit::empty(*path, index.lines(path).len() as u32),
        })
        .collect()
}

fn max_line(a: LineCoverage, b: LineCoverage) -> LineCoverage {
    let total = a.branches_total.max(b.branches_total);
    let covered = a.branches_covered.max(b.branches_covered);
    LineCoverage::new(a.line, a.hits.max(b.hits)).with_branches(covered, total)
}

// ============================================================================
// Assembly
// ============================================================================

/// Sum the counters of filtered units.
pub fn summarize(units: &[FilteredCoverageUnit]) -> CoverageSummary {
    units.iter().fold(CoverageSummary::default(), |mut acc, unit| {
        acc.files += 1;
        acc.modified_lines += unit.modified_lines;
        acc.lines += unit.line_counter;
        acc.branches += unit.branch_counter;
        acc
    })
}

/// Build a report from filtered units.
///
/// The breakdown keeps input order, including units with no retained lines.
/// The overall aggregate sums covered/missed counters rather than averaging
/// per-file ratios.
pub fn assemble(units: Vec<FilteredCoverageUnit>) -> DiffCoverageReport {
    DiffCoverageReport {
        overall: summarize(&units),
        files: units,
        ..Default::default()
    }
}

// ============================================================================
// Violation Rules
// ============================================================================

/// Minimum coverage ratios the overall aggregate must reach.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ViolationRules {
    /// Minimum line coverage ratio in `[0, 1]`.
    pub min_lines: Option<f64>,
    /// Minimum branch coverage ratio in `[0, 1]`.
    pub min_branches: Option<f64>,
    /// Whether violations fail the run instead of warning.
    pub fail_on_violation: bool,
}

/// Check the overall aggregate against the rules.
///
/// A metric with nothing counted is not applicable and never violates.
pub fn evaluate_rules(
    summary: &CoverageSummary,
    rules: &ViolationRules,
) -> (VerdictStatus, Vec<Violation>) {
    let checks = [
        (CODE_MIN_LINES, "line", rules.min_lines, summary.lines),
        (CODE_MIN_BRANCHES, "branch", rules.min_branches, summary.branches),
    ];

    let violations: Vec<Violation> = checks
        .into_iter()
        .filter_map(|(code, metric, minimum, counter)| {
            let minimum = minimum?;
            let actual = counter.ratio()?;
            (actual < minimum).then(|| Violation {
                code: code.to_string(),
                expected: minimum,
                actual,
                message: format!(
                    "Diff {metric} coverage {:.1}% is below the minimum of {:.1}% ({} of {} covered).",
                    actual * 100.0,
                    minimum * 100.0,
                    counter.covered,
                    counter.total(),
                ),
            })
        })
        .collect();

    let status = match (violations.is_empty(), rules.fail_on_violation) {
        (true, _) => VerdictStatus::Pass,
        (false, true) => VerdictStatus::Fail,
        (false, false) => VerdictStatus::Warn,
    };
    (status, violations)
}

/// Apply the rules to a report in place.
pub fn apply_rules(report: &mut DiffCoverageReport, rules: &ViolationRules) {
    let (verdict, violations) = evaluate_rules(&report.overall, rules);
    report.verdict = verdict;
    report.violations = violations;
}

// ============================================================================
// Tests
// ============================================================================


// ============================================================================
// Property Tests
// ============================================================================

#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    fn raw_lines() -> impl Strategy<Value = Vec<(u32, u32, u32, u32)>> {
        prop::collection::vec((1u32..80, 0u32..4, 0u32..3, 0u32..3), 0..40)
    }

    fn to_unit(path: &str, entries: &[(u32, u32, u32, u32)]) -> RawCoverageUnit {
        RawCoverageUnit::new(
            path,
            entries
                .iter()
                .map(|(line, hits, covered, total)| LineCoverage::new(*line, *hits).with_branches(*covered, *total)),
        )
    }

    proptest! {
        #[test]
        fn filter_is_sound(
            modified in prop::collection::btree_set(1u32..80, 0..30),
            entries in raw_lines(),
        ) {
            let index: ModifiedLinesIndex = [("F.kt", modified.iter().copied())].into_iter().collect();
            let raw = to_unit("F.kt", &entries);
            let unit = filter("F.kt", &raw, &index);
            for line in &unit.lines {
                prop_assert!(modified.contains(&line.line));
                prop_assert!(raw.lines.contains(line));
            }
        }

        #[test]
        fn filter_is_complete(
            modified in prop::collection::btree_set(1u32..80, 0..30),
            entries in raw_lines(),
        ) {
            let index: ModifiedLinesIndex = [("F.kt", modified.iter().copied())].into_iter().collect();
            let raw = to_unit("F.kt", &entries);
            let unit = filter("F.kt", &raw, &index);
            let expected: Vec<u32> = raw.lines.iter().map(|l| l.line).filter(|l| modified.contains(l)).collect();
            prop_assert_eq!(unit.line_numbers().collect::<Vec<_>>(), expected);
        }

        #[test]
        fn counters_match_retained_lines(
            modified in prop::collection::btree_set(1u32..80, 0..30),
            entries in raw_lines(),
        ) {
            let index: ModifiedLinesIndex = [("F.kt", modified.iter().copied())].into_iter().collect();
            let unit = filter("F.kt", &to_unit("F.kt", &entries), &index);
            prop_assert_eq!(unit.line_counter.total() as usize, unit.lines.len());
            let branch_total: u32 = unit.lines.iter().map(|l| l.branches_total).sum();
            prop_assert_eq!(unit.branch_counter.total(), branch_total);
            if let Some(ratio) = unit.line_counter.ratio() {
                prop_assert!((0.0..=1.0).contains(&ratio));
            }
        }

        #[test]
        fn untouched_file_retains_nothing(entries in raw_lines()) {
            let index: ModifiedLinesIndex = [("Other.kt", vec![1u32, 2, 3])].into_iter().collect();
            let unit = filter("F.kt", &to_unit("F.kt", &entries), &index);
            prop_assert!(unit.lines.is_empty());
        }

        #[test]
        fn overall_is_sum_of_units(
            counts in prop::collection::vec((0u32..20, 0u32..20), 0..10),
        ) {
            let units: Vec<FilteredCoverageUnit> = counts
                .iter()
                .enumerate()
                .map(|(i, (covered, missed))| FilteredCoverageUnit {
                    path: format!("f{i}"),
                    modified_lines: covered + missed,
                    lines: vec![],
                    line_counter: CoverageCounter::new(*covered, *missed),
                    branch_counter: CoverageCounter::default(),
                })
                .collect();
            let report = assemble(units);
            let covered: u32 = counts.iter().map(|c| c.0).sum();
            let missed: u32 = counts.iter().map(|c| c.1).sum();
            prop_assert_eq!(report.overall.lines, CoverageCounter::new(covered, missed));
            prop_assert_eq!(report.files.len(), counts.len());
        }
    }
}
