//! LCOV coverage file parser for diffcov.
//!
//! This crate parses and merges LCOV tracefiles into a coverage map with
//! per-line hit counts and per-branch taken counts, and converts that map into
//! the [`RawCoverageUnit`]s the domain layer filters.

use std::collections::BTreeMap;

use diffcov_types::{LineCoverage, RawCoverageUnit, normalize_path};
use thiserror::Error;

// ============================================================================
// Types
// ============================================================================

/// Identifies one branch of a line: the `(block, branch)` pair of a `BRDA` record.
pub type BranchId = (String, String);

/// Everything recorded for one source line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineRecord {
    /// Execution count from `DA`, if the line had one.
    pub hits: Option<u32>,
    /// Taken count per branch from `BRDA`.
    pub branches: BTreeMap<BranchId, u32>,
}

impl LineRecord {
    fn merge(&mut self, other: &LineRecord) {
        self.hits = match (self.hits, other.hits) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        for (id, taken) in &other.branches {
            let current = self.branches.entry(id.clone()).or_insert(0);
            *current = (*current).max(*taken);
        }
    }
}

/// A map of file paths to their line records.
///
/// The outer map is keyed by normalized file path (forward slashes).
/// The inner map is keyed by line number (1-indexed).
pub type CoverageMap = BTreeMap<String, BTreeMap<u32, LineRecord>>;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while parsing LCOV files.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LcovError {
    /// A record could not be parsed.
    #[error("invalid LCOV record at line {line}: {message}")]
    InvalidRecord { line: usize, message: String },
}

impl LcovError {
    fn invalid(line: usize, message: impl Into<String>) -> Self {
        LcovError::InvalidRecord {
            line,
            message: message.into(),
        }
    }
}

// ============================================================================
// Path Handling
// ============================================================================

/// Strip the first matching prefix, then normalize.
///
/// Prefixes are compared after normalization, so `C:\work\` strips
/// `C:/work/src/lib.rs` as well.
///
/// # Examples
///
/// ```
/// use diffcov_adapters_coverage::strip_and_normalize;
///
/// let strip = vec!["/home/ci/project/".to_string()];
/// assert_eq!(strip_and_normalize("/home/ci/project/src/A.kt", &strip), "src/A.kt");
/// assert_eq!(strip_and_normalize("./src\\B.kt", &[]), "src/B.kt");
/// ```
pub fn strip_and_normalize(path: &str, strip_prefixes: &[String]) -> String {
    let normalized = normalize_path(path);
    for prefix in strip_prefixes {
        let prefix = normalize_path(prefix);
        if prefix.is_empty() {
            continue;
        }
        let prefix = prefix.trim_end_matches('/');
        if let Some(rest) = normalized.strip_prefix(prefix)
            && (rest.is_empty() || rest.starts_with('/'))
        {
            return normalize_path(rest.trim_start_matches('/'));
        }
    }
    normalized
}

// ============================================================================
// LCOV Parsing
// ============================================================================

/// Parse an LCOV format string into a coverage map.
///
/// LCOV records used:
/// - `SF:<source file>` starts a record
/// - `DA:<line>,<hits>[,<checksum>]` line execution count
/// - `BRDA:<line>,<block>,<branch>,<taken>` branch taken count (`-` means never evaluated)
/// - `end_of_record` ends the current record
///
/// Other records (`TN`, `FN`, `FNDA`, `LF`, `LH`, `BRF`, `BRH`, ...) are ignored.
///
/// # Examples
///
/// ```
/// use diffcov_adapters_coverage::parse_lcov;
///
/// let lcov = r#"TN:
/// SF:src/lib.rs
/// DA:1,1
/// DA:2,0
/// BRDA:2,0,0,1
/// BRDA:2,0,1,-
/// end_of_record
/// "#;
///
/// let coverage = parse_lcov(lcov).unwrap();
/// let file = coverage.get("src/lib.rs").unwrap();
/// assert_eq!(file[&1].hits, Some(1));
/// assert_eq!(file[&2].hits, Some(0));
/// assert_eq!(file[&2].branches.len(), 2);
/// ```
pub fn parse_lcov(text: &str) -> Result<CoverageMap, LcovError> {
    parse_lcov_with_strip(text, &[])
}

/// Parse an LCOV format string, stripping path prefixes from `SF` records.
pub fn parse_lcov_with_strip(
    text: &str,
    strip_prefixes: &[String],
) -> Result<CoverageMap, LcovError> {
    let mut coverage_map: CoverageMap = BTreeMap::new();
    let mut current_file: Option<String> = None;
    let mut current_lines: BTreeMap<u32, LineRecord> = BTreeMap::new();

    for (offset, line) in text.lines().enumerate() {
        let line_no = offset + 1;
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        if let Some(path) = line.strip_prefix("SF:") {
            if let Some(file) = current_file.take() {
                merge_file_records(&mut coverage_map, &file, std::mem::take(&mut current_lines));
            }
            let path = path.trim();
            if path.is_empty() {
                return Err(LcovError::invalid(line_no, "SF record without a path"));
            }
            current_file = Some(strip_and_normalize(path, strip_prefixes));
            continue;
        }

        if let Some(data) = line.strip_prefix("DA:") {
            if current_file.is_none() {
                return Err(LcovError::invalid(
                    line_no,
                    "DA record without preceding SF record",
                ));
            }
            let (line_number, hits) = parse_da(data)
                .ok_or_else(|| LcovError::invalid(line_no, format!("expected 'DA:<line>,<hits>', got '{line}'")))?;
            let record = current_lines.entry(line_number).or_default();
            record.hits = Some(record.hits.map_or(hits, |h| h.max(hits)));
            continue;
        }

        if let Some(data) = line.strip_prefix("BRDA:") {
            if current_file.is_none() {
                return Err(LcovError::invalid(
                    line_no,
                    "BRDA record without preceding SF record",
                ));
            }
            let (line_number, id, taken) = parse_brda(data).ok_or_else(|| {
                LcovError::invalid(
                    line_no,
                    format!("expected 'BRDA:<line>,<block>,<branch>,<taken>', got '{line}'"),
                )
            })?;
            let record = current_lines.entry(line_number).or_default();
            let current = record.branches.entry(id).or_insert(0);
            *current = (*current).max(taken);
            continue;
        }

        if line == "end_of_record" {
            if let Some(file) = current_file.take() {
                merge_file_records(&mut coverage_map, &file, std::mem::take(&mut current_lines));
            }
            continue;
        }
    }

    if let Some(file) = current_file {
        merge_file_records(&mut coverage_map, &file, current_lines);
    }

    Ok(coverage_map)
}

fn parse_count(field: &str) -> Option<u32> {
    let value: i64 = field.trim().parse().ok()?;
    Some(value.clamp(0, i64::from(u32::MAX)) as u32)
}

fn parse_da(data: &str) -> Option<(u32, u32)> {
    let mut parts = data.split(',');
    let line: u32 = parts.next()?.trim().parse().ok()?;
    let hits = parse_count(parts.next()?)?;
    (line > 0).then_some((line, hits))
}

fn parse_brda(data: &str) -> Option<(u32, BranchId, u32)> {
    let mut parts = data.splitn(4, ',');
    let line: u32 = parts.next()?.trim().parse().ok()?;
    let block = parts.next()?.trim().to_string();
    let branch = parts.next()?.trim().to_string();
    let taken = match parts.next()?.trim() {
        "-" => 0,
        other => parse_count(other)?,
    };
    (line > 0).then_some((line, (block, branch), taken))
}

fn merge_file_records(
    coverage_map: &mut CoverageMap,
    file: &str,
    lines: BTreeMap<u32, LineRecord>,
) {
    let entry = coverage_map.entry(file.to_string()).or_default();
    for (line, record) in lines {
        entry.entry(line).or_default().merge(&record);
    }
}

// ============================================================================
// Coverage Merging
// ============================================================================

/// Merge multiple coverage maps into one.
///
/// Lines are unioned; hit counts and branch taken counts take the maximum.
///
/// # Examples
///
/// ```
/// use diffcov_adapters_coverage::{parse_lcov, merge_coverage};
///
/// let lcov1 = "SF:src/lib.rs\nDA:1,1\nDA:2,0\nend_of_record\n";
/// let lcov2 = "SF:src/lib.rs\nDA:2,1\nDA:3,1\nend_of_record\n";
///
/// let merged = merge_coverage(vec![parse_lcov(lcov1).unwrap(), parse_lcov(lcov2).unwrap()]);
///
/// let file = merged.get("src/lib.rs").unwrap();
/// assert_eq!(file[&1].hits, Some(1));
/// assert_eq!(file[&2].hits, Some(1));
/// assert_eq!(file[&3].hits, Some(1));
/// ```
pub fn merge_coverage(maps: Vec<CoverageMap>) -> CoverageMap {
    let mut merged: CoverageMap = BTreeMap::new();
    for map in maps {
        for (file, lines) in map {
            merge_file_records(&mut merged, &file, lines);
        }
    }
    merged
}

// ============================================================================
// Conversion
// ============================================================================

/// Convert a coverage map into raw coverage units, one per file.
///
/// Only lines with a `DA` record become entries; branch records on lines
/// without one are dropped, since the line itself was never instrumented.
pub fn to_raw_units(map: &CoverageMap) -> Vec<RawCoverageUnit> {
    map.iter()
        .map(|(path, lines)| {
            let entries = lines.iter().filter_map(|(line, record)| {
                let hits = record.hits?;
                let total = record.branches.len() as u32;
                let covered = record.branches.values().filter(|t| **t > 0).count() as u32;
                Some(LineCoverage::new(*line, hits).with_branches(covered, total))
            });
            RawCoverageUnit::new(path.clone(), entries)
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(map: &CoverageMap, path: &str, line: u32) -> Option<u32> {
        map.get(path)
            .and_then(|lines| lines.get(&line))
            .and_then(|r| r.hits)
    }

    // ------------------------------------------------------------------------
    // Path Handling Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_strip_prefix() {
        let strip = vec!["/home/user/project".to_string()];
        assert_eq!(
            strip_and_normalize("/home/user/project/src/lib.rs", &strip),
            "src/lib.rs"
        );
    }

    #[test]
    fn test_strip_prefix_requires_component_boundary() {
        let strip = vec!["/home/user/proj".to_string()];
        assert_eq!(
            strip_and_normalize("/home/user/project/src/lib.rs", &strip),
            "/home/user/project/src/lib.rs"
        );
    }

    #[test]
    fn test_strip_prefix_windows() {
        let strip = vec!["C:\\work\\repo\\".to_string()];
        assert_eq!(
            strip_and_normalize("C:\\work\\repo\\src\\main.rs", &strip),
            "src/main.rs"
        );
    }

    #[test]
    fn test_first_matching_prefix_wins() {
        let strip = vec!["/a".to_string(), "/a/b".to_string()];
        assert_eq!(strip_and_normalize("/a/b/c.rs", &strip), "b/c.rs");
    }

    #[test]
    fn test_no_strip_keeps_absolute_path() {
        assert_eq!(strip_and_normalize("/abs/src/A.kt", &[]), "/abs/src/A.kt");
    }

    // ------------------------------------------------------------------------
    // LCOV Parsing Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_parse_simple_lcov() {
        let lcov = "TN:\nSF:src/lib.rs\nDA:1,1\nDA:2,0\nDA:3,5\nend_of_record\n";
        let coverage = parse_lcov(lcov).unwrap();
        assert_eq!(coverage.len(), 1);
        assert_eq!(hits(&coverage, "src/lib.rs", 1), Some(1));
        assert_eq!(hits(&coverage, "src/lib.rs", 2), Some(0));
        assert_eq!(hits(&coverage, "src/lib.rs", 3), Some(5));
        assert_eq!(hits(&coverage, "src/lib.rs", 4), None);
    }

    #[test]
    fn test_parse_multiple_files() {
        let lcov = "SF:src/a.rs\nDA:1,1\nend_of_record\nSF:src/b.rs\nDA:1,0\nDA:2,1\nend_of_record\n";
        let coverage = parse_lcov(lcov).unwrap();
        assert_eq!(coverage.len(), 2);
        assert_eq!(hits(&coverage, "src/b.rs", 2), Some(1));
    }

    #[test]
    fn test_parse_branches() {
        let lcov = r#"SF:src/A.kt
DA:10,3
BRDA:10,0,0,2
BRDA:10,0,1,0
BRDA:10,1,0,-
DA:11,0
end_of_record
"#;
        let coverage = parse_lcov(lcov).unwrap();
        let units = to_raw_units(&coverage);
        assert_eq!(units.len(), 1);
        let line = units[0].lines[0];
        assert_eq!(line, LineCoverage::new(10, 3).with_branches(1, 3));
        assert_eq!(units[0].lines[1], LineCoverage::new(11, 0));
    }

    #[test]
    fn test_branch_without_line_record_is_dropped() {
        let lcov = "SF:src/A.kt\nDA:1,1\nBRDA:7,0,0,1\nend_of_record\n";
        let units = to_raw_units(&parse_lcov(lcov).unwrap());
        assert_eq!(units[0].lines, vec![LineCoverage::new(1, 1)]);
    }

    #[test]
    fn test_branch_named_by_expression() {
        let lcov = "SF:a.c\nDA:3,1\nBRDA:3,0,jump to line 5,1\nBRDA:3,0,jump to line 7,0\nend_of_record\n";
        let units = to_raw_units(&parse_lcov(lcov).unwrap());
        assert_eq!(units[0].lines[0].branches_total, 2);
        assert_eq!(units[0].lines[0].branches_covered, 1);
    }

    #[test]
    fn test_da_with_checksum() {
        let lcov = "SF:src/lib.rs\nDA:1,4,abcdef\nend_of_record\n";
        assert_eq!(hits(&parse_lcov(lcov).unwrap(), "src/lib.rs", 1), Some(4));
    }

    #[test]
    fn test_negative_hits_clamped_to_zero() {
        let lcov = "SF:src/lib.rs\nDA:1,-1\nend_of_record\n";
        assert_eq!(hits(&parse_lcov(lcov).unwrap(), "src/lib.rs", 1), Some(0));
    }

    #[test]
    fn test_duplicate_da_takes_max() {
        let lcov = "SF:src/lib.rs\nDA:1,0\nDA:1,3\nDA:1,1\nend_of_record\n";
        assert_eq!(hits(&parse_lcov(lcov).unwrap(), "src/lib.rs", 1), Some(3));
    }

    #[test]
    fn test_repeated_file_records_merge() {
        let lcov = "SF:src/lib.rs\nDA:1,0\nend_of_record\nSF:./src/lib.rs\nDA:1,2\nDA:2,0\nend_of_record\n";
        let coverage = parse_lcov(lcov).unwrap();
        assert_eq!(coverage.len(), 1);
        assert_eq!(hits(&coverage, "src/lib.rs", 1), Some(2));
        assert_eq!(hits(&coverage, "src/lib.rs", 2), Some(0));
    }

    #[test]
    fn test_missing_end_of_record() {
        let lcov = "SF:src/lib.rs\nDA:1,1";
        assert_eq!(hits(&parse_lcov(lcov).unwrap(), "src/lib.rs", 1), Some(1));
    }

    #[test]
    fn test_crlf_and_whitespace() {
        let lcov = "SF:src/lib.rs\r\n  DA:1,1  \r\nend_of_record\r\n";
        assert_eq!(hits(&parse_lcov(lcov).unwrap(), "src/lib.rs", 1), Some(1));
    }

    #[test]
    fn test_ignores_function_and_summary_records() {
        let lcov = "SF:src/lib.rs\nFN:1,main\nFNDA:1,main\nFNF:1\nFNH:1\nDA:1,1\nLF:1\nLH:1\nBRF:0\nBRH:0\nend_of_record\n";
        let coverage = parse_lcov(lcov).unwrap();
        assert_eq!(coverage["src/lib.rs"].len(), 1);
    }

    #[test]
    fn test_parse_with_strip() {
        let lcov = "SF:/ci/build/src/lib.rs\nDA:1,1\nend_of_record\n";
        let coverage = parse_lcov_with_strip(lcov, &["/ci/build/".to_string()]).unwrap();
        assert!(coverage.contains_key("src/lib.rs"));
    }

    #[test]
    fn test_da_without_sf_is_error() {
        let err = parse_lcov("DA:1,1\n").unwrap_err();
        assert_eq!(
            err,
            LcovError::InvalidRecord {
                line: 1,
                message: "DA record without preceding SF record".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_da_is_error_with_line() {
        let err = parse_lcov("SF:src/lib.rs\nDA:x,1\n").unwrap_err();
        let LcovError::InvalidRecord { line, .. } = err;
        assert_eq!(line, 2);
    }

    #[test]
    fn test_zero_line_number_is_error() {
        assert!(parse_lcov("SF:src/lib.rs\nDA:0,1\n").is_err());
    }

    #[test]
    fn test_invalid_brda_is_error() {
        assert!(parse_lcov("SF:src/lib.rs\nBRDA:1,0,0\n").is_err());
        assert!(parse_lcov("SF:src/lib.rs\nBRDA:1,0,0,lots\n").is_err());
    }

    #[test]
    fn test_empty_sf_is_error() {
        assert!(parse_lcov("SF:\nDA:1,1\n").is_err());
    }

    #[test]
    fn test_error_display() {
        let err = LcovError::invalid(3, "bad");
        assert_eq!(err.to_string(), "invalid LCOV record at line 3: bad");
    }

    // ------------------------------------------------------------------------
    // Merge Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_merge_takes_max_hits_and_branches() {
        let a = parse_lcov("SF:f.rs\nDA:1,0\nBRDA:1,0,0,0\nBRDA:1,0,1,4\nend_of_record\n").unwrap();
        let b = parse_lcov("SF:f.rs\nDA:1,2\nBRDA:1,0,0,1\nBRDA:1,0,1,-\nend_of_record\n").unwrap();
        let merged = merge_coverage(vec![a, b]);
        let units = to_raw_units(&merged);
        assert_eq!(units[0].lines[0], LineCoverage::new(1, 2).with_branches(2, 2));
    }

    #[test]
    fn test_merge_unions_files() {
        let a = parse_lcov("SF:a.rs\nDA:1,1\nend_of_record\n").unwrap();
        let b = parse_lcov("SF:b.rs\nDA:1,1\nend_of_record\n").unwrap();
        assert_eq!(merge_coverage(vec![a, b]).len(), 2);
    }

    #[test]
    fn test_merge_empty() {
        assert!(merge_coverage(Vec::new()).is_empty());
    }

    #[test]
    fn test_fixture_parses() {
        let lcov = include_str!("../../../fixtures/lcov/kotlin_feature.info");
        let units = to_raw_units(&parse_lcov(lcov).unwrap());
        assert!(!units.is_empty());
        for unit in &units {
            let lines: Vec<u32> = unit.lines.iter().map(|l| l.line).collect();
            let mut sorted = lines.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(lines, sorted);
        }
    }
}

// ============================================================================
// Property Tests
// ============================================================================

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn lcov_text(entries: &[(u32, u32)]) -> String {
        let mut text = String::from("SF:src/f.rs\n");
        for (line, hits) in entries {
            text.push_str(&format!("DA:{line},{hits}\n"));
        }
        text.push_str("end_of_record\n");
        text
    }

    proptest! {
        #[test]
        fn merge_is_commutative(
            a in prop::collection::vec((1u32..50, 0u32..5), 0..20),
            b in prop::collection::vec((1u32..50, 0u32..5), 0..20),
        ) {
            let ma = parse_lcov(&lcov_text(&a)).unwrap();
            let mb = parse_lcov(&lcov_text(&b)).unwrap();
            prop_assert_eq!(
                merge_coverage(vec![ma.clone(), mb.clone()]),
                merge_coverage(vec![mb, ma])
            );
        }

        #[test]
        fn merge_with_self_is_identity(
            a in prop::collection::vec((1u32..50, 0u32..5), 0..20),
        ) {
            let ma = parse_lcov(&lcov_text(&a)).unwrap();
            prop_assert_eq!(merge_coverage(vec![ma.clone(), ma.clone()]), ma);
        }

        #[test]
        fn raw_units_have_covered_within_total(
            branches in prop::collection::vec((0u32..3, 0u32..3), 0..10),
        ) {
            let mut text = String::from("SF:f.rs\nDA:1,1\n");
            for (branch, taken) in &branches {
                text.push_str(&format!("BRDA:1,0,{branch},{taken}\n"));
            }
            let units = to_raw_units(&parse_lcov(&text).unwrap());
            let line = units[0].lines[0];
            prop_assert!(line.branches_covered <= line.branches_total);
            prop_assert!(line.branches_total <= 3);
        }

        #[test]
        fn parse_lcov_never_panics(text in ".{0,300}") {
            let _ = parse_lcov(&text);
        }
    }
}
