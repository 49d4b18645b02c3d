//! Rendering utilities for diffcov reports.
//!
//! This crate converts a [`DiffCoverageReport`] into human-readable output:
//! - Markdown for PR comments or CI job summaries
//! - Plain console text
//!
//! The JSON form is the report's serde serialization and is written by the CLI.
//!
//! # Example
//!
//! ```rust
//! use diffcov_render::{render_console, render_markdown};
//! use diffcov_types::DiffCoverageReport;
//!
//! let report = DiffCoverageReport::default();
//! let markdown = render_markdown(&report, 50);
//! let console = render_console(&report);
//! assert!(markdown.starts_with("## diffcov"));
//! assert!(console.starts_with("diffcov: pass"));
//! ```

use diffcov_types::{CoverageCounter, DiffCoverageReport, FilteredCoverageUnit, VerdictStatus};

/// Returns an emoji representing the verdict status.
///
/// # Examples
///
/// ```rust
/// use diffcov_render::status_emoji;
/// use diffcov_types::VerdictStatus;
///
/// assert_eq!(status_emoji(&VerdictStatus::Pass), "\u{2705}");
/// assert_eq!(status_emoji(&VerdictStatus::Fail), "\u{274C}");
/// ```
pub fn status_emoji(status: &VerdictStatus) -> &'static str {
    match status {
        VerdictStatus::Pass => "\u{2705}",
        VerdictStatus::Warn => "\u{26A0}\u{FE0F}",
        VerdictStatus::Fail => "\u{274C}",
    }
}

fn status_label(status: &VerdictStatus) -> &'static str {
    match status {
        VerdictStatus::Pass => "pass",
        VerdictStatus::Warn => "warn",
        VerdictStatus::Fail => "fail",
    }
}

/// Formats a counter as `75.0% (3/4)`, or `n/a` when nothing was counted.
///
/// # Examples
///
/// ```rust
/// use diffcov_render::format_counter;
/// use diffcov_types::CoverageCounter;
///
/// assert_eq!(format_counter(&CoverageCounter::new(1, 1)), "50.0% (1/2)");
/// assert_eq!(format_counter(&CoverageCounter::default()), "n/a");
/// ```
pub fn format_counter(counter: &CoverageCounter) -> String {
    match counter.percent() {
        Some(pct) => format!("{pct:.1}% ({}/{})", counter.covered, counter.total()),
        None => "n/a".to_string(),
    }
}

/// Collapses sorted line numbers into ranges: `[3, 4, 5, 9]` becomes `3-5, 9`.
pub fn compact_ranges(lines: &[u32]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut iter = lines.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek().is_some_and(|&next| end.checked_add(1) == Some(next)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}-{end}"));
        }
    }
    parts.join(", ")
}

/// Escapes `|` so a path cannot split a markdown table cell.
fn table_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

fn missed_cell(unit: &FilteredCoverageUnit) -> String {
    if !unit.has_coverage_data() {
        return if unit.modified_lines == 0 {
            "-".to_string()
        } else {
            "no data".to_string()
        };
    }
    let missed: Vec<u32> = unit.missed_lines().collect();
    if missed.is_empty() {
        "-".to_string()
    } else {
        compact_ranges(&missed)
    }
}

/// Renders the report as Markdown.
///
/// # Arguments
///
/// * `report` - The report to render.
/// * `max_files` - Maximum number of files to list in the table.
///
/// # Example Output
///
/// ```markdown
/// ## diffcov: Diff Coverage Report
///
/// **Status**: [emoji] [status]
///
/// ### Summary
/// - **Files**: N
/// - **Modified lines**: N
/// - **Line coverage**: X.X% (c/t)
/// - **Branch coverage**: X.X% (c/t)
///
/// ### Files
///
/// | File | Modified | Lines | Branches | Missed lines |
/// |------|----------|-------|----------|--------------|
/// | src/A.kt | 2 | 50.0% (1/2) | n/a | 12 |
/// ```
pub fn render_markdown(report: &DiffCoverageReport, max_files: usize) -> String {
    let mut output = String::new();

    output.push_str("## diffcov: Diff Coverage Report\n\n");

    let emoji = status_emoji(&report.verdict);
    let label = status_label(&report.verdict);
    output.push_str(&format!("**Status**: {} {}\n\n", emoji, label));

    output.push_str("### Summary\n");
    output.push_str(&format!("- **Files**: {}\n", report.overall.files));
    output.push_str(&format!(
        "- **Modified lines**: {}\n",
        report.overall.modified_lines
    ));
    output.push_str(&format!(
        "- **Line coverage**: {}\n",
        format_counter(&report.overall.lines)
    ));
    output.push_str(&format!(
        "- **Branch coverage**: {}\n",
        format_counter(&report.overall.branches)
    ));
    if report.excluded_files > 0 {
        output.push_str(&format!(
            "- **Excluded files**: {}\n",
            report.excluded_files
        ));
    }
    if !report.binary_files.is_empty() {
        output.push_str(&format!(
            "- **Binary files skipped**: {}\n",
            report.binary_files.len()
        ));
    }

    if !report.violations.is_empty() {
        output.push_str("\n### Violations\n\n");
        for violation in &report.violations {
            output.push_str(&format!("- `{}`: {}\n", violation.code, violation.message));
        }
    }

    if !report.files.is_empty() {
        output.push_str("\n### Files\n\n");
        output.push_str("| File | Modified | Lines | Branches | Missed lines |\n");
        output.push_str("|------|----------|-------|----------|--------------|\n");

        for unit in report.files.iter().take(max_files) {
            output.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                table_cell(&unit.path),
                unit.modified_lines,
                format_counter(&unit.line_counter),
                format_counter(&unit.branch_counter),
                missed_cell(unit),
            ));
        }

        let total = report.files.len();
        if total > max_files {
            output.push('\n');
            output.push_str(&format!(
                "*Showing {} of {} files*\n",
                max_files.min(total),
                total
            ));
        }
    }

    output.push_str("\n<details>\n");
    output.push_str("<summary>Reproduce locally</summary>\n\n");
    output.push_str("```bash\n");

    let inputs = &report.inputs;
    let mut cmd_parts = vec!["diffcov check".to_string()];
    match &inputs.diff_file {
        Some(diff_file) => cmd_parts.push(format!("--diff-file {}", diff_file)),
        None => cmd_parts.push("--diff-file <file>".to_string()),
    }
    if inputs.lcov_paths.is_empty() {
        cmd_parts.push("--lcov <lcov>".to_string());
    } else {
        for lcov_path in &inputs.lcov_paths {
            cmd_parts.push(format!("--lcov {}", lcov_path));
        }
    }
    for dir in &inputs.source_dirs {
        cmd_parts.push(format!("--source-dir {}", dir));
    }

    output.push_str(&cmd_parts.join(" \\\n  "));
    output.push_str("\n```\n\n");
    output.push_str("</details>\n");

    output
}

/// Renders a short plain-text summary for the terminal.
pub fn render_console(report: &DiffCoverageReport) -> String {
    let mut output = format!("diffcov: {}\n", status_label(&report.verdict));
    output.push_str(&format!(
        "  files: {}, modified lines: {}\n",
        report.overall.files, report.overall.modified_lines
    ));
    output.push_str(&format!(
        "  line coverage:   {}\n",
        format_counter(&report.overall.lines)
    ));
    output.push_str(&format!(
        "  branch coverage: {}\n",
        format_counter(&report.overall.branches)
    ));
    for violation in &report.violations {
        output.push_str(&format!("  {}: {}\n", violation.code, violation.message));
    }
    output
}

// ============================================================================
// Tests
// ============================================================================
