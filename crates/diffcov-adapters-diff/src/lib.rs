//! Diff parsing adapter for diffcov.
//!
//! This crate parses unified diff text, as produced by `git diff` or
//! `diff -u`, into a [`ModifiedLinesIndex`]: for every file the diff touches,
//! the set of new-revision line numbers that were added or modified.
//!
//! Hunk bodies are consumed by their declared line counts, so body lines that
//! look like headers (a removed `-- comment` line shows up as `--- comment`)
//! are handled correctly, and truncated hunks are reported as errors.

use std::collections::BTreeSet;

use diffcov_types::{ModifiedLinesIndex, normalize_path};
use thiserror::Error;

// ============================================================================
// Types
// ============================================================================

/// Result of parsing a diff with metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffParseResult {
    /// Modified lines per file.
    pub index: ModifiedLinesIndex,
    /// Binary files detected in the diff (normalized paths).
    pub binary_files: Vec<String>,
    /// Files deleted by the diff (normalized old paths).
    pub deleted_files: Vec<String>,
}

/// A diff that could not be parsed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "malformed diff in {} at line {line}: {reason}",
    .path.as_deref().unwrap_or("<no file>")
)]
pub struct MalformedDiffError {
    /// File section being parsed, if one had started.
    pub path: Option<String>,
    /// 1-based line offset in the diff text.
    pub line: usize,
    /// What was wrong.
    pub reason: String,
}

/// One body line of a hunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffLine<'a> {
    /// Unchanged line present in both revisions.
    Context(&'a str),
    /// Line present only in the new revision.
    Added(&'a str),
    /// Line present only in the old revision.
    Removed(&'a str),
}

impl<'a> DiffLine<'a> {
    /// Classify a hunk body line by its marker character.
    ///
    /// Returns `None` for lines that are not body lines, including the
    /// `\ No newline at end of file` marker. An empty line is context whose
    /// leading space was stripped by an editor or mail client.
    pub fn classify(line: &'a str) -> Option<DiffLine<'a>> {
        if line.is_empty() {
            return Some(DiffLine::Context(""));
        }
        match line.as_bytes()[0] {
            b' ' => Some(DiffLine::Context(&line[1..])),
            b'+' => Some(DiffLine::Added(&line[1..])),
            b'-' => Some(DiffLine::Removed(&line[1..])),
            _ => None,
        }
    }
}

/// A hunk header and the body lines that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHunk<'a> {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    pub lines: Vec<DiffLine<'a>>,
}

impl<'a> DiffHunk<'a> {
    /// Parse a hunk header of the form `@@ -old[,count] +new[,count] @@ [section]`.
    ///
    /// Counts default to 1 when omitted. Returns `None` when the header does
    /// not have exactly an old and a new range with numeric fields.
    ///
    /// # Examples
    ///
    /// ```
    /// use diffcov_adapters_diff::DiffHunk;
    ///
    /// let hunk = DiffHunk::from_header("@@ -10,3 +10,4 @@ fun main()").unwrap();
    /// assert_eq!((hunk.old_start, hunk.old_count), (10, 3));
    /// assert_eq!((hunk.new_start, hunk.new_count), (10, 4));
    ///
    /// let hunk = DiffHunk::from_header("@@ -1 +1 @@").unwrap();
    /// assert_eq!((hunk.old_count, hunk.new_count), (1, 1));
    ///
    /// assert!(DiffHunk::from_header("@@ -1,2 @@").is_none());
    /// ```
    pub fn from_header(line: &str) -> Option<DiffHunk<'a>> {
        let rest = line.strip_prefix("@@ ")?;
        let end = rest.find(" @@")?;
        let mut ranges = rest[..end].split_whitespace();

        let (old_start, old_count) = parse_range(ranges.next()?.strip_prefix('-')?)?;
        let (new_start, new_count) = parse_range(ranges.next()?.strip_prefix('+')?)?;
        if ranges.next().is_some() {
            return None;
        }

        Some(DiffHunk {
            old_start,
            old_count,
            new_start,
            new_count,
            lines: Vec::new(),
        })
    }

    /// Old-revision lines still expected by the header.
    pub fn old_remaining(&self) -> u32 {
        let consumed = self
            .lines
            .iter()
            .filter(|l| !matches!(l, DiffLine::Added(_)))
            .count() as u32;
        self.old_count.saturating_sub(consumed)
    }

    /// New-revision lines still expected by the header.
    pub fn new_remaining(&self) -> u32 {
        let consumed = self
            .lines
            .iter()
            .filter(|l| !matches!(l, DiffLine::Removed(_)))
            .count() as u32;
        self.new_count.saturating_sub(consumed)
    }

    /// Whether the body holds as many lines as the header declares.
    pub fn is_complete(&self) -> bool {
        self.old_remaining() == 0 && self.new_remaining() == 0
    }

    /// New-revision line numbers of the added lines, in order.
    ///
    /// The cursor starts at `new_start`, moves past context and added lines,
    /// and stays put on removed lines.
    pub fn added_lines(&self) -> Vec<u32> {
        let mut cursor = self.new_start;
        let mut added = Vec::new();
        for line in &self.lines {
            match line {
                DiffLine::Added(_) => {
                    added.push(cursor);
                    cursor = cursor.saturating_add(1);
                }
                DiffLine::Context(_) => cursor = cursor.saturating_add(1),
                DiffLine::Removed(_) => {}
            }
        }
        added
    }
}

fn parse_range(range: &str) -> Option<(u32, u32)> {
    match range.split_once(',') {
        Some((start, count)) => Some((start.parse().ok()?, count.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

// ============================================================================
// Header Paths
// ============================================================================

/// Strip the `a/` or `b/` prefix git puts on header paths.
///
/// # Examples
///
/// ```
/// use diffcov_adapters_diff::strip_git_prefix;
///
/// assert_eq!(strip_git_prefix("b/src/A.kt"), "src/A.kt");
/// assert_eq!(strip_git_prefix("a/src/A.kt"), "src/A.kt");
/// assert_eq!(strip_git_prefix("src/A.kt"), "src/A.kt");
/// ```
pub fn strip_git_prefix(path: &str) -> &str {
    path.strip_prefix("b/")
        .or_else(|| path.strip_prefix("a/"))
        .unwrap_or(path)
}

/// Turn a `---`/`+++` header value into an index key.
///
/// Drops a trailing tab-separated timestamp, undoes git's C-style quoting,
/// strips the git prefix and normalizes. `/dev/null` yields `None`.
fn header_path(raw: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    let path = unquote(raw);
    if path == "/dev/null" {
        return None;
    }
    Some(normalize_path(strip_git_prefix(&normalize_path(&path))))
}

/// Undo git's quoting of paths with special characters (`"a/caf\303\251.kt"`).
fn unquote(raw: &str) -> String {
    let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
    else {
        return raw.to_string();
    };

    let mut bytes = Vec::with_capacity(inner.len());
    let mut chars = inner.bytes().peekable();
    while let Some(b) = chars.next() {
        if b != b'\\' {
            bytes.push(b);
            continue;
        }
        match chars.next() {
            Some(b'n') => bytes.push(b'\n'),
            Some(b't') => bytes.push(b'\t'),
            Some(d @ b'0'..=b'7') => {
                let mut value = u32::from(d - b'0');
                for _ in 0..2 {
                    match chars.peek() {
                        Some(&o @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(o - b'0');
                            chars.next();
                        }
                        _ => break,
                    }
                }
                bytes.push(value as u8);
            }
            Some(other) => bytes.push(other),
            None => bytes.push(b'\\'),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Split the `a/X b/Y` operand of a `diff --git` line into the two paths.
fn split_git_header(rest: &str) -> Option<(String, String)> {
    let rest = rest.trim();

    if rest.starts_with('"') {
        let close = rest[1..].find('"')? + 2;
        let (old, new) = rest.split_at(close);
        return Some((old.to_string(), new.trim().to_string()));
    }

    // Paths may contain spaces; the new path starts at the last " b/".
    if let Some(pos) = rest.rfind(" b/") {
        return Some((rest[..pos].to_string(), rest[pos + 1..].to_string()));
    }

    let mut parts = rest.split_whitespace();
    let old = parts.next()?;
    let new = parts.next()?;
    Some((old.to_string(), new.to_string()))
}

// ============================================================================
// Diff Parsing
// ============================================================================

/// One file section of the diff.
#[derive(Debug, Default)]
struct Section {
    old_path: Option<String>,
    new_path: Option<String>,
    saw_new_header: bool,
    deleted: bool,
    binary: bool,
    /// Header of the last hunk completed in this section.
    closed_hunk: Option<String>,
}

impl Section {
    fn display_path(&self) -> Option<String> {
        self.new_path.clone().or_else(|| self.old_path.clone())
    }
}

struct Parser<'a> {
    result: DiffParseResult,
    binary: BTreeSet<String>,
    section: Option<Section>,
    hunk: Option<DiffHunk<'a>>,
    line_no: usize,
}

impl<'a> Parser<'a> {
    fn new() -> Self {
        Self {
            result: DiffParseResult::default(),
            binary: BTreeSet::new(),
            section: None,
            hunk: None,
            line_no: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> MalformedDiffError {
        MalformedDiffError {
            path: self.section.as_ref().and_then(Section::display_path),
            line: self.line_no,
            reason: reason.into(),
        }
    }

    fn unfinished_hunk_error(&self, hunk: &DiffHunk<'_>, what: &str) -> MalformedDiffError {
        self.error(format!(
            "{what} while hunk @@ -{},{} +{},{} @@ still expects {} old and {} new line(s)",
            hunk.old_start,
            hunk.old_count,
            hunk.new_start,
            hunk.new_count,
            hunk.old_remaining(),
            hunk.new_remaining(),
        ))
    }

    fn feed(&mut self, line: &'a str) -> Result<(), MalformedDiffError> {
        if self.hunk.is_some() {
            return self.feed_body(line);
        }
        self.feed_header(line)
    }

    fn feed_body(&mut self, line: &'a str) -> Result<(), MalformedDiffError> {
        if line.starts_with('\\') {
            return Ok(());
        }

        let Some(hunk) = self.hunk.as_ref() else {
            return Ok(());
        };
        let Some(body) = DiffLine::classify(line) else {
            let what = if line.starts_with("@@") || line.starts_with("diff ") {
                "header found"
            } else {
                "unexpected line"
            };
            return Err(self.unfinished_hunk_error(hunk, what));
        };

        let fits = match body {
            DiffLine::Added(_) => hunk.new_remaining() > 0,
            DiffLine::Removed(_) => hunk.old_remaining() > 0,
            DiffLine::Context(_) => hunk.old_remaining() > 0 && hunk.new_remaining() > 0,
        };
        if !fits {
            return Err(self.error(format!(
                "{body:?} exceeds the line counts declared by @@ -{},{} +{},{} @@",
                hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count
            )));
        }

        if let Some(hunk) = self.hunk.as_mut() {
            hunk.lines.push(body);
        }
        self.close_hunk_if_complete();
        Ok(())
    }

    fn close_hunk_if_complete(&mut self) {
        if !self.hunk.as_ref().is_some_and(DiffHunk::is_complete) {
            return;
        }
        let Some(hunk) = self.hunk.take() else {
            return;
        };
        let Some(section) = self.section.as_mut() else {
            return;
        };
        section.closed_hunk = Some(format!(
            "@@ -{},{} +{},{} @@",
            hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count
        ));
        if section.deleted || section.binary {
            return;
        }
        if let Some(path) = section.new_path.as_deref() {
            self.result.index.touch_file(path);
            for line in hunk.added_lines() {
                self.result.index.record(path, line);
            }
        }
    }

    fn feed_header(&mut self, line: &'a str) -> Result<(), MalformedDiffError> {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            self.finish_section();
            let mut section = Section::default();
            if let Some((old, new)) = split_git_header(rest) {
                section.old_path = header_path(&old);
                section.new_path = header_path(&new);
            }
            self.section = Some(section);
            return Ok(());
        }

        if line.starts_with("diff --cc ") || line.starts_with("diff --combined ") {
            return Err(self.error("combined (merge) diffs are not supported"));
        }

        if let Some(rest) = line.strip_prefix("--- ") {
            let needs_new_section = self.section.as_ref().is_none_or(|s| s.saw_new_header);
            if needs_new_section {
                self.finish_section();
                self.section = Some(Section::default());
            }
            if let Some(section) = self.section.as_mut() {
                section.old_path = header_path(rest);
            }
            return Ok(());
        }

        if let Some(rest) = line.strip_prefix("+++ ") {
            if self.section.is_none() {
                self.section = Some(Section::default());
            }
            if let Some(section) = self.section.as_mut() {
                section.saw_new_header = true;
                match header_path(rest) {
                    Some(path) => section.new_path = Some(path),
                    None => section.deleted = true,
                }
            }
            return Ok(());
        }

        if line.starts_with("@@") {
            return self.open_hunk(line);
        }

        // format-patch signature separator; everything after it is trailer.
        if line == "-- " || line == "--" {
            self.finish_section();
            return Ok(());
        }

        if let Some(header) = self
            .section
            .as_ref()
            .and_then(|s| s.closed_hunk.as_deref())
            && line.starts_with(['+', '-', ' '])
        {
            return Err(self.error(format!(
                "{line:?} exceeds the line counts declared by the preceding hunk {header}"
            )));
        }

        let Some(section) = self.section.as_mut() else {
            return Ok(());
        };

        if let Some(path) = line
            .strip_prefix("rename to ")
            .or_else(|| line.strip_prefix("copy to "))
        {
            section.new_path = Some(normalize_path(&unquote(path.trim())));
        } else if let Some(path) = line
            .strip_prefix("rename from ")
            .or_else(|| line.strip_prefix("copy from "))
        {
            section.old_path = Some(normalize_path(&unquote(path.trim())));
        } else if line.starts_with("deleted file mode") {
            section.deleted = true;
        } else if let Some(rest) = line.strip_prefix("Binary files ") {
            section.binary = true;
            if let Some(and_pos) = rest.find(" and ") {
                let after_and = &rest[and_pos + 5..];
                let new = after_and.strip_suffix(" differ").unwrap_or(after_and);
                match header_path(new) {
                    Some(path) => section.new_path = Some(path),
                    None => section.deleted = true,
                }
            }
        } else if line.starts_with("GIT binary patch") {
            section.binary = true;
        }

        Ok(())
    }

    fn open_hunk(&mut self, line: &'a str) -> Result<(), MalformedDiffError> {
        let Some(section) = self.section.as_ref() else {
            return Err(self.error("hunk header outside of a file section"));
        };
        if section.new_path.is_none() && !section.deleted {
            return Err(self.error("hunk header before the new file path is known"));
        }
        let Some(hunk) = DiffHunk::from_header(line) else {
            return Err(self.error(format!("malformed hunk header '{line}'")));
        };
        self.hunk = Some(hunk);
        self.close_hunk_if_complete();
        Ok(())
    }

    fn finish_section(&mut self) {
        let Some(section) = self.section.take() else {
            return;
        };

        if section.deleted {
            if let Some(old) = section.old_path {
                self.result.deleted_files.push(old);
            }
            return;
        }

        let Some(path) = section.new_path else {
            return;
        };
        if section.binary {
            self.binary.insert(path);
        } else {
            self.result.index.touch_file(&path);
        }
    }

    fn finish(mut self) -> Result<DiffParseResult, MalformedDiffError> {
        if let Some(hunk) = self.hunk.as_ref() {
            return Err(self.unfinished_hunk_error(hunk, "end of diff reached"));
        }
        self.finish_section();

        // A path seen as binary in one section never carries line data.
        for path in &self.binary {
            self.result.index.remove_file(path);
        }
        self.result.binary_files = self.binary.into_iter().collect();
        Ok(self.result)
    }
}

/// Parse a unified diff into the set of added lines per file.
///
/// # Errors
///
/// Returns [`MalformedDiffError`] if a hunk header is unparsable or a hunk
/// body does not match its declared line counts.
///
/// # Examples
///
/// ```
/// use diffcov_adapters_diff::parse_diff;
///
/// let diff = "\
/// diff --git a/src/A.kt b/src/A.kt
/// --- a/src/A.kt
/// +++ b/src/A.kt
/// @@ -10,3 +10,4 @@
///  val a = 1
/// +val b = 2
/// +val c = 3
///  val d = 4
/// -val e = 5
/// ";
///
/// let index = parse_diff(diff).unwrap();
/// assert_eq!(index.lines("src/A.kt").iter().copied().collect::<Vec<_>>(), vec![11, 12]);
/// ```
pub fn parse_diff(text: &str) -> Result<ModifiedLinesIndex, MalformedDiffError> {
    Ok(parse_diff_with_meta(text)?.index)
}

/// Parse a unified diff, also reporting binary and deleted files.
///
/// CRLF line endings are accepted.
pub fn parse_diff_with_meta(text: &str) -> Result<DiffParseResult, MalformedDiffError> {
    let mut parser = Parser::new();
    for (offset, line) in text.lines().enumerate() {
        parser.line_no = offset + 1;
        parser.feed(line)?;
    }
    parser.line_no = text.lines().count();
    parser.finish()
}

// ============================================================================
// Tests
// ============================================================================


// ============================================================================
// Property Tests
// ============================================================================
