//! Configuration parsing and management for diffcov.
//!
//! This crate provides:
//! - Configuration types (`Config` and its sections)
//! - TOML parsing and validation
//! - Discovery of `diffcov.toml` in the current or a parent directory
//! - Precedence handling (CLI > config file > defaults)
//! - Include/exclude glob filtering of diff paths

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// File name searched for by [`discover_config`].
pub const CONFIG_FILE_NAME: &str = "diffcov.toml";

/// Default number of files listed in the markdown summary.
pub const DEFAULT_MAX_FILES: usize = 50;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value.
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Path filtering configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathConfig {
    /// Glob patterns for files to exclude.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Glob patterns for files to include (allowlist).
    /// If empty, all files are included.
    #[serde(default)]
    pub include: Vec<String>,
}

/// Path normalization configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizeConfig {
    /// Prefixes to strip from LCOV SF paths.
    #[serde(default)]
    pub path_strip: Vec<String>,
}

/// Minimum coverage rules.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesConfig {
    /// Minimum line coverage ratio (0-1).
    #[serde(default)]
    pub min_lines: Option<f64>,
    /// Minimum branch coverage ratio (0-1).
    #[serde(default)]
    pub min_branches: Option<f64>,
    /// Fail instead of warn when a rule is violated.
    #[serde(default)]
    pub fail_on_violation: Option<bool>,
}

/// Report rendering configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    /// Maximum files listed in the markdown summary.
    #[serde(default)]
    pub max_files: Option<usize>,
}

/// Full configuration for diffcov.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Unified diff to analyze.
    #[serde(default)]
    pub diff_file: Option<PathBuf>,

    /// LCOV tracefiles to read.
    #[serde(default)]
    pub lcov: Vec<PathBuf>,

    /// Source directory roots used to match coverage paths to diff paths.
    #[serde(default)]
    pub source_dirs: Vec<String>,

    /// Path filtering configuration.
    #[serde(default)]
    pub paths: PathConfig,

    /// Path normalization configuration.
    #[serde(default)]
    pub normalize: NormalizeConfig,

    /// Minimum coverage rules.
    #[serde(default)]
    pub rules: RulesConfig,

    /// Report rendering configuration.
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Resolve relative input paths against `base`.
    ///
    /// Only filesystem inputs move; `source_dirs` are repository-relative
    /// prefixes and stay as written.
    pub fn rebase(&mut self, base: &Path) {
        if let Some(diff) = self.diff_file.as_mut()
            && diff.is_relative()
        {
            *diff = base.join(&*diff);
        }
        for lcov in &mut self.lcov {
            if lcov.is_relative() {
                *lcov = base.join(&*lcov);
            }
        }
    }
}

// ============================================================================
// Effective Configuration
// ============================================================================

/// Effective configuration with all values resolved.
///
/// This represents the final configuration after applying:
/// 1. Defaults
/// 2. Config file values
/// 3. CLI overrides
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub diff_file: Option<PathBuf>,
    pub lcov_paths: Vec<PathBuf>,
    pub source_dirs: Vec<String>,
    pub path_strip: Vec<String>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub min_lines: Option<f64>,
    pub min_branches: Option<f64>,
    pub fail_on_violation: bool,
    pub max_files: usize,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            diff_file: None,
            lcov_paths: vec![],
            source_dirs: vec![],
            path_strip: vec![],
            include_patterns: vec![],
            exclude_patterns: vec![],
            min_lines: None,
            min_branches: None,
            fail_on_violation: false,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

impl EffectiveConfig {
    /// Check value ranges and glob syntax.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_ratio("min_lines", self.min_lines)?;
        validate_ratio("min_branches", self.min_branches)?;
        validate_patterns("paths.include", &self.include_patterns)?;
        validate_patterns("paths.exclude", &self.exclude_patterns)?;
        validate_max_files("max_files", self.max_files)?;
        Ok(())
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

/// Load configuration from a TOML file.
///
/// Relative `diff_file` and `lcov` paths are resolved against the file's
/// directory.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config = parse_config(&content)?;
    if let Some(base) = path.parent() {
        config.rebase(base);
    }
    Ok(config)
}

/// Load configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    validate_ratio("rules.min_lines", config.rules.min_lines)?;
    validate_ratio("rules.min_branches", config.rules.min_branches)?;
    validate_patterns("paths.include", &config.paths.include)?;
    validate_patterns("paths.exclude", &config.paths.exclude)?;
    if let Some(max) = config.report.max_files {
        validate_max_files("report.max_files", max)?;
    }
    Ok(())
}

fn validate_max_files(name: &str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be at least 1"
        )));
    }
    Ok(())
}

fn validate_ratio(name: &str, value: Option<f64>) -> Result<(), ConfigError> {
    if let Some(ratio) = value
        && !(0.0..=1.0).contains(&ratio)
    {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be between 0 and 1, got {ratio}"
        )));
    }
    Ok(())
}

fn validate_patterns(name: &str, patterns: &[String]) -> Result<(), ConfigError> {
    for pattern in patterns {
        if let Err(err) = glob::Pattern::new(pattern) {
            return Err(ConfigError::InvalidValue(format!(
                "{name} pattern '{pattern}' is invalid: {err}"
            )));
        }
    }
    Ok(())
}

/// Find and load `diffcov.toml` from `start` or one of its parents.
///
/// Returns `Ok(None)` if no file exists. A file that exists but fails to
/// load is an error.
pub fn discover_config_from(start: &Path) -> Result<Option<(PathBuf, Config)>, ConfigError> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_FILE_NAME);
        if config_path.is_file() {
            let config = load_config(&config_path)?;
            return Ok(Some((config_path, config)));
        }

        if !current.pop() {
            break;
        }
    }

    Ok(None)
}

/// Find and load `diffcov.toml` from the current directory or a parent.
pub fn discover_config() -> Result<Option<(PathBuf, Config)>, ConfigError> {
    let cwd = std::env::current_dir()?;
    discover_config_from(&cwd)
}

// ============================================================================
// Precedence Resolution
// ============================================================================

/// CLI override options.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub diff_file: Option<PathBuf>,
    pub lcov_paths: Option<Vec<PathBuf>>,
    pub source_dirs: Option<Vec<String>>,
    pub path_strip: Option<Vec<String>>,
    pub min_lines: Option<f64>,
    pub min_branches: Option<f64>,
    pub fail_on_violation: Option<bool>,
    pub max_files: Option<usize>,
}

/// Resolve effective configuration from the config file and CLI overrides.
///
/// Precedence: CLI > config file > defaults. List-valued CLI options replace
/// the file's list rather than extending it.
pub fn resolve_config(config: Option<&Config>, cli: &CliOverrides) -> EffectiveConfig {
    let mut effective = EffectiveConfig::default();

    if let Some(config) = config {
        effective.diff_file = config.diff_file.clone();
        effective.lcov_paths = config.lcov.clone();
        effective.source_dirs = config.source_dirs.clone();
        effective.path_strip = config.normalize.path_strip.clone();
        effective.include_patterns = config.paths.include.clone();
        effective.exclude_patterns = config.paths.exclude.clone();
        effective.min_lines = config.rules.min_lines;
        effective.min_branches = config.rules.min_branches;
        if let Some(fail) = config.rules.fail_on_violation {
            effective.fail_on_violation = fail;
        }
        if let Some(max) = config.report.max_files {
            effective.max_files = max;
        }
    }

    if let Some(diff) = &cli.diff_file {
        effective.diff_file = Some(diff.clone());
    }
    if let Some(lcov) = &cli.lcov_paths {
        effective.lcov_paths = lcov.clone();
    }
    if let Some(dirs) = &cli.source_dirs {
        effective.source_dirs = dirs.clone();
    }
    if let Some(path_strip) = &cli.path_strip {
        effective.path_strip = path_strip.clone();
    }
    if let Some(ratio) = cli.min_lines {
        effective.min_lines = Some(ratio);
    }
    if let Some(ratio) = cli.min_branches {
        effective.min_branches = Some(ratio);
    }
    if let Some(fail) = cli.fail_on_violation {
        effective.fail_on_violation = fail;
    }
    if let Some(max) = cli.max_files {
        effective.max_files = max;
    }

    effective
}

// ============================================================================
// Path Filtering
// ============================================================================

/// Check if a path matches any of the given glob patterns.
pub fn matches_any_pattern(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        glob::Pattern::new(pattern).is_ok_and(|glob_pattern| glob_pattern.matches(path))
    })
}

/// Filter a path based on include/exclude patterns.
///
/// Returns `true` if the path should be kept. Exclusion wins over inclusion.
pub fn should_include_path(
    path: &str,
    include_patterns: &[String],
    exclude_patterns: &[String],
) -> bool {
    if matches_any_pattern(path, exclude_patterns) {
        return false;
    }

    if !include_patterns.is_empty() && !matches_any_pattern(path, include_patterns) {
        return false;
    }

    true
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = parse_config("").unwrap();
        assert!(config.diff_file.is_none());
        assert!(config.lcov.is_empty());
        assert!(config.rules.min_lines.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
diff_file = "build/changes.diff"
lcov = ["build/lcov.info", "build/it-lcov.info"]
source_dirs = ["app/src/main/kotlin"]

[paths]
exclude = ["**/generated/**"]
include = ["app/**"]

[normalize]
path_strip = ["/home/runner/work/app/"]

[rules]
min_lines = 0.8
min_branches = 0.5
fail_on_violation = true

[report]
max_files = 10
"#;
        let config = parse_config(toml).unwrap();

        assert_eq!(config.diff_file, Some(PathBuf::from("build/changes.diff")));
        assert_eq!(config.lcov.len(), 2);
        assert_eq!(config.source_dirs, vec!["app/src/main/kotlin"]);
        assert_eq!(config.paths.exclude, vec!["**/generated/**"]);
        assert_eq!(config.paths.include, vec!["app/**"]);
        assert_eq!(config.normalize.path_strip, vec!["/home/runner/work/app/"]);
        assert_eq!(config.rules.min_lines, Some(0.8));
        assert_eq!(config.rules.min_branches, Some(0.5));
        assert_eq!(config.rules.fail_on_violation, Some(true));
        assert_eq!(config.report.max_files, Some(10));
    }

    #[test]
    fn test_ratio_out_of_range() {
        assert!(matches!(
            parse_config("[rules]\nmin_lines = 1.5"),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(parse_config("[rules]\nmin_branches = -0.1").is_err());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(matches!(
            parse_config("min_line = 0.5"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_invalid_glob_is_rejected() {
        assert!(parse_config("[paths]\nexclude = [\"[unclosed\"]").is_err());
    }

    #[test]
    fn test_zero_max_files_is_rejected() {
        assert!(parse_config("[report]\nmax_files = 0").is_err());
    }

    #[test]
    fn test_load_config_rebases_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "diff_file = \"changes.diff\"\nlcov = [\"cov/lcov.info\", \"/abs/lcov.info\"]\nsource_dirs = [\"src\"]\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.diff_file, Some(dir.path().join("changes.diff")));
        assert_eq!(config.lcov[0], dir.path().join("cov/lcov.info"));
        assert_eq!(config.lcov[1], PathBuf::from("/abs/lcov.info"));
        assert_eq!(config.source_dirs, vec!["src"]);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(&dir.path().join("nope.toml"));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_discover_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[rules]\nmin_lines = 0.7\n").unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();

        let (path, config) = discover_config_from(&nested).unwrap().unwrap();
        assert_eq!(path, dir.path().join(CONFIG_FILE_NAME));
        assert_eq!(config.rules.min_lines, Some(0.7));
    }

    #[test]
    fn test_discover_reports_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[rules]\nmin_lines = 7\n").unwrap();
        assert!(discover_config_from(dir.path()).is_err());
    }

    #[test]
    fn test_resolve_defaults() {
        let effective = resolve_config(None, &CliOverrides::default());
        assert_eq!(effective, EffectiveConfig::default());
        assert_eq!(effective.max_files, DEFAULT_MAX_FILES);
        assert!(!effective.fail_on_violation);
    }

    #[test]
    fn test_resolve_file_values() {
        let config = parse_config(
            "lcov = [\"a.info\"]\n[rules]\nmin_lines = 0.9\nfail_on_violation = true\n",
        )
        .unwrap();
        let effective = resolve_config(Some(&config), &CliOverrides::default());
        assert_eq!(effective.lcov_paths, vec![PathBuf::from("a.info")]);
        assert_eq!(effective.min_lines, Some(0.9));
        assert!(effective.fail_on_violation);
    }

    #[test]
    fn test_cli_overrides_file() {
        let config = parse_config(
            "diff_file = \"file.diff\"\nlcov = [\"a.info\"]\n[rules]\nmin_lines = 0.9\nfail_on_violation = true\n",
        )
        .unwrap();
        let cli = CliOverrides {
            diff_file: Some(PathBuf::from("cli.diff")),
            lcov_paths: Some(vec![PathBuf::from("b.info"), PathBuf::from("c.info")]),
            min_lines: Some(0.5),
            fail_on_violation: Some(false),
            ..Default::default()
        };
        let effective = resolve_config(Some(&config), &cli);
        assert_eq!(effective.diff_file, Some(PathBuf::from("cli.diff")));
        assert_eq!(effective.lcov_paths.len(), 2);
        assert_eq!(effective.min_lines, Some(0.5));
        assert!(!effective.fail_on_violation);
    }

    #[test]
    fn test_effective_validate_catches_cli_ratio() {
        let cli = CliOverrides {
            min_branches: Some(2.0),
            ..Default::default()
        };
        let effective = resolve_config(None, &cli);
        assert!(effective.validate().is_err());
    }

    #[test]
    fn test_effective_validate_catches_cli_zero_max_files() {
        let cli = CliOverrides {
            max_files: Some(0),
            ..Default::default()
        };
        let err = resolve_config(None, &cli).validate().unwrap_err();
        assert!(err.to_string().contains("max_files must be at least 1"));

        let cli = CliOverrides {
            max_files: Some(1),
            ..Default::default()
        };
        assert!(resolve_config(None, &cli).validate().is_ok());
    }

    #[test]
    fn test_should_include_path() {
        let include = vec!["src/**".to_string()];
        let exclude = vec!["src/generated/**".to_string()];
        assert!(should_include_path("src/lib.rs", &include, &exclude));
        assert!(!should_include_path("src/generated/api.rs", &include, &exclude));
        assert!(!should_include_path("docs/readme.md", &include, &exclude));
        assert!(should_include_path("docs/readme.md", &[], &[]));
    }

    #[test]
    fn test_matches_any_pattern_ignores_invalid() {
        let patterns = vec!["[bad".to_string(), "*.md".to_string()];
        assert!(matches_any_pattern("README.md", &patterns));
        assert!(!matches_any_pattern("lib.rs", &patterns));
    }
}
