//! Configuration loading and discovery.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. `~/.config/orgstats/config.<ext>` (user config)
//! 3. `.orgstats.<ext>` or `orgstats.<ext>` in the working directory or the
//!    nearest parent (the search stops at a directory containing `.git`)
//! 4. Files passed explicitly, in the order given
//!
//! `<ext>` is one of `toml`, `yaml`, `yml`, `json`.
//!
//! # Example
//! ```toml
//! log_level = "debug"
//!
//! [github]
//! page_size = 50
//! concurrency = 8
//!
//! [report]
//! lookback_days = 365
//! ```

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use figment::Figment;
use figment::providers::{Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};

use crate::aggregate::LookbackWindow;
use crate::error::{ConfigError, ConfigResult};
use crate::walker::{RetryPolicy, WalkOptions};

/// Public GitHub GraphQL endpoint.
pub const DEFAULT_API_URL: &str = "https://api.github.com/graphql";

/// Largest `first:` argument GitHub accepts on a connection.
pub const MAX_PAGE_SIZE: u32 = 100;

/// The configuration for orgstats.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Log level for the application (e.g., "debug", "info", "warn", "error").
    pub log_level: LogLevel,
    /// Directory for JSONL log files (falls back to platform defaults if unset).
    pub log_dir: Option<Utf8PathBuf>,
    /// API access and pagination tuning.
    pub github: GithubConfig,
    /// Report settings.
    pub report: ReportConfig,
}

/// How the GitHub API is queried.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubConfig {
    /// GraphQL endpoint (GitHub Enterprise installs use `https://HOST/api/graphql`).
    pub api_url: String,
    /// Items requested per page on every connection, capped at 100.
    pub page_size: u32,
    /// Repositories walked at the same time.
    pub concurrency: usize,
    /// Attempts per query before a transient failure becomes fatal.
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on each further retry.
    pub backoff_ms: u64,
    /// Upper bound on a single query attempt.
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            page_size: MAX_PAGE_SIZE,
            concurrency: 4,
            max_attempts: 3,
            backoff_ms: 500,
            timeout_secs: 30,
        }
    }
}

impl GithubConfig {
    /// Per-attempt request timeout.
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry behavior for transient failures.
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_ms),
            attempt_timeout: self.timeout(),
        }
    }

    /// Walker settings, with page size and concurrency clamped to usable values.
    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            page_size: self.page_size.clamp(1, MAX_PAGE_SIZE),
            concurrency: self.concurrency.max(1),
            retry: self.retry_policy(),
        }
    }
}

/// Report settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReportConfig {
    /// Length of the "last year" bucket in days.
    pub lookback_days: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            lookback_days: LookbackWindow::DEFAULT_DAYS,
        }
    }
}

impl ReportConfig {
    /// The configured lookback window.
    pub const fn lookback(&self) -> LookbackWindow {
        LookbackWindow::days(self.lookback_days)
    }
}

/// Log level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Verbose output for debugging and development.
    Debug,
    /// Standard operational information (default).
    #[default]
    Info,
    /// Warnings about potential issues.
    Warn,
    /// Errors that indicate failures.
    Error,
}

impl LogLevel {
    /// Returns the log level as a lowercase string slice.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Supported configuration file extensions (in order of preference).
const CONFIG_EXTENSIONS: &[&str] = &["toml", "yaml", "yml", "json"];

/// Application name for XDG directory lookup and config file names.
const APP_NAME: &str = "orgstats";

/// Builder for loading configuration from multiple sources.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    project_search_root: Option<Utf8PathBuf>,
    include_user_config: bool,
    boundary_marker: Option<String>,
    explicit_files: Vec<Utf8PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default settings.
    pub fn new() -> Self {
        Self {
            project_search_root: None,
            include_user_config: true,
            boundary_marker: Some(".git".to_string()),
            explicit_files: Vec::new(),
        }
    }

    /// Walk up from `path` looking for a project config file.
    pub fn with_project_search<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.project_search_root = Some(path.as_ref().to_path_buf());
        self
    }

    /// Set whether to include user config from `~/.config/orgstats/`.
    pub const fn with_user_config(mut self, include: bool) -> Self {
        self.include_user_config = include;
        self
    }

    /// Stop the upward search in any parent directory containing `marker`.
    pub fn with_boundary_marker<S: Into<String>>(mut self, marker: S) -> Self {
        self.boundary_marker = Some(marker.into());
        self
    }

    /// Search all the way to the filesystem root.
    pub fn without_boundary_marker(mut self) -> Self {
        self.boundary_marker = None;
        self
    }

    /// Add an explicit config file; later files take precedence.
    pub fn with_file<P: AsRef<Utf8Path>>(mut self, path: P) -> Self {
        self.explicit_files.push(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration, merging all discovered sources.
    #[tracing::instrument(skip(self), fields(search_root = ?self.project_search_root))]
    pub fn load(self) -> ConfigResult<Config> {
        tracing::debug!("loading configuration");
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if self.include_user_config
            && let Some(user_config) = find_user_config()
        {
            figment = merge_file(figment, &user_config);
        }

        if let Some(ref root) = self.project_search_root
            && let Some(project_config) = self.find_project_config(root)
        {
            figment = merge_file(figment, &project_config);
        }

        for file in &self.explicit_files {
            if !file.is_file() {
                return Err(ConfigError::Missing(file.clone()));
            }
            figment = merge_file(figment, file);
        }

        let config: Config = figment
            .extract()
            .map_err(|e| ConfigError::Deserialize(Box::new(e)))?;
        tracing::info!(
            log_level = config.log_level.as_str(),
            api_url = %config.github.api_url,
            lookback_days = config.report.lookback_days,
            "configuration loaded"
        );
        Ok(config)
    }

    fn find_project_config(&self, start: &Utf8Path) -> Option<Utf8PathBuf> {
        let mut current = Some(start.to_path_buf());

        while let Some(dir) = current {
            if let Some(ref marker) = self.boundary_marker
                && dir != start
                && dir.join(marker).exists()
            {
                break;
            }

            for ext in CONFIG_EXTENSIONS {
                let dotfile = dir.join(format!(".{APP_NAME}.{ext}"));
                if dotfile.is_file() {
                    return Some(dotfile);
                }
                let regular = dir.join(format!("{APP_NAME}.{ext}"));
                if regular.is_file() {
                    return Some(regular);
                }
            }

            current = dir.parent().map(Utf8Path::to_path_buf);
        }

        None
    }
}

fn find_user_config() -> Option<Utf8PathBuf> {
    let config_dir = user_config_dir()?;
    CONFIG_EXTENSIONS
        .iter()
        .map(|ext| config_dir.join(format!("config.{ext}")))
        .find(|path| path.is_file())
}

/// Merge a config file into the figment, detecting format from extension.
fn merge_file(figment: Figment, path: &Utf8Path) -> Figment {
    match path.extension() {
        Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path.as_str())),
        Some("json") => figment.merge(Json::file_exact(path.as_str())),
        _ => figment.merge(Toml::file_exact(path.as_str())),
    }
}

/// Get the user config directory path.
///
/// Returns `~/.config/orgstats/` on Linux, `~/Library/Application Support/orgstats/`
/// on macOS, and equivalent on other platforms.
pub fn user_config_dir() -> Option<Utf8PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("", "", APP_NAME)?;
    Utf8PathBuf::from_path_buf(proj_dirs.config_dir().to_path_buf()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, name: &str, body: &str) -> Utf8PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        Utf8PathBuf::try_from(path).unwrap()
    }

    fn load_file(path: &Utf8Path) -> Config {
        ConfigLoader::new()
            .with_user_config(false)
            .with_file(path)
            .load()
            .unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, LogLevel::Info);
        assert!(config.log_dir.is_none());
        assert_eq!(config.github.api_url, DEFAULT_API_URL);
        assert_eq!(config.github.page_size, 100);
        assert_eq!(config.github.max_attempts, 3);
        assert_eq!(config.report.lookback_days, 365);
    }

    #[test]
    fn test_loader_builds_with_defaults() {
        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .load()
            .unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_single_file_overrides_default() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "config.toml",
            r#"log_level = "debug"
log_dir = "/tmp/orgstats"
"#,
        );

        let config = load_file(&path);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(
            config.log_dir.as_ref().map(|dir| dir.as_str()),
            Some("/tmp/orgstats")
        );
    }

    #[test]
    fn test_partial_github_section_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "config.toml",
            r#"
[github]
page_size = 25
concurrency = 8
"#,
        );

        let config = load_file(&path);
        assert_eq!(config.github.page_size, 25);
        assert_eq!(config.github.concurrency, 8);
        assert_eq!(config.github.max_attempts, 3);
        assert_eq!(config.github.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_report_section_sets_lookback() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "config.yaml", "report:\n  lookback_days: 90\n");

        let config = load_file(&path);
        assert_eq!(config.report.lookback(), LookbackWindow::days(90));
    }

    #[test]
    fn test_json_config() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "config.json",
            r#"{"github": {"api_url": "https://ghe.example.com/api/graphql"}}"#,
        );

        let config = load_file(&path);
        assert_eq!(config.github.api_url, "https://ghe.example.com/api/graphql");
    }

    #[test]
    fn test_later_file_overrides_earlier() {
        let tmp = TempDir::new().unwrap();
        let base = write_config(&tmp, "base.toml", r#"log_level = "warn""#);
        let over = write_config(&tmp, "override.toml", r#"log_level = "error""#);

        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_file(&base)
            .with_file(&over)
            .load()
            .unwrap();

        assert_eq!(config.log_level, LogLevel::Error);
    }

    #[test]
    fn test_project_config_discovery() {
        let tmp = TempDir::new().unwrap();
        let project_dir = tmp.path().join("project");
        let sub_dir = project_dir.join("src").join("deep");
        fs::create_dir_all(&sub_dir).unwrap();
        fs::write(project_dir.join(".orgstats.toml"), r#"log_level = "debug""#).unwrap();

        let sub_dir = Utf8PathBuf::try_from(sub_dir).unwrap();
        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .with_project_search(&sub_dir)
            .load()
            .unwrap();

        assert_eq!(config.log_level, LogLevel::Debug);
    }

    #[test]
    fn test_boundary_marker_stops_search() {
        let tmp = TempDir::new().unwrap();
        let parent = tmp.path().join("parent");
        let child = parent.join("child");
        let work = child.join("work");
        fs::create_dir_all(&work).unwrap();
        fs::write(parent.join(".orgstats.toml"), r#"log_level = "warn""#).unwrap();
        fs::create_dir(child.join(".git")).unwrap();

        let work = Utf8PathBuf::try_from(work).unwrap();
        let config = ConfigLoader::new()
            .with_user_config(false)
            .with_boundary_marker(".git")
            .with_project_search(&work)
            .load()
            .unwrap();

        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn test_explicit_file_overrides_project_config() {
        let tmp = TempDir::new().unwrap();
        write_config(&tmp, ".orgstats.toml", "[github]\nconcurrency = 2\n");
        let over = write_config(&tmp, "override.toml", "[github]\nconcurrency = 6\n");

        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let config = ConfigLoader::new()
            .with_user_config(false)
            .without_boundary_marker()
            .with_project_search(&root)
            .with_file(&over)
            .load()
            .unwrap();

        assert_eq!(config.github.concurrency, 6);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = ConfigLoader::new()
            .with_user_config(false)
            .with_file("/nonexistent/orgstats.toml")
            .load();
        assert!(matches!(result, Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_invalid_value_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "config.toml", "[github]\npage_size = \"lots\"\n");

        let result = ConfigLoader::new()
            .with_user_config(false)
            .with_file(&path)
            .load();
        assert!(matches!(result, Err(ConfigError::Deserialize(_))));
    }

    #[test]
    fn test_walk_options_are_clamped() {
        let github = GithubConfig {
            page_size: 500,
            concurrency: 0,
            ..GithubConfig::default()
        };
        let options = github.walk_options();
        assert_eq!(options.page_size, MAX_PAGE_SIZE);
        assert_eq!(options.concurrency, 1);

        let github = GithubConfig {
            page_size: 0,
            ..GithubConfig::default()
        };
        assert_eq!(github.walk_options().page_size, 1);
    }

    #[test]
    fn test_retry_policy_from_config() {
        let github = GithubConfig {
            max_attempts: 5,
            backoff_ms: 100,
            timeout_secs: 7,
            ..GithubConfig::default()
        };
        let policy = github.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert_eq!(policy.attempt_timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_user_config_dir() {
        if let Some(path) = user_config_dir() {
            assert!(path.as_str().contains("orgstats"));
        }
    }
}
