//! Application configuration for regindex.
//!
//! User config lives at `~/.regindex/regindex.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RegIndexError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "regindex.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".regindex";

/// Log prefix used when a runner is configured without one.
const DEFAULT_LOG_PREFIX: &str = "Runner";

// ---------------------------------------------------------------------------
// Config structs (matching regindex.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Concurrency ceilings for the batch drivers.
    #[serde(default)]
    pub runner: RunnerSettings,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path of the libSQL database file. `~` expands to the home directory.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Directory scanned for `title-<N>.xml` bulk files.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Directory holding dated snapshots as `<YYYY-MM-DD>/title-<N>.xml`.
    #[serde(default = "default_versions_dir")]
    pub versions_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            data_dir: default_data_dir(),
            versions_dir: default_versions_dir(),
        }
    }
}

fn default_database_path() -> String {
    "~/.regindex/regindex.db".into()
}
fn default_data_dir() -> String {
    "data/titles".into()
}
fn default_versions_dir() -> String {
    "data/versions".into()
}

/// `[runner]` section.
///
/// Values are signed so that a negative ceiling in the file is reported as a
/// configuration error instead of a TOML type error. `0` means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Titles imported from disk at once.
    #[serde(default = "default_import_concurrency")]
    pub import_concurrency: i64,

    /// Titles parsed and stored at once.
    #[serde(default = "default_structure_concurrency")]
    pub structure_concurrency: i64,

    /// Titles whose metrics are recomputed at once.
    #[serde(default = "default_metrics_concurrency")]
    pub metrics_concurrency: i64,

    /// Titles compared across two dated versions at once.
    #[serde(default = "default_changes_concurrency")]
    pub changes_concurrency: i64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            import_concurrency: default_import_concurrency(),
            structure_concurrency: default_structure_concurrency(),
            metrics_concurrency: default_metrics_concurrency(),
            changes_concurrency: default_changes_concurrency(),
        }
    }
}

fn default_import_concurrency() -> i64 {
    5
}
fn default_structure_concurrency() -> i64 {
    5
}
fn default_metrics_concurrency() -> i64 {
    3
}
fn default_changes_concurrency() -> i64 {
    3
}

// ---------------------------------------------------------------------------
// Runner config (runtime, validated)
// ---------------------------------------------------------------------------

/// Runtime configuration of one task runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Maximum number of workers executing at once; `0` means unlimited.
    pub max_concurrency: usize,
    /// Label attached to every progress message of the run.
    pub log_prefix: String,
}

impl RunnerConfig {
    /// Validate a configured ceiling. Negative values are rejected.
    pub fn new(max_concurrency: i64, log_prefix: impl Into<String>) -> Result<Self> {
        let max_concurrency = usize::try_from(max_concurrency).map_err(|_| {
            RegIndexError::config(format!(
                "max_concurrency must be >= 0 (0 = unlimited), got {max_concurrency}"
            ))
        })?;

        Ok(Self {
            max_concurrency,
            log_prefix: normalize_prefix(log_prefix.into()),
        })
    }

    /// Whether a ceiling is in effect.
    pub fn is_bounded(&self) -> bool {
        self.max_concurrency > 0
    }
}

fn normalize_prefix(prefix: String) -> String {
    if prefix.trim().is_empty() {
        DEFAULT_LOG_PREFIX.into()
    } else {
        prefix
    }
}

impl AppConfig {
    /// Runner used by the title import driver.
    pub fn import_runner(&self) -> Result<RunnerConfig> {
        RunnerConfig::new(self.runner.import_concurrency, "Title Import")
    }

    /// Runner used by the structure parsing driver.
    pub fn structure_runner(&self) -> Result<RunnerConfig> {
        RunnerConfig::new(self.runner.structure_concurrency, "Structure Parser")
    }

    /// Runner used by the metrics driver.
    pub fn metrics_runner(&self) -> Result<RunnerConfig> {
        RunnerConfig::new(self.runner.metrics_concurrency, "Title Metrics")
    }

    /// Runner used to import the dated versions of one snapshot date.
    pub fn version_import_runner(&self, version_date: &str) -> Result<RunnerConfig> {
        RunnerConfig::new(
            self.runner.import_concurrency,
            format!("Historical Import ({version_date})"),
        )
    }

    /// Runner used by the change tracking driver.
    pub fn changes_runner(&self) -> Result<RunnerConfig> {
        RunnerConfig::new(self.runner.changes_concurrency, "Change Tracking")
    }

    /// Resolved database path with `~` expanded.
    pub fn database_path(&self) -> Result<PathBuf> {
        expand_home(&self.defaults.database_path)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.regindex/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| RegIndexError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.regindex/regindex.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RegIndexError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        RegIndexError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RegIndexError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RegIndexError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RegIndexError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject configurations that cannot be turned into runners.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    config.import_runner()?;
    config.structure_runner()?;
    config.metrics_runner()?;
    config.changes_runner()?;
    if config.defaults.database_path.trim().is_empty() {
        return Err(RegIndexError::config("defaults.database_path must not be empty"));
    }
    Ok(())
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| RegIndexError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}
