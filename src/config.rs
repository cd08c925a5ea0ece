//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$SENDERSWEEP_CONFIG` (environment variable)
//! 2. `~/.config/sendersweep/config.toml` (Linux/macOS)
//!    `%APPDATA%\sendersweep\config.toml` (Windows)
//! 3. Built-in defaults

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "SENDERSWEEP_CONFIG";

/// Bounds for the number of messages fetched per run.
pub const MIN_FETCH: usize = 1;
pub const MAX_FETCH: usize = 500;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// How many messages a run fetches.
    pub fetch: FetchConfig,
    /// Where mail comes from.
    pub source: SourceConfig,
    /// Local archive settings.
    pub archive: ArchiveConfig,
    /// Backoff for transient source errors.
    pub retry: RetryConfig,
    /// Apply-stage tuning.
    pub apply: ApplyConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Most recent messages to fetch per run (clamped to 1..=500).
    pub max_fetch: usize,
}

/// Kind of mail source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Maildir,
    Gmail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Maildir root (the directory holding `cur/` and `new/`).
    pub maildir: Option<PathBuf>,
    /// Gmail user id; "me" is the authenticated account.
    pub gmail_user: String,
    /// Environment variable holding the OAuth access token.
    pub gmail_token_env: String,
    /// Gmail label to list from.
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Archive directory (default: `<data_dir>/sendersweep/archive`).
    pub dir: Option<PathBuf>,
    /// Write attempts per message before it is reported as failed.
    pub save_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    /// Worker threads for the apply stage.
    pub workers: usize,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { max_fetch: 10 }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Maildir,
            maildir: None,
            gmail_user: "me".to_string(),
            gmail_token_env: "SENDERSWEEP_GMAIL_TOKEN".to_string(),
            label: "INBOX".to_string(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            dir: None,
            save_attempts: 2,
        }
    }
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

impl FetchConfig {
    /// `max_fetch` clamped to the supported range.
    pub fn limit(&self) -> usize {
        clamp_fetch(self.max_fetch)
    }
}

/// Clamp a requested fetch size to `MIN_FETCH..=MAX_FETCH`.
pub fn clamp_fetch(n: usize) -> usize {
    n.clamp(MIN_FETCH, MAX_FETCH)
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<PathBuf> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(path)
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("sendersweep").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sendersweep")
}

/// Return the archive directory.
pub fn archive_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.archive.dir {
        return dir.clone();
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sendersweep")
        .join("archive")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("sendersweep.log")
}
