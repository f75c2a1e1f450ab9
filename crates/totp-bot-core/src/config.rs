//! Configuration and settings management
//!
//! Settings are layered from optional files under `config/` and the
//! environment, so the same binary runs with a `.env` file or a mounted config.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Default location of the SQLite database file
pub const DEFAULT_DATABASE_FILE: &str = "totp-bot.db";
/// Drafts idle for longer than this are treated as abandoned (10 minutes)
pub const DEFAULT_DRAFT_TTL_SECS: u64 = 600;
/// Interval between background sweeps of stale drafts and handles (1 hour)
pub const DEFAULT_PURGE_INTERVAL_SECS: u64 = 3600;
/// Editable-message handles older than this are purged by the sweep (1 day)
pub const HANDLE_MAX_AGE_SECS: i64 = 86_400;
/// Project page shown in help and privacy messages
pub const DEFAULT_PROJECT_URL: &str = "https://github.com/0FL01/telegram-totp-bot";

/// Build the layered configuration source shared by all settings structs.
///
/// # Errors
///
/// Returns a `ConfigError` if a present source cannot be read.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Local overrides, never checked in
        .add_source(File::with_name("config/local").required(false))
        // `APP__DRAFT_TTL_SECS=60` style overrides
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Bare UPPER_SNAKE_CASE variables map to snake_case keys
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

/// Settings consumed by the core (storage, dialog expiry, texts)
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CoreSettings {
    /// Path of the SQLite database file
    #[serde(default = "default_database_file_location")]
    pub database_file_location: String,

    /// Seconds after which an idle creation dialog is dropped; `0` keeps drafts forever
    #[serde(default = "default_draft_ttl_secs")]
    pub draft_ttl_secs: u64,

    /// Seconds between background purges; `0` disables the sweep
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,

    /// Project page linked from help and privacy texts
    #[serde(default = "default_project_url")]
    pub project_url: String,
}

fn default_database_file_location() -> String {
    DEFAULT_DATABASE_FILE.to_string()
}

const fn default_draft_ttl_secs() -> u64 {
    DEFAULT_DRAFT_TTL_SECS
}

const fn default_purge_interval_secs() -> u64 {
    DEFAULT_PURGE_INTERVAL_SECS
}

fn default_project_url() -> String {
    DEFAULT_PROJECT_URL.to_string()
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            database_file_location: default_database_file_location(),
            draft_ttl_secs: DEFAULT_DRAFT_TTL_SECS,
            purge_interval_secs: DEFAULT_PURGE_INTERVAL_SECS,
            project_url: default_project_url(),
        }
    }
}

impl CoreSettings {
    /// Load core settings from files and environment.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use totp_bot_core::config::CoreSettings;
    ///
    /// let settings = CoreSettings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }
}
