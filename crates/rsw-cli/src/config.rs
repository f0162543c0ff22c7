//! Configuration loading and management.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use rsw_core::{DEFAULT_MINIMUM_SESSION_SECS, DEFAULT_TRANSITION_WINDOW_SECS, EngineSettings};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,

    /// Seconds a fresh session stays locked; 0 disables the lock.
    pub minimum_session_secs: u32,

    /// Seconds a switch stays cancellable; 0 makes switches immediate.
    pub transition_window_secs: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("rsw.db"),
            minimum_session_secs: DEFAULT_MINIMUM_SESSION_SECS,
            transition_window_secs: DEFAULT_TRANSITION_WINDOW_SECS,
        }
    }
}

impl Config {
    /// Loads configuration from default locations.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(None)
    }

    /// Loads configuration, optionally from a specific file.
    ///
    /// Layering, later entries winning: serialized defaults, then
    /// `<config dir>/rsw/config.toml`, then `config_path` when given,
    /// then `RSW_*` environment variables.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("RSW_"));

        figment.extract()
    }

    /// The engine settings this configuration carries.
    #[must_use]
    pub const fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            minimum_session_secs: self.minimum_session_secs,
            transition_window_secs: self.transition_window_secs,
        }
    }
}

/// Returns the platform-specific config directory for rsw.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("rsw"))
}

/// Returns the platform-specific data directory for rsw.
///
/// On Linux: `~/.local/share/rsw`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("rsw"))
}
