//! Configuration management for panda.
//!
//! Loads configuration from ${PANDA_HOME}/config.toml with sensible defaults.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::provider::Domain;
use crate::window::PopupGeometry;

pub mod paths {
    //! Path resolution for panda configuration and data directories.
    //!
    //! PANDA_HOME resolution order:
    //! 1. PANDA_HOME environment variable (if set)
    //! 2. ~/.config/panda (default)

    use std::path::PathBuf;

    /// Returns the panda home directory.
    ///
    /// Checks PANDA_HOME env var first, falls back to ~/.config/panda, then to
    /// a relative `.panda` directory when no home directory is known.
    pub fn panda_home() -> PathBuf {
        if let Ok(home) = std::env::var("PANDA_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir().map_or_else(
            || PathBuf::from(".panda"),
            |h| h.join(".config").join("panda"),
        )
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        panda_home().join("config.toml")
    }

    /// Returns the path to the persisted session file.
    pub fn session_path() -> PathBuf {
        panda_home().join("session.json")
    }

    /// Returns the directory for log files.
    pub fn logs_dir() -> PathBuf {
        panda_home().join("logs")
    }
}

/// Returns the default configuration template.
///
/// This is embedded from default_config.toml at compile time.
fn default_config_template() -> &'static str {
    include_str!("../default_config.toml")
}

/// Identity provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Default domain for sign-in.
    pub domain: Domain,
    /// Target a local replica instead of the public provider.
    pub local: bool,
    /// Identity provider canister on the local replica.
    pub canister_id: Option<String>,
    pub local_port: u16,
    pub max_time_to_live_secs: u64,
    /// Login wait timeout in seconds (0 disables)
    pub login_timeout_secs: u64,
    /// Loopback callback port (0 lets the OS pick)
    pub callback_port: u16,
}

impl IdentityConfig {
    const DEFAULT_LOCAL_PORT: u16 = 4943;
    /// 7 days.
    const DEFAULT_MAX_TIME_TO_LIVE_SECS: u64 = 7 * 24 * 60 * 60;
    const DEFAULT_LOGIN_TIMEOUT_SECS: u64 = 120;

    /// Delegation lifetime in nanoseconds.
    pub fn max_time_to_live_nanos(&self) -> u64 {
        self.max_time_to_live_secs.saturating_mul(1_000_000_000)
    }

    /// Returns the login timeout, or None if disabled (0).
    pub fn login_timeout(&self) -> Option<Duration> {
        if self.login_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.login_timeout_secs))
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            domain: Domain::default(),
            local: false,
            canister_id: None,
            local_port: Self::DEFAULT_LOCAL_PORT,
            max_time_to_live_secs: Self::DEFAULT_MAX_TIME_TO_LIVE_SECS,
            login_timeout_secs: Self::DEFAULT_LOGIN_TIMEOUT_SECS,
            callback_port: 0,
        }
    }
}

/// Popup window settings for the sign-in flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopupConfig {
    pub width: u32,
    pub height: u32,
    /// Screen size the popup is centered on.
    pub screen_width: u32,
    pub screen_height: u32,
}

impl PopupConfig {
    pub fn geometry(&self) -> PopupGeometry {
        PopupGeometry {
            width: self.width,
            height: self.height,
        }
    }
}

impl Default for PopupConfig {
    fn default() -> Self {
        let geometry = PopupGeometry::default();
        Self {
            width: geometry.width,
            height: geometry.height,
            screen_width: 1920,
            screen_height: 1080,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub popup: PopupConfig,
}

impl Config {
    /// Loads configuration from the default config path.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path.
    /// Returns defaults if file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Creates a default config file at the given path.
    /// Returns an error if the file already exists.
    ///
    /// # Errors
    /// Returns an error if the file exists or cannot be written.
    pub fn init(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Config file already exists at {}", path.display());
        }

        Self::write_config(path, default_config_template())
    }

    /// Writes config content to a file, creating parent directories as needed.
    /// Uses atomic write (temp file + rename) to prevent corruption.
    fn write_config(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("nonexistent.toml");

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.identity.domain, Domain::Ic0App);
        assert!(!config.identity.local);
        assert_eq!(config.identity.max_time_to_live_secs, 604_800);
        assert_eq!(config.popup.width, 576);
        assert_eq!(config.popup.height, 625);
    }

    #[test]
    fn test_load_partial_config_merges_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        fs::write(
            &config_path,
            "[identity]\ndomain = \"internetcomputer.org\"\n",
        )
        .unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.identity.domain, Domain::InternetComputerOrg);
        assert_eq!(config.identity.login_timeout_secs, 120);
        assert_eq!(config.popup.height, 625);
    }

    #[test]
    fn test_load_invalid_domain_fails() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, "[identity]\ndomain = \"example.com\"\n").unwrap();

        assert!(Config::load_from(&config_path).is_err());
    }

    #[test]
    fn test_init_creates_config_with_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("subdir").join("config.toml");

        Config::init(&config_path).unwrap();

        assert!(config_path.exists());
        let contents = fs::read_to_string(&config_path).unwrap();
        assert!(contents.contains("domain = \"ic0.app\""));
        assert!(contents.contains("# canister_id ="));

        // The template itself must parse back into the defaults.
        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.identity.max_time_to_live_secs, 604_800);
        assert_eq!(config.popup.screen_width, 1920);
    }

    #[test]
    fn test_init_fails_if_exists() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.toml");

        fs::write(&config_path, "").unwrap();

        let result = Config::init(&config_path);
        assert!(result.is_err());
    }

    #[test]
    fn test_max_time_to_live_is_seven_days_in_nanos() {
        let config = IdentityConfig::default();
        assert_eq!(config.max_time_to_live_nanos(), 604_800_000_000_000);
    }

    #[test]
    fn test_login_timeout_zero_disables() {
        let config = IdentityConfig {
            login_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.login_timeout(), None);
    }
}
