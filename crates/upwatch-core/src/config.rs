//! Configuration shared by the daemon and the listener.
//!
//! A single immutable `Config` value is constructed at process startup and
//! passed into the scheduler and the listener. Values come from an optional
//! TOML file, each field defaulting individually, with an environment
//! override for the socket path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Environment variable overriding the bus socket path.
pub const SOCKET_ENV: &str = "UPWATCH_SOCKET";

/// Default bus socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/upwatch.sock";

/// Default connectivity endpoint. An invalid configured URL silently falls
/// back to this value.
pub const DEFAULT_CONNECTIVITY_URL: &str = "https://gentoo.org";

const DEFAULT_CHECK_INTERVAL_SECS: u64 = 6 * 3600;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30 * 60;
const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_STARTUP_QUERY_DELAY_SECS: u64 = 15 * 60;
const DEFAULT_CONNECTIVITY_TIMEOUT_SECS: u64 = 5;

/// Immutable runtime configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Path to the Unix socket the daemon listens on.
    pub socket_path: PathBuf,

    /// Seconds between periodic status checks. The interval is measured
    /// from the completion of one run to the start of the next.
    pub check_interval_secs: u64,

    /// Seconds between heartbeat broadcasts.
    pub heartbeat_interval_secs: u64,

    /// Listener-side: seconds without any broadcast before a liveness
    /// failure is surfaced.
    pub heartbeat_timeout_secs: u64,

    /// Listener-side: seconds to wait after startup before querying the
    /// daemon for the current status.
    pub startup_query_delay_secs: u64,

    /// Endpoint used by the connectivity probe.
    pub connectivity_url: String,

    /// Timeout for the connectivity probe.
    pub connectivity_timeout_secs: u64,

    /// File holding the suppression window expiry (epoch seconds).
    pub suppress_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let suppress_file = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("upwatch")
            .join("ignore");

        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            heartbeat_timeout_secs: DEFAULT_HEARTBEAT_TIMEOUT_SECS,
            startup_query_delay_secs: DEFAULT_STARTUP_QUERY_DELAY_SECS,
            connectivity_url: DEFAULT_CONNECTIVITY_URL.to_string(),
            connectivity_timeout_secs: DEFAULT_CONNECTIVITY_TIMEOUT_SECS,
            suppress_file,
        }
    }
}

impl Config {
    /// Default location of the configuration file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("upwatch")
            .join("config.toml")
    }

    /// Loads configuration from the default location, then applies the
    /// `UPWATCH_SOCKET` environment override.
    ///
    /// A missing file yields the defaults; an unreadable or malformed file
    /// is an error so a typo never silently reverts the daemon to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(Self::default_path())?;
        if let Ok(socket) = std::env::var(SOCKET_ENV) {
            config.socket_path = PathBuf::from(socket);
        }
        Ok(config)
    }

    /// Loads configuration from an explicit path; missing file = defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Interval between periodic status checks.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Interval between heartbeat broadcasts.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Listener deadline for declaring the daemon silent.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Listener delay before the late-join status query.
    pub fn startup_query_delay(&self) -> Duration {
        Duration::from_secs(self.startup_query_delay_secs)
    }

    /// Connectivity probe timeout.
    pub fn connectivity_timeout(&self) -> Duration {
        Duration::from_secs(self.connectivity_timeout_secs)
    }
}

/// Errors loading the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("failed to parse config {path}: {error}")]
    Parse { path: PathBuf, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert_eq!(config.check_interval(), Duration::from_secs(21_600));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(1_800));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(3_600));
        assert_eq!(config.startup_query_delay(), Duration::from_secs(900));
        assert_eq!(config.connectivity_url, DEFAULT_CONNECTIVITY_URL);
        assert_eq!(config.connectivity_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.check_interval_secs, Config::default().check_interval_secs);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "check_interval_secs = 60").unwrap();
        writeln!(file, "connectivity_url = \"https://example.org\"").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.check_interval_secs, 60);
        assert_eq!(config.connectivity_url, "https://example.org");
        assert_eq!(
            config.heartbeat_interval_secs,
            Config::default().heartbeat_interval_secs
        );
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "check_interval_secs = \"soon\"").unwrap();

        let err = Config::load_from(&path);
        assert!(matches!(err, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_unknown_key_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "check_intervall_secs = 60").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
