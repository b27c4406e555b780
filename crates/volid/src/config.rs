//! Resolver configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config:
//!
//! ```toml
//! refresh_throttle = "1s"
//! watch_for_changes = true
//! watch_interval = "2s"
//! command_timeout = "1s"
//! fallback_parent = "/Volumes"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Minimum time between two unforced mount table enumerations.
pub const DEFAULT_REFRESH_THROTTLE: Duration = Duration::from_millis(1000);

/// How often the mount watcher re-checks the table when it has to poll.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(2);

/// Upper bound for helper commands such as `diskutil`.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);

/// Parent directory of the placeholder returned when a volume root can't be found.
pub const DEFAULT_FALLBACK_PARENT: &str = "/Volumes";

/// Tunables for [`MountTable`](crate::MountTable) and
/// [`VolumeResolver`](crate::VolumeResolver).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VolumeConfig {
    /// Unforced refreshes within this window return the cached snapshot.
    #[serde(with = "humantime_serde")]
    pub refresh_throttle: Duration,
    /// Start a background watcher that invalidates the cache on mount/unmount.
    pub watch_for_changes: bool,
    /// Poll interval of the watcher.
    #[serde(with = "humantime_serde")]
    pub watch_interval: Duration,
    /// Timeout for external helper commands.
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Parent of the synthetic path returned when climbing finds no volume.
    pub fallback_parent: PathBuf,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            refresh_throttle: DEFAULT_REFRESH_THROTTLE,
            watch_for_changes: true,
            watch_interval: DEFAULT_WATCH_INTERVAL,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            fallback_parent: PathBuf::from(DEFAULT_FALLBACK_PARENT),
        }
    }
}

/// Errors loading a [`VolumeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        /// Path of the config file
        path: PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl VolumeConfig {
    /// Parse a config from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents)?;
        tracing::debug!("Loaded volume config from {}", path.display());
        Ok(config)
    }

    /// Config for tests and embedders that drive invalidation themselves.
    pub fn without_watcher() -> Self {
        Self {
            watch_for_changes: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_document_is_default() {
        let config = VolumeConfig::from_toml_str("").unwrap();
        assert_eq!(config, VolumeConfig::default());
        assert_eq!(config.refresh_throttle, Duration::from_millis(1000));
    }

    #[test]
    fn test_humantime_durations() {
        let config = VolumeConfig::from_toml_str(
            r#"
            refresh_throttle = "250ms"
            watch_interval = "5s"
            watch_for_changes = false
            "#,
        )
        .unwrap();

        assert_eq!(config.refresh_throttle, Duration::from_millis(250));
        assert_eq!(config.watch_interval, Duration::from_secs(5));
        assert!(!config.watch_for_changes);
        assert_eq!(config.fallback_parent, PathBuf::from("/Volumes"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = VolumeConfig::from_toml_str("refresh_every = \"1s\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let err = VolumeConfig::load(&temp.path().join("volid.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("volid.toml");
        std::fs::write(&path, "fallback_parent = \"/mnt\"\n").unwrap();

        let config = VolumeConfig::load(&path).unwrap();
        assert_eq!(config.fallback_parent, PathBuf::from("/mnt"));
    }
}
