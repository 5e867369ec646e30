//! Process-wide configuration, loaded once from `vmprobe.toml`.
//!
//! Loading order: TOML file, then `VMPROBE_*` environment overrides, then
//! validation. Missing sections fall back to their `Default`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("config parse failed: {0}")]
    Parse(String),

    /// A value is out of its accepted range.
    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ProbeConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub inspector: InspectorConfig,
}

/// Logging, listener and filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` wins when set.
    pub log_level: String,
    /// `pretty` or `json`.
    pub log_format: String,
    pub listen_addr: String,
    pub manifest_path: PathBuf,
    /// Parent of every per-VM scan directory.
    pub work_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
            listen_addr: "127.0.0.1:8080".to_owned(),
            manifest_path: PathBuf::from("/data/manifest.json"),
            work_dir: PathBuf::from("/tmp"),
        }
    }
}

/// Block export worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Path to the `nbdkit` binary.
    pub binary: PathBuf,
    /// nbdkit plugin used to read hypervisor disks.
    pub plugin: String,
    /// VDDK distribution directory (`libdir=` and `LD_LIBRARY_PATH`).
    pub vddk_libdir: PathBuf,
    /// How many times the socket is checked before giving up.
    pub ready_attempts: u32,
    /// Delay between two socket checks, in milliseconds.
    pub ready_interval_ms: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("/usr/sbin/nbdkit"),
            plugin: "vddk".to_owned(),
            vddk_libdir: PathBuf::from("/opt/vmware-vix-disklib-distrib"),
            ready_attempts: 10,
            ready_interval_ms: 1000,
        }
    }
}

impl ExportConfig {
    /// Delay between two readiness checks.
    #[must_use]
    pub fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }
}

/// Guest inspection engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    pub guestfish_binary: PathBuf,
    /// libguestfs backend (`LIBGUESTFS_BACKEND`).
    pub backend: String,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self { guestfish_binary: PathBuf::from("guestfish"), backend: "direct".to_owned() }
    }
}

impl ProbeConfig {
    /// Loads the file, applies environment overrides and validates.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file is unreadable, malformed or invalid.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read { path: path.to_owned(), source })?;
        let mut config = Self::parse(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML string without overrides or validation.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] on invalid TOML.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Applies `VMPROBE_*` environment variables on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("VMPROBE_LOG_LEVEL") {
            self.general.log_level = v;
        }
        if let Some(v) = lookup("VMPROBE_LOG_FORMAT") {
            self.general.log_format = v;
        }
        if let Some(v) = lookup("VMPROBE_LISTEN_ADDR") {
            self.general.listen_addr = v;
        }
        if let Some(v) = lookup("VMPROBE_MANIFEST_PATH") {
            self.general.manifest_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("VMPROBE_WORK_DIR") {
            self.general.work_dir = PathBuf::from(v);
        }
    }

    /// Checks value ranges.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.general.log_format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Invalid {
                field: "general.log_format",
                reason: format!("'{}' is not 'pretty' or 'json'", self.general.log_format),
            });
        }
        if !self.general.work_dir.is_absolute() {
            return Err(ConfigError::Invalid {
                field: "general.work_dir",
                reason: "must be an absolute path".to_owned(),
            });
        }
        // Socket paths reach guestfish inside a space-separated server list.
        if self.general.work_dir.to_string_lossy().contains(char::is_whitespace) {
            return Err(ConfigError::Invalid {
                field: "general.work_dir",
                reason: "must not contain whitespace".to_owned(),
            });
        }
        if self.export.ready_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "export.ready_attempts",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.export.ready_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "export.ready_interval_ms",
                reason: "must be at least 1".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn empty_file_yields_reference_defaults() {
        let config = match ProbeConfig::parse("") {
            Ok(c) => c,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(config.export.ready_attempts, 10);
        assert_eq!(config.export.ready_interval(), Duration::from_secs(1));
        assert_eq!(config.general.manifest_path, PathBuf::from("/data/manifest.json"));
        assert_eq!(config.inspector.backend, "direct");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = match ProbeConfig::parse("[export]\nready_attempts = 30\n") {
            Ok(c) => c,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(config.export.ready_attempts, 30);
        assert_eq!(config.export.plugin, "vddk");
    }

    #[test]
    fn zero_attempts_is_invalid() {
        let config = match ProbeConfig::parse("[export]\nready_attempts = 0\n") {
            Ok(c) => c,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "export.ready_attempts", .. })
        ));
    }

    #[test]
    fn relative_work_dir_is_invalid() {
        let config = match ProbeConfig::parse("[general]\nwork_dir = \"scans\"\n") {
            Ok(c) => c,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn work_dir_with_spaces_is_invalid() {
        let config = match ProbeConfig::parse("[general]\nwork_dir = \"/var/lib/vm probe\"\n") {
            Ok(c) => c,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "general.work_dir", .. })
        ));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(ProbeConfig::parse("[export"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [
            ("VMPROBE_LISTEN_ADDR", "0.0.0.0:9000"),
            ("VMPROBE_WORK_DIR", "/var/lib/vmprobe"),
        ]
        .into_iter()
        .collect();
        let mut config = ProbeConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_owned()));
        assert_eq!(config.general.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.general.work_dir, PathBuf::from("/var/lib/vmprobe"));
        assert_eq!(config.general.log_level, "info", "unset variables leave values alone");
    }

    #[tokio::test]
    async fn load_missing_file_is_a_read_error() {
        let result = ProbeConfig::load("/nonexistent/vmprobe.toml").await;
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
