//! Runtime configuration.
//!
//! Configuration is an explicit value handed to constructors; there is no
//! global state. Layers are applied in order: defaults, optional JSON file,
//! `SHROUD_*` environment variables, then CLI flags (applied by the binary).
//!
//! Supported env vars:
//! - `SHROUD_STORAGE_DIR`
//! - `SHROUD_DUMP_JOBS`, `SHROUD_RESTORE_JOBS`
//! - `SHROUD_RESTORE_IN_ORDER`
//! - `SHROUD_RESTORE_DEPENDENCY_POLL_INTERVAL`
//! - `SHROUD_HEARTBEAT_INTERVAL`, `SHROUD_HEARTBEAT_STALE_AFTER`,
//!   `SHROUD_HEARTBEAT_WRITE_TIMEOUT`
//! - `SHROUD_LOG_FORMAT` (`pretty` or `json`)
//!
//! Durations use humantime syntax (`15m`, `500ms`, `2h 30m`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::observability::LogFormat;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where dumps are stored.
    pub storage: StorageConfig,
    /// Dump execution.
    pub dump: DumpConfig,
    /// Restore execution.
    pub restore: RestoreConfig,
    /// Heartbeat timing.
    pub heartbeat: HeartbeatConfig,
    /// Logging.
    pub log: LogConfig,
}

/// Storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding one sub-directory per dump.
    pub directory: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
        }
    }
}

/// Dump execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    /// Number of parallel dump workers.
    pub jobs: usize,
    /// Free-form description stored in metadata.
    pub description: String,
    /// Tags stored in metadata.
    pub tags: Vec<String>,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            description: String::new(),
            tags: Vec::new(),
        }
    }
}

/// Restore execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Number of parallel restore workers.
    pub jobs: usize,
    /// Dispatch tasks in dependency order.
    pub in_order: bool,
    /// How often the ordered producer re-checks pending dependencies.
    #[serde(with = "humantime_serde")]
    pub dependency_poll_interval: Duration,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            jobs: 1,
            in_order: false,
            dependency_poll_interval: Duration::from_millis(500),
        }
    }
}

/// Heartbeat timing.
///
/// `interval` and `stale_after` are independent: readers only see the
/// threshold, writers only the interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// How often a running dump refreshes its heartbeat.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Age after which an `in-progress` heartbeat reads as failed.
    #[serde(with = "humantime_serde")]
    pub stale_after: Duration,
    /// Upper bound on a single heartbeat write.
    #[serde(with = "humantime_serde")]
    pub write_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            stale_after: Duration::from_secs(15 * 60),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Output format.
    pub format: LogFormat,
}

impl Config {
    /// Loads defaults overridden by environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a variable is set but malformed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Loads a JSON config file, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file cannot be read or parsed, or a
    /// variable is malformed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read(path)
                    .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
                serde_json::from_slice(&raw)
                    .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Applies `SHROUD_*` environment overrides in place.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a variable is set but malformed.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(dir) = env_string("SHROUD_STORAGE_DIR") {
            self.storage.directory = PathBuf::from(dir);
        }
        if let Some(jobs) = env_usize("SHROUD_DUMP_JOBS")? {
            self.dump.jobs = jobs;
        }
        if let Some(jobs) = env_usize("SHROUD_RESTORE_JOBS")? {
            self.restore.jobs = jobs;
        }
        if let Some(in_order) = env_bool("SHROUD_RESTORE_IN_ORDER")? {
            self.restore.in_order = in_order;
        }
        if let Some(d) = env_duration("SHROUD_RESTORE_DEPENDENCY_POLL_INTERVAL")? {
            self.restore.dependency_poll_interval = d;
        }
        if let Some(d) = env_duration("SHROUD_HEARTBEAT_INTERVAL")? {
            self.heartbeat.interval = d;
        }
        if let Some(d) = env_duration("SHROUD_HEARTBEAT_STALE_AFTER")? {
            self.heartbeat.stale_after = d;
        }
        if let Some(d) = env_duration("SHROUD_HEARTBEAT_WRITE_TIMEOUT")? {
            self.heartbeat.write_timeout = d;
        }
        if let Some(format) = env_string("SHROUD_LOG_FORMAT") {
            self.log.format = format.parse()?;
        }
        Ok(())
    }

    /// Normalizes and checks the configuration before any work starts.
    ///
    /// A job count of zero is treated as one. Zero durations are rejected.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for unusable values.
    pub fn validate(&mut self) -> Result<()> {
        for (name, jobs) in [
            ("dump.jobs", &mut self.dump.jobs),
            ("restore.jobs", &mut self.restore.jobs),
        ] {
            if *jobs == 0 {
                tracing::warn!(setting = name, "job count must be positive; using 1");
                *jobs = 1;
            }
        }

        for (name, value) in [
            ("heartbeat.interval", self.heartbeat.interval),
            ("heartbeat.stale_after", self.heartbeat.stale_after),
            ("heartbeat.write_timeout", self.heartbeat.write_timeout),
            (
                "restore.dependency_poll_interval",
                self.restore.dependency_poll_interval,
            ),
        ] {
            if value.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }

        if self.heartbeat.stale_after <= self.heartbeat.interval {
            tracing::warn!(
                interval = ?self.heartbeat.interval,
                stale_after = ?self.heartbeat.stale_after,
                "heartbeat staleness threshold does not exceed the write interval; \
                 running dumps may be reported as failed"
            );
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::Config(format!("{name} must be a non-negative integer: {e}")))
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(Some(true)),
        "false" | "0" | "no" | "n" => Ok(Some(false)),
        _ => Err(Error::Config(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn env_duration(name: &str) -> Result<Option<Duration>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    humantime::parse_duration(&v)
        .map(Some)
        .map_err(|e| Error::Config(format!("{name} must be a duration (e.g. 15m): {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.dump.jobs, 1);
        assert_eq!(config.restore.jobs, 1);
        assert_eq!(config.heartbeat.interval, Duration::from_secs(900));
        assert_eq!(config.heartbeat.stale_after, Duration::from_secs(900));
        assert_eq!(config.heartbeat.write_timeout, Duration::from_secs(5));
        assert_eq!(
            config.restore.dependency_poll_interval,
            Duration::from_millis(500)
        );
    }

    #[test]
    fn validate_clamps_zero_jobs() {
        let mut config = Config::default();
        config.dump.jobs = 0;
        config.restore.jobs = 0;
        config.validate().expect("valid");
        assert_eq!(config.dump.jobs, 1);
        assert_eq!(config.restore.jobs, 1);
    }

    #[test]
    fn validate_rejects_zero_durations() {
        let mut config = Config::default();
        config.heartbeat.write_timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn json_uses_humantime_durations() {
        let raw = r#"{
            "dump": { "jobs": 4 },
            "heartbeat": { "interval": "1m", "stale_after": "5m" },
            "restore": { "in_order": true, "dependency_poll_interval": "100ms" }
        }"#;
        let config: Config = serde_json::from_str(raw).expect("parse");
        assert_eq!(config.dump.jobs, 4);
        assert_eq!(config.heartbeat.interval, Duration::from_secs(60));
        assert_eq!(config.heartbeat.stale_after, Duration::from_secs(300));
        assert_eq!(config.heartbeat.write_timeout, Duration::from_secs(5));
        assert!(config.restore.in_order);
        assert_eq!(
            config.restore.dependency_poll_interval,
            Duration::from_millis(100)
        );
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shroud.json");
        std::fs::write(&path, r#"{ "storage": { "directory": "/var/dumps" } }"#).expect("write");
        let config = Config::load(Some(&path)).expect("load");
        assert_eq!(config.storage.directory, PathBuf::from("/var/dumps"));

        std::fs::write(&path, "not json").expect("write");
        assert!(matches!(Config::load(Some(&path)), Err(Error::Config(_))));
    }
}
