//! User preferences loaded from `config.toml`.
//!
//! A missing file yields defaults. A malformed file is an error so the caller
//! can decide whether to fall back (the daemon does, with a warning).

use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, TallyError};

pub const DEFAULT_TIMER_MINUTES: u32 = 25;
pub const MAX_TIMER_MINUTES: u32 = 999;
/// Largest `timer.max_minutes` whose length in seconds still fits a `u32`.
pub const TIMER_MINUTES_CEILING: u32 = u32::MAX / 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    pub timer: TimerConfig,
    pub notifications: NotificationConfig,
    pub recovery: RecoveryConfig,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            timer: TimerConfig::default(),
            notifications: NotificationConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub default_minutes: u32,
    pub max_minutes: u32,
    pub tick_interval_ms: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            default_minutes: DEFAULT_TIMER_MINUTES,
            max_minutes: MAX_TIMER_MINUTES,
            tick_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Log and report sessions left running by a previous process.
    #[default]
    Report,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub policy: RecoveryPolicy,
}

/// Loads configuration from `path`, returning defaults if the file doesn't exist.
pub fn load_config(path: &Path) -> Result<TallyConfig> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(TallyConfig::default())
        }
        Err(source) => {
            return Err(TallyError::Io {
                context: format!("reading {}", path.display()),
                source,
            })
        }
    };

    let config: TallyConfig = toml::from_str(&content).map_err(|err| TallyError::Config {
        path: path.to_path_buf(),
        details: err.to_string(),
    })?;
    normalize(config, path)
}

fn normalize(mut config: TallyConfig, path: &Path) -> Result<TallyConfig> {
    if config.timer.max_minutes == 0 {
        return Err(TallyError::Config {
            path: path.to_path_buf(),
            details: "timer.max_minutes must be at least 1".to_string(),
        });
    }
    config.timer.max_minutes = config.timer.max_minutes.min(TIMER_MINUTES_CEILING);
    config.timer.default_minutes = config
        .timer
        .default_minutes
        .clamp(1, config.timer.max_minutes);
    config.timer.tick_interval_ms = config.timer.tick_interval_ms.max(10);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_config(&temp_dir.path().join("config.toml")).expect("load");
        assert_eq!(config, TallyConfig::default());
        assert_eq!(config.timer.default_minutes, 25);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[timer]\ndefault_minutes = 50\n").expect("write");

        let config = load_config(&path).expect("load");
        assert_eq!(config.timer.default_minutes, 50);
        assert_eq!(config.timer.tick_interval_ms, 1000);
        assert!(config.notifications.enabled);
    }

    #[test]
    fn default_minutes_clamped_to_max() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[timer]\ndefault_minutes = 5000\nmax_minutes = 120\n")
            .expect("write");

        let config = load_config(&path).expect("load");
        assert_eq!(config.timer.default_minutes, 120);
    }

    #[test]
    fn oversized_max_minutes_is_capped() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[timer]\nmax_minutes = 100000000\n").expect("write");

        let config = load_config(&path).expect("load");
        assert_eq!(config.timer.max_minutes, TIMER_MINUTES_CEILING);
    }

    #[test]
    fn malformed_file_is_config_error() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[timer\n").expect("write");

        let err = load_config(&path).expect_err("should fail");
        assert!(matches!(err, TallyError::Config { .. }));
    }
}
