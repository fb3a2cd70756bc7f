//! Storage configuration and path management for Tally.
//!
//! All file locations used by the daemon and the CLI are decided here so a
//! test can point everything at a temp directory with [`StorageConfig::with_root`].

use std::env;
use std::path::{Path, PathBuf};

const HOME_ENV: &str = "TALLY_HOME";

/// Central configuration for all Tally storage paths.
///
/// Production code uses [`StorageConfig::resolve`], which honors `TALLY_HOME`
/// and otherwise points to `~/.tally/`.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    /// Resolves the data root from `TALLY_HOME` or the user's home directory.
    pub fn resolve() -> Result<Self, String> {
        if let Ok(value) = env::var(HOME_ENV) {
            if !value.trim().is_empty() {
                return Ok(Self::with_root(PathBuf::from(value)));
            }
        }
        let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
        Ok(Self::with_root(home.join(".tally")))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// SQLite database holding projects, sessions and settings.
    pub fn db_file(&self) -> PathBuf {
        self.root.join("tally.db")
    }

    /// User preferences (`config.toml`).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Daemon IPC socket.
    pub fn socket_file(&self) -> PathBuf {
        self.root.join("daemon.sock")
    }

    /// Last tray menu pushed by the daemon, read by tray renderers.
    pub fn tray_file(&self) -> PathBuf {
        self.root.join("tray.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_live_under_root() {
        let storage = StorageConfig::with_root(PathBuf::from("/tmp/tally-test"));
        assert_eq!(storage.db_file(), PathBuf::from("/tmp/tally-test/tally.db"));
        assert_eq!(
            storage.socket_file(),
            PathBuf::from("/tmp/tally-test/daemon.sock")
        );
        assert_eq!(storage.tray_file(), PathBuf::from("/tmp/tally-test/tray.json"));
        assert_eq!(storage.logs_dir(), PathBuf::from("/tmp/tally-test/logs"));
    }
}
