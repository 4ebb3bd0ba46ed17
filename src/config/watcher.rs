//! Change detection for the config file.
//!
//! The watcher only answers "did the file change, and does it still load";
//! the proxy server decides what to do with a reloaded [`Config`].

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::Config;
use crate::error::GateError;

/// Outcome of one [`ConfigWatcher::poll`].
#[derive(Debug)]
pub enum Reload {
    /// mtime is the same as last time (or the file is gone).
    Unchanged,
    /// The file changed and produced a valid config.
    Loaded(Config),
    /// The file changed but failed to parse or validate.
    Rejected(GateError),
}

/// Tracks a config file's mtime between polls.
pub struct ConfigWatcher {
    path: PathBuf,
    last_mtime: Option<SystemTime>,
}

impl ConfigWatcher {
    /// Start watching `path`; its current mtime is the baseline.
    pub fn new(path: PathBuf) -> Self {
        let last_mtime = read_mtime(&path);
        Self { path, last_mtime }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload the file if its mtime moved since the previous poll.
    ///
    /// A rejected file still advances the baseline, so the same broken
    /// contents are reported once.
    pub fn poll(&mut self) -> Reload {
        let current = read_mtime(&self.path);
        if current.is_none() || current == self.last_mtime {
            return Reload::Unchanged;
        }
        self.last_mtime = current;
        match Config::load_from_path(&self.path) {
            Ok(config) => Reload::Loaded(config),
            Err(e) => Reload::Rejected(e),
        }
    }
}

fn read_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_at(path: &Path, contents: &str, mtime: SystemTime) {
        std::fs::write(path, contents).unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(mtime).unwrap();
    }

    fn epoch_plus(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    #[test]
    fn test_unchanged_file_is_not_reloaded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        write_at(&path, "{}", epoch_plus(0));

        let mut watcher = ConfigWatcher::new(path.clone());
        assert_eq!(watcher.path(), path.as_path());
        assert!(matches!(watcher.poll(), Reload::Unchanged));
        assert!(matches!(watcher.poll(), Reload::Unchanged));
    }

    #[test]
    fn test_changed_file_is_loaded_once() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        write_at(&path, "{}", epoch_plus(0));
        let mut watcher = ConfigWatcher::new(path.clone());

        write_at(
            &path,
            r#"{"routes":[{"prefix":"/static/","cache_valid":{"200":60}}]}"#,
            epoch_plus(5),
        );
        match watcher.poll() {
            Reload::Loaded(config) => {
                assert_eq!(config.routes.len(), 1);
                assert_eq!(config.routes[0].prefix, "/static/");
            }
            other => panic!("expected a reload, got {other:?}"),
        }
        assert!(matches!(watcher.poll(), Reload::Unchanged));
    }

    #[test]
    fn test_invalid_file_is_rejected_once() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        write_at(&path, "{}", epoch_plus(0));
        let mut watcher = ConfigWatcher::new(path.clone());

        write_at(&path, r#"{"server":{"port":0}}"#, epoch_plus(5));
        assert!(matches!(watcher.poll(), Reload::Rejected(GateError::Config(_))));
        assert!(matches!(watcher.poll(), Reload::Unchanged));

        write_at(&path, "{ not json", epoch_plus(9));
        assert!(matches!(watcher.poll(), Reload::Rejected(GateError::Json(_))));
    }

    #[test]
    fn test_missing_file_is_unchanged() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("absent.json");
        let mut watcher = ConfigWatcher::new(path.clone());
        assert!(matches!(watcher.poll(), Reload::Unchanged));

        write_at(&path, "{}", epoch_plus(1));
        assert!(matches!(watcher.poll(), Reload::Loaded(_)));
    }
}
