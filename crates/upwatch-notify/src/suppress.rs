//! The persisted suppression window ("ignore for N days").
//!
//! One small plain-text file holding a single integer: the epoch-seconds
//! expiry. Absence means not suppressed; a past timestamp behaves exactly
//! like absence. The file is written only by an explicit user action and
//! removed only by the "receive notifications" action - expiry is purely a
//! timestamp comparison at read time.
//!
//! Reads and writes are unsynchronized. The only race is a user action
//! landing inside a read, and either outcome (old or new window) is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

/// The user-facing suppression durations, in listing order. Zero days is
/// the "receive notifications" action (clear).
pub const IGNORE_DAYS: [u64; 4] = [1, 7, 15, 30];

const SECS_PER_DAY: u64 = 24 * 3600;

/// Handle to the suppression window file.
#[derive(Debug, Clone)]
pub struct SuppressionFile {
    path: PathBuf,
}

impl SuppressionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `now + days` as the new expiry and returns it.
    pub fn set_days(&self, days: u64) -> Result<i64, SuppressError> {
        self.set(Duration::from_secs(days * SECS_PER_DAY))
    }

    /// Writes `now + duration` as the new expiry and returns it.
    pub fn set(&self, duration: Duration) -> Result<i64, SuppressError> {
        let expiry = Utc::now().timestamp() + duration.as_secs() as i64;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SuppressError::Io {
                path: self.path.clone(),
                error: e.to_string(),
            })?;
        }

        std::fs::write(&self.path, format!("{expiry}\n")).map_err(|e| SuppressError::Io {
            path: self.path.clone(),
            error: e.to_string(),
        })?;

        debug!(path = %self.path.display(), expiry, "Suppression window set");
        Ok(expiry)
    }

    /// Removes the window file. A missing file is not an error.
    pub fn clear(&self) -> Result<(), SuppressError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Suppression window cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SuppressError::Io {
                path: self.path.clone(),
                error: e.to_string(),
            }),
        }
    }

    /// True while a window with a future expiry exists.
    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now().timestamp())
    }

    /// Timestamp-injected variant of [`is_active`](Self::is_active).
    ///
    /// A missing, unreadable, or unparseable file counts as no window.
    pub fn is_active_at(&self, now: i64) -> bool {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(_) => return false,
        };

        match contents.trim().parse::<i64>() {
            Ok(expiry) => now < expiry,
            Err(_) => {
                warn!(
                    path = %self.path.display(),
                    "Suppression file is unparseable, treating as absent"
                );
                false
            }
        }
    }
}

/// Errors writing or clearing the suppression window.
#[derive(Debug, thiserror::Error)]
pub enum SuppressError {
    #[error("suppression file {path}: {error}")]
    Io { path: PathBuf, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file() -> (tempfile::TempDir, SuppressionFile) {
        let dir = tempfile::tempdir().unwrap();
        let file = SuppressionFile::new(dir.path().join("ignore"));
        (dir, file)
    }

    #[test]
    fn test_absent_file_is_inactive() {
        let (_dir, file) = temp_file();
        assert!(!file.is_active());
    }

    #[test]
    fn test_future_expiry_is_active() {
        let (_dir, file) = temp_file();
        let expiry = file.set_days(7).unwrap();
        assert!(file.is_active());
        assert!(file.is_active_at(expiry - 1));
    }

    #[test]
    fn test_past_expiry_behaves_like_absent() {
        let (_dir, file) = temp_file();
        let expiry = file.set_days(1).unwrap();
        assert!(!file.is_active_at(expiry));
        assert!(!file.is_active_at(expiry + 1));
    }

    #[test]
    fn test_garbage_contents_are_inactive() {
        let (_dir, file) = temp_file();
        std::fs::write(file.path(), "next tuesday").unwrap();
        assert!(!file.is_active());
    }

    #[test]
    fn test_clear_removes_the_window() {
        let (_dir, file) = temp_file();
        file.set_days(30).unwrap();
        assert!(file.is_active());

        file.clear().unwrap();
        assert!(!file.is_active());
        assert!(!file.path().exists());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let (_dir, file) = temp_file();
        file.clear().unwrap();
        file.clear().unwrap();
    }

    #[test]
    fn test_duration_listing_order() {
        assert_eq!(IGNORE_DAYS, [1, 7, 15, 30]);
    }

    #[test]
    fn test_set_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let file = SuppressionFile::new(dir.path().join("nested/dir/ignore"));
        file.set_days(1).unwrap();
        assert!(file.path().exists());
    }
}
