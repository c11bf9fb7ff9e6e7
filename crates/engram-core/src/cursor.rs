//! Resume-cursor persistence.
//!
//! Each collector instance keeps one cursor file recording the last
//! processed USN per volume. The file is JSON, written atomically
//! (temp + rename) so a crash mid-save never leaves a torn cursor, and it
//! is validated against the journal's valid range on startup: a stale
//! cursor is clamped up to the journal's first USN rather than replayed
//! against truncated history.

use crate::error::Result;
use crate::types::rfc3339;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Persisted cursor state: one entry per monitored volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorState {
    pub last_processed_usn: BTreeMap<String, i64>,
    #[serde(with = "rfc3339")]
    pub timestamp: DateTime<Utc>,
    pub collector_version: String,
    pub collector_id: Uuid,
}

impl CursorState {
    fn new(collector_id: Uuid) -> Self {
        CursorState {
            last_processed_usn: BTreeMap::new(),
            timestamp: Utc::now(),
            collector_version: env!("CARGO_PKG_VERSION").to_string(),
            collector_id,
        }
    }
}

/// A cursor file shared by the volume reader tasks of one collector.
pub struct CursorFile {
    path: PathBuf,
    state: Mutex<CursorState>,
}

impl CursorFile {
    /// Open an existing cursor file, or start fresh if absent or
    /// unreadable. A corrupt cursor is not fatal: monitoring restarts
    /// from the journal's first USN instead.
    pub fn load_or_new(path: impl Into<PathBuf>, collector_id: Uuid) -> Self {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<CursorState>(&contents) {
                Ok(state) => {
                    info!(
                        path = %path.display(),
                        volumes = state.last_processed_usn.len(),
                        "Loaded cursor state"
                    );
                    state
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cursor file corrupt, starting fresh");
                    CursorState::new(collector_id)
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "No cursor file, starting fresh");
                CursorState::new(collector_id)
            }
        };

        CursorFile {
            path,
            state: Mutex::new(state),
        }
    }

    /// Last processed USN for a volume, if any.
    pub fn get(&self, volume: &str) -> Option<i64> {
        self.state.lock().last_processed_usn.get(volume).copied()
    }

    /// Record the cursor position for a volume (in memory only).
    pub fn set(&self, volume: &str, usn: i64) {
        let mut state = self.state.lock();
        state.last_processed_usn.insert(volume.to_string(), usn);
        state.timestamp = Utc::now();
    }

    /// Persist the cursor atomically: write a temp file, then rename.
    pub fn save(&self) -> Result<()> {
        let contents = {
            let state = self.state.lock();
            serde_json::to_string_pretty(&*state)?
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, contents)?;
        fs::rename(&temp_path, &self.path)?;
        debug!(path = %self.path.display(), "Cursor saved");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Choose the USN to resume reading from.
///
/// A saved position below the journal's lowest valid USN means the
/// journal was truncated past us; the cursor is clamped up to `first_usn`
/// and the gap is lost (and logged). With no saved position, monitoring
/// starts from the journal's first USN so existing history is ingested.
pub fn resume_position(
    saved: Option<i64>,
    first_usn: i64,
    lowest_valid_usn: i64,
    volume: &str,
) -> i64 {
    match saved {
        Some(saved) if saved < lowest_valid_usn => {
            warn!(
                volume,
                saved,
                lowest_valid = lowest_valid_usn,
                resuming_from = first_usn,
                "Saved cursor predates journal, clamping up"
            );
            first_usn
        }
        Some(saved) => {
            debug!(volume, usn = saved, "Resuming from saved cursor");
            saved
        }
        None => {
            debug!(volume, usn = first_usn, "No saved cursor, starting from first USN");
            first_usn
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cursor.json");
        let collector_id = Uuid::new_v4();

        let cursor = CursorFile::load_or_new(&path, collector_id);
        cursor.set("C:", 12_345);
        cursor.set("D:", 99);
        cursor.save().unwrap();

        let reloaded = CursorFile::load_or_new(&path, collector_id);
        assert_eq!(reloaded.get("C:"), Some(12_345));
        assert_eq!(reloaded.get("D:"), Some(99));
        assert_eq!(reloaded.get("E:"), None);
        assert_eq!(reloaded.state.lock().collector_id, collector_id);
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cursor.json");
        fs::write(&path, "{not json").unwrap();

        let cursor = CursorFile::load_or_new(&path, Uuid::new_v4());
        assert_eq!(cursor.get("C:"), None);
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cursor.json");
        let cursor = CursorFile::load_or_new(&path, Uuid::new_v4());
        cursor.set("C:", 1);
        cursor.save().unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn stale_cursor_clamps_to_first_usn() {
        // Saved position 500 against a journal whose history starts at 800.
        assert_eq!(resume_position(Some(500), 800, 700, "C:"), 800);
        // A valid saved position resumes unchanged.
        assert_eq!(resume_position(Some(900), 800, 700, "C:"), 900);
        // No saved state starts from the beginning of the journal.
        assert_eq!(resume_position(None, 800, 700, "C:"), 800);
    }
}
