//! Stub collector for non-Windows platforms.
//!
//! Lets the workspace build and the core run everywhere; starting a
//! collector or enumerating volumes fails with a platform error. The
//! parser, FILETIME conversion, and event normalization remain fully
//! functional (and tested) on every platform.

use crate::{NtfsVolume, ReaderOptions};
use crossbeam_channel::Sender;
use engram_core::cursor::CursorFile;
use engram_core::error::{EngramError, Result};
use engram_core::types::ActivityEvent;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn unsupported() -> EngramError {
    EngramError::BackendFatal("the NTFS journal collector is only available on Windows".into())
}

/// Stub journal collector; construction always fails.
pub struct JournalCollector {
    _private: (),
}

impl JournalCollector {
    pub fn start(
        _volumes: Vec<String>,
        _options: ReaderOptions,
        _sender: Sender<ActivityEvent>,
        _cursor: Arc<CursorFile>,
        _stop: Arc<AtomicBool>,
    ) -> Result<Self> {
        Err(unsupported())
    }

    pub fn volumes(&self) -> Vec<String> {
        Vec::new()
    }

    pub fn join(self) {}
}

/// Volume enumeration is Windows-only.
pub fn enumerate_ntfs_volumes() -> Result<Vec<NtfsVolume>> {
    Err(unsupported())
}
