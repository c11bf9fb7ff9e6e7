//! # Engram NTFS Backend
//!
//! The Windows/NTFS collector: it opens volumes, drives the USN change
//! journal, and feeds normalized [`ActivityEvent`]s into the core
//! pipeline's bounded queue.
//!
//! The crate is split so the interesting logic runs everywhere:
//!
//! - `record`: pure V2 record parsing (no I/O, tested on all platforms)
//! - `time`: FILETIME conversion (pure)
//! - `event`: record → event normalization (pure)
//! - `volume`, `reader`: Windows-only volume I/O and reader threads
//! - a stub collector keeps non-Windows builds compiling; every
//!   operation fails with a platform error
//!
//! ## Permissions
//!
//! Reading a change journal requires elevation (Administrator or the
//! "Perform Volume Maintenance Tasks" privilege). Access-denied errors
//! are surfaced as fatal for the affected volume, never retried.

use engram_core::types::ActivityEvent;

pub mod event;
pub mod record;
pub mod time;

#[cfg(windows)]
mod reader;
#[cfg(windows)]
mod volume;

#[cfg(windows)]
pub use reader::{JournalCollector, VolumeReader};
#[cfg(windows)]
pub use volume::{
    enumerate_ntfs_volumes, JournalData, VolumeHandle, DEFAULT_JOURNAL_ALLOCATION_DELTA,
    DEFAULT_JOURNAL_MAX_SIZE,
};

#[cfg(not(windows))]
mod stub;

#[cfg(not(windows))]
pub use stub::{enumerate_ntfs_volumes, JournalCollector};

/// A mounted NTFS volume eligible for monitoring.
#[derive(Debug, Clone)]
pub struct NtfsVolume {
    /// Drive-letter mount point, e.g. `C:`.
    pub mount_point: String,
    /// Volume GUID (the `{...}` part) when known.
    pub volume_guid: Option<String>,
    pub label: Option<String>,
    pub serial_number: u32,
}

/// Reader-task tuning, derived from [`engram_core::config::Config`].
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub monitor_interval: std::time::Duration,
    /// Persist the cursor after this many emitted events.
    pub cursor_save_interval: u64,
    pub include_close_events: bool,
    pub use_volume_guids: bool,
    pub excluded_prefixes: Vec<String>,
    pub excluded_extensions: Vec<String>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            monitor_interval: std::time::Duration::from_secs(1),
            cursor_save_interval: 100,
            include_close_events: true,
            use_volume_guids: true,
            excluded_prefixes: Vec::new(),
            excluded_extensions: Vec::new(),
        }
    }
}

impl ReaderOptions {
    pub fn from_config(config: &engram_core::Config) -> Self {
        ReaderOptions {
            monitor_interval: std::time::Duration::from_secs(config.monitor.interval_secs),
            cursor_save_interval: config.monitor.cursor_save_interval.max(1),
            include_close_events: config.monitor.include_close_events,
            use_volume_guids: config.monitor.use_volume_guids,
            excluded_prefixes: config.exclude.path_prefixes.clone(),
            excluded_extensions: config.exclude.extensions.clone(),
        }
    }

    /// Collector-side exclusion check on the raw record name.
    pub fn is_excluded(&self, file_name: &str) -> bool {
        if self
            .excluded_prefixes
            .iter()
            .any(|p| file_name.starts_with(p.as_str()))
        {
            return true;
        }
        if let Some((_, ext)) = file_name.rsplit_once('.') {
            return self
                .excluded_extensions
                .iter()
                .any(|e| ext.eq_ignore_ascii_case(e));
        }
        false
    }
}

/// Convenience alias for the collector's event output type.
pub type Event = ActivityEvent;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusion_rules() {
        let options = ReaderOptions {
            excluded_prefixes: vec!["~$".to_string()],
            excluded_extensions: vec!["etl".to_string()],
            ..Default::default()
        };
        assert!(options.is_excluded("~$report.docx"));
        assert!(options.is_excluded("trace.ETL"));
        assert!(!options.is_excluded("report.docx"));
        assert!(!options.is_excluded("noext"));
    }
}

#[cfg(test)]
mod scenario_tests {
    //! Buffer-to-hot-tier scenarios: encoded journal buffers walked
    //! through normalization into the core recorders.

    use crate::event::EventBuilder;
    use crate::record::test_support::{encode_buffer, encode_record};
    use crate::record::walk_records;
    use crate::time::datetime_to_filetime;
    use chrono::Utc;
    use engram_core::entity::EntityResolver;
    use engram_core::hot::HotTierRecorder;
    use engram_core::store::{DocumentStore, MemoryStore};
    use engram_core::types::{
        ActivityKind, USN_REASON_CLOSE, USN_REASON_DATA_EXTEND, USN_REASON_FILE_CREATE,
        USN_REASON_FILE_DELETE, USN_REASON_RENAME_NEW_NAME, USN_REASON_RENAME_OLD_NAME,
    };
    use std::sync::Arc;

    fn engine() -> (Arc<EntityResolver>, HotTierRecorder) {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let resolver = Arc::new(EntityResolver::new(store.clone()).unwrap());
        let hot = HotTierRecorder::new(store, resolver.clone(), 4).unwrap();
        (resolver, hot)
    }

    #[test]
    fn create_modify_close_from_one_buffer() {
        let (_, hot) = engine();
        let builder = EventBuilder::new("C:");
        let ft = datetime_to_filetime(Utc::now()) as u64;

        let buffer = encode_buffer(
            124,
            &[
                encode_record(77, 5, 100, ft, USN_REASON_FILE_CREATE, 0x20, "notes.txt"),
                encode_record(77, 5, 108, ft, USN_REASON_DATA_EXTEND, 0x20, "notes.txt"),
                encode_record(77, 5, 116, ft, USN_REASON_CLOSE, 0x20, "notes.txt"),
            ],
        );

        let mut ids = Vec::new();
        for record in walk_records(&buffer, buffer.len()) {
            let event = builder.build(&record).unwrap();
            ids.push(hot.record_event(event).unwrap());
        }
        assert_eq!(ids.len(), 3);

        let records: Vec<_> = ids
            .iter()
            .map(|id| hot.get(*id).unwrap().unwrap())
            .collect();
        assert_eq!(records[0].event.activity_type, ActivityKind::Create);
        assert_eq!(records[1].event.activity_type, ActivityKind::Modify);
        assert_eq!(records[2].event.activity_type, ActivityKind::Close);
        assert_eq!(records[0].entity_id, records[1].entity_id);
        assert_eq!(records[1].entity_id, records[2].entity_id);
        assert!(records[0].importance_score > records[2].importance_score);
    }

    #[test]
    fn rename_pair_remaps_the_path() {
        let (resolver, hot) = engine();
        let builder = EventBuilder::new("C:");
        let ft = datetime_to_filetime(Utc::now()) as u64;

        let buffer = encode_buffer(
            216,
            &[
                encode_record(88, 5, 200, ft, USN_REASON_RENAME_OLD_NAME, 0, "a.txt"),
                encode_record(88, 5, 208, ft, USN_REASON_RENAME_NEW_NAME, 0, "b.txt"),
            ],
        );

        let mut entity_ids = Vec::new();
        for record in walk_records(&buffer, buffer.len()) {
            let event = builder.build(&record).unwrap();
            assert_eq!(event.activity_type, ActivityKind::Rename);
            let id = hot.record_event(event).unwrap();
            entity_ids.push(hot.get(id).unwrap().unwrap().entity_id);
        }
        assert_eq!(entity_ids[0], entity_ids[1]);

        // The new name resolves to the same entity.
        assert_eq!(
            resolver.lookup_by_path("C:", "C:\\b.txt").unwrap(),
            Some(entity_ids[0])
        );
        let entity = resolver.get(entity_ids[0]).unwrap().unwrap();
        assert_eq!(entity.properties.file_path, "C:\\b.txt");
    }

    #[test]
    fn delete_marks_the_entity() {
        let (resolver, hot) = engine();
        let builder = EventBuilder::new("C:");
        let ft = datetime_to_filetime(Utc::now()) as u64;

        let buffer = encode_buffer(
            308,
            &[
                encode_record(99, 5, 292, ft, USN_REASON_FILE_CREATE, 0, "gone.txt"),
                encode_record(99, 5, 300, ft, USN_REASON_FILE_DELETE, 0, "gone.txt"),
            ],
        );

        let mut last_entity = None;
        for record in walk_records(&buffer, buffer.len()) {
            let event = builder.build(&record).unwrap();
            let id = hot.record_event(event).unwrap();
            last_entity = Some(hot.get(id).unwrap().unwrap().entity_id);
        }

        let entity = resolver.get(last_entity.unwrap()).unwrap().unwrap();
        assert!(entity.properties.deleted);
        assert_eq!(entity.properties.file_path, "C:\\gone.txt");
    }
}
