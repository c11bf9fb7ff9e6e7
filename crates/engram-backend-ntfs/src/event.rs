//! Record → activity-event conversion.
//!
//! Turns parsed journal records into the normalized events the core
//! pipeline consumes. Conversion is pure: the canonical path policy and
//! attribute decoding depend only on the builder's configuration, so the
//! whole normalization step is testable without a volume handle.

use crate::record::UsnRecord;
use engram_core::types::{
    activity_id_for, frn_hex, reason_flags_text, ActivityEvent, ActivityKind,
};
use serde_json::json;

/// File-attribute bits decoded into `attributes` for debugging.
const FILE_ATTRIBUTE_NAMES: &[(u32, &str)] = &[
    (0x0000_0001, "READONLY"),
    (0x0000_0002, "HIDDEN"),
    (0x0000_0004, "SYSTEM"),
    (0x0000_0010, "DIRECTORY"),
    (0x0000_0020, "ARCHIVE"),
    (0x0000_0080, "NORMAL"),
    (0x0000_0100, "TEMPORARY"),
    (0x0000_0200, "SPARSE_FILE"),
    (0x0000_0400, "REPARSE_POINT"),
    (0x0000_0800, "COMPRESSED"),
    (0x0000_1000, "OFFLINE"),
    (0x0000_4000, "ENCRYPTED"),
];

/// Decode a file-attribute bitmap into the names of the set flags.
pub fn file_attributes_text(file_attributes: u32) -> Vec<&'static str> {
    FILE_ATTRIBUTE_NAMES
        .iter()
        .filter(|(bit, _)| file_attributes & bit != 0)
        .map(|(_, name)| *name)
        .collect()
}

/// Builds normalized events for one monitored volume.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    volume_name: String,
    /// Volume GUID (the `{...}` part) when known; enables stable paths
    /// across drive-letter reassignment.
    volume_guid: Option<String>,
    include_close_events: bool,
}

impl EventBuilder {
    pub fn new(volume_name: impl Into<String>) -> Self {
        EventBuilder {
            volume_name: volume_name.into(),
            volume_guid: None,
            include_close_events: true,
        }
    }

    pub fn with_volume_guid(mut self, guid: Option<String>) -> Self {
        self.volume_guid = guid;
        self
    }

    pub fn with_close_events(mut self, include: bool) -> Self {
        self.include_close_events = include;
        self
    }

    pub fn volume_name(&self) -> &str {
        &self.volume_name
    }

    /// Canonical path for a file name on this volume.
    ///
    /// With a known volume GUID the path is `\\?\Volume{GUID}\<name>`,
    /// which survives drive-letter changes; otherwise `<drive>\<name>`.
    pub fn canonical_path(&self, file_name: &str) -> String {
        match &self.volume_guid {
            Some(guid) => format!("\\\\?\\Volume{{{}}}\\{}", guid, file_name),
            None => format!("{}\\{}", self.volume_name, file_name),
        }
    }

    /// Convert a parsed record into an event.
    ///
    /// Returns `None` for records this volume's policy drops: NTFS
    /// metadata files (`$MFT`, `$LogFile`, ...) and close-only records
    /// when close events are disabled.
    pub fn build(&self, record: &UsnRecord) -> Option<ActivityEvent> {
        if record.file_name.starts_with('$') {
            return None;
        }

        let kind = ActivityKind::from_reason_flags(record.reason_flags);
        if kind == ActivityKind::Close && !self.include_close_events {
            return None;
        }

        let mut attributes = serde_json::Map::new();
        attributes.insert(
            "reason_text".into(),
            json!(reason_flags_text(record.reason_flags).join(" | ")),
        );
        attributes.insert(
            "file_attributes_text".into(),
            json!(file_attributes_text(record.file_attributes).join(" | ")),
        );
        attributes.insert("source_info".into(), json!(record.source_info));
        attributes.insert("security_id".into(), json!(record.security_id));

        Some(ActivityEvent {
            activity_id: activity_id_for(&self.volume_name, record.usn),
            volume_name: self.volume_name.clone(),
            file_name: record.file_name.clone(),
            file_path: self.canonical_path(&record.file_name),
            is_directory: record.is_directory(),
            file_reference_number: frn_hex(record.file_reference_number),
            parent_file_reference_number: frn_hex(record.parent_file_reference_number),
            activity_type: kind,
            reason_flags: record.reason_flags,
            timestamp: record.timestamp,
            usn: record.usn,
            attributes,
        })
    }
}
