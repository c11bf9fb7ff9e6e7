//! USN V2 record parsing.
//!
//! The journal read buffer is a next-USN header followed by a
//! concatenation of variable-length V2 records. This module decodes
//! records from raw bytes and nothing else; it performs no I/O and is
//! compiled (and tested) on every platform.
//!
//! The parser's contract:
//!
//! - it never reads past `offset + record_length`
//! - the returned offset is strictly greater than the input offset, so a
//!   walk over a malformed buffer always terminates
//! - malformed records are skipped with a log line, never silently
//!   dropped records mid-buffer
//! - a filename that fails UTF-16 decoding keeps the record, with the
//!   raw bytes preserved as a hex placeholder

use crate::time::filetime_to_datetime;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Minimum valid size of a V2 record: 56-byte fixed header plus at least
/// one UTF-16 character of name.
pub const MIN_RECORD_LENGTH: u32 = 60;

/// Fixed V2 header size preceding the filename region.
const HEADER_LENGTH: usize = 60;

/// Cursor advance over a record too broken to carry its own length.
const MALFORMED_ADVANCE: usize = 4;

/// FILE_ATTRIBUTE_DIRECTORY bit of `file_attributes`.
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;

/// A decoded V2 change-journal record.
#[derive(Debug, Clone, PartialEq)]
pub struct UsnRecord {
    pub record_length: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub file_reference_number: u64,
    pub parent_file_reference_number: u64,
    pub usn: i64,
    /// Raw FILETIME ticks as read from the record.
    pub timestamp_filetime: u64,
    /// The same instant in UTC; pre-1970 values are preserved.
    pub timestamp: DateTime<Utc>,
    pub reason_flags: u32,
    pub source_info: u32,
    pub security_id: u32,
    pub file_attributes: u32,
    pub file_name: String,
}

impl UsnRecord {
    pub fn is_directory(&self) -> bool {
        self.file_attributes & FILE_ATTRIBUTE_DIRECTORY != 0
    }
}

/// The next USN to request, from the first 8 bytes of a read buffer.
pub fn buffer_next_usn(buffer: &[u8]) -> Option<i64> {
    Some(i64::from_le_bytes(buffer.get(..8)?.try_into().ok()?))
}

fn read_u16(buffer: &[u8], at: usize) -> u16 {
    u16::from_le_bytes(buffer[at..at + 2].try_into().unwrap())
}

fn read_u32(buffer: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(buffer[at..at + 4].try_into().unwrap())
}

fn read_u64(buffer: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(buffer[at..at + 8].try_into().unwrap())
}

/// Decode one record at `offset`.
///
/// Returns the record (or `None` for a skipped region) and the offset of
/// the next record. The returned offset always exceeds `offset`.
pub fn parse_record(buffer: &[u8], offset: usize) -> (Option<UsnRecord>, usize) {
    // Not enough bytes left for a length field: consume the tail.
    if offset + 4 > buffer.len() {
        return (None, buffer.len());
    }

    let record_length = read_u32(buffer, offset);
    if record_length < MIN_RECORD_LENGTH {
        warn!(offset, record_length, "Record below minimum length, skipping");
        return (None, offset + MALFORMED_ADVANCE);
    }
    if offset + record_length as usize > buffer.len() {
        warn!(
            offset,
            record_length,
            remaining = buffer.len() - offset,
            "Record overruns buffer, discarding tail"
        );
        return (None, buffer.len());
    }

    let next_offset = offset + record_length as usize;
    let record = &buffer[offset..next_offset];

    let major_version = read_u16(record, 4);
    if major_version != 2 {
        debug!(offset, major_version, "Skipping non-V2 record");
        return (None, next_offset);
    }

    let file_name_length = read_u16(record, 56) as usize;
    let file_name_offset = read_u16(record, 58) as usize;
    if file_name_offset < HEADER_LENGTH
        || file_name_offset + file_name_length > record_length as usize
    {
        warn!(
            offset,
            file_name_offset, file_name_length, record_length, "Filename region out of bounds, skipping record"
        );
        return (None, next_offset);
    }

    let name_bytes = &record[file_name_offset..file_name_offset + file_name_length];
    let file_name = decode_file_name(name_bytes);

    let timestamp_filetime = read_u64(record, 32);

    let parsed = UsnRecord {
        record_length,
        major_version,
        minor_version: read_u16(record, 6),
        file_reference_number: read_u64(record, 8),
        parent_file_reference_number: read_u64(record, 16),
        usn: read_u64(record, 24) as i64,
        timestamp_filetime,
        timestamp: filetime_to_datetime(timestamp_filetime as i64),
        reason_flags: read_u32(record, 40),
        source_info: read_u32(record, 44),
        security_id: read_u32(record, 48),
        file_attributes: read_u32(record, 52),
        file_name,
    };

    (Some(parsed), next_offset)
}

/// Decode a UTF-16LE filename. A malformed name keeps the record alive
/// with a hex placeholder so nothing vanishes from the stream.
fn decode_file_name(bytes: &[u8]) -> String {
    if bytes.len() % 2 != 0 {
        warn!(len = bytes.len(), "Odd-length filename region");
        return format!("<decode-error:{}>", hex_string(bytes));
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    match String::from_utf16(&units) {
        Ok(name) => name,
        Err(_) => {
            warn!("Filename failed UTF-16 decoding, keeping hex placeholder");
            format!("<decode-error:{}>", hex_string(bytes))
        }
    }
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Walk every record in a read buffer, yielding parsed records.
///
/// `bytes_returned` bounds the walk; the 8-byte next-USN header must
/// already be skipped by starting at offset 8.
pub fn walk_records(buffer: &[u8], bytes_returned: usize) -> RecordWalker<'_> {
    RecordWalker {
        buffer: &buffer[..bytes_returned.min(buffer.len())],
        offset: 8.min(bytes_returned),
    }
}

/// Iterator over the records of one read buffer.
pub struct RecordWalker<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl Iterator for RecordWalker<'_> {
    type Item = UsnRecord;

    fn next(&mut self) -> Option<UsnRecord> {
        while self.offset < self.buffer.len() {
            let (record, next_offset) = parse_record(self.buffer, self.offset);
            debug_assert!(next_offset > self.offset);
            self.offset = next_offset;
            if let Some(record) = record {
                return Some(record);
            }
        }
        None
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Builders for synthetic journal buffers.

    /// Encode a V2 record with the given fields. `pad_to` rounds the
    /// record up (8-byte alignment in real journals).
    pub fn encode_record(
        frn: u64,
        parent_frn: u64,
        usn: i64,
        filetime: u64,
        reason: u32,
        attributes: u32,
        name: &str,
    ) -> Vec<u8> {
        let name_utf16: Vec<u8> = name
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        let raw_len = 60 + name_utf16.len();
        let record_length = raw_len.div_ceil(8) * 8;

        let mut out = vec![0u8; record_length];
        out[0..4].copy_from_slice(&(record_length as u32).to_le_bytes());
        out[4..6].copy_from_slice(&2u16.to_le_bytes()); // major version
        out[6..8].copy_from_slice(&0u16.to_le_bytes()); // minor version
        out[8..16].copy_from_slice(&frn.to_le_bytes());
        out[16..24].copy_from_slice(&parent_frn.to_le_bytes());
        out[24..32].copy_from_slice(&usn.to_le_bytes());
        out[32..40].copy_from_slice(&filetime.to_le_bytes());
        out[40..44].copy_from_slice(&reason.to_le_bytes());
        out[44..48].copy_from_slice(&0u32.to_le_bytes()); // source info
        out[48..52].copy_from_slice(&0u32.to_le_bytes()); // security id
        out[52..56].copy_from_slice(&attributes.to_le_bytes());
        out[56..58].copy_from_slice(&(name_utf16.len() as u16).to_le_bytes());
        out[58..60].copy_from_slice(&60u16.to_le_bytes()); // name offset
        out[60..60 + name_utf16.len()].copy_from_slice(&name_utf16);
        out
    }

    /// Assemble a read buffer: next-USN header plus records.
    pub fn encode_buffer(next_usn: i64, records: &[Vec<u8>]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + records.iter().map(Vec::len).sum::<usize>());
        out.extend_from_slice(&next_usn.to_le_bytes());
        for record in records {
            out.extend_from_slice(record);
        }
        out
    }
}
