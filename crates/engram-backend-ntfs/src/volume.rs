//! Volume I/O: handles and the three journal control operations.
//!
//! All Windows API calls and unsafe code of the collector live here. A
//! [`VolumeHandle`] owns the underlying `HANDLE` and releases it on every
//! path, success or error. The three operations against it are
//! synchronous: query journal metadata, create a journal, and read a
//! batch of records.
//!
//! Accepted volume path forms: `\\.\X:`, `\\?\Volume{GUID}\`, and plain
//! drive-letter roots like `C:` or `C:\`.

use crate::NtfsVolume;
use engram_core::error::{EngramError, Result};
use std::ffi::OsStr;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use tracing::{debug, warn};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{
    CloseHandle, GetLastError, HANDLE, INVALID_HANDLE_VALUE, MAX_PATH,
};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FindFirstVolumeW, FindNextVolumeW, FindVolumeClose, GetDriveTypeW,
    GetVolumeInformationW, GetVolumeNameForVolumeMountPointW, GetVolumePathNamesForVolumeNameW,
    FILE_ATTRIBUTE_NORMAL, FILE_GENERIC_READ, FILE_SHARE_DELETE, FILE_SHARE_READ,
    FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::Ioctl::{
    FSCTL_CREATE_USN_JOURNAL, FSCTL_QUERY_USN_JOURNAL, FSCTL_READ_USN_JOURNAL,
};
use windows::Win32::System::IO::DeviceIoControl;

// Win32 error codes this module maps into the core taxonomy.
const ERROR_ACCESS_DENIED: u32 = 5;
const ERROR_HANDLE_EOF: u32 = 38;
const ERROR_INVALID_PARAMETER: u32 = 87;
const ERROR_JOURNAL_DELETE_IN_PROGRESS: u32 = 1178;
const ERROR_JOURNAL_NOT_ACTIVE: u32 = 1179;
const ERROR_JOURNAL_ENTRY_DELETED: u32 = 1181;

const DRIVE_FIXED: u32 = 3;

/// Default journal size when Engram has to create one: 32 MiB.
pub const DEFAULT_JOURNAL_MAX_SIZE: u64 = 32 * 1024 * 1024;

/// Default allocation delta for a created journal: 4 MiB.
pub const DEFAULT_JOURNAL_ALLOCATION_DELTA: u64 = 4 * 1024 * 1024;

/// Journal metadata returned by FSCTL_QUERY_USN_JOURNAL.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct JournalData {
    pub journal_id: u64,
    pub first_usn: i64,
    pub next_usn: i64,
    pub lowest_valid_usn: i64,
    pub max_usn: i64,
    pub max_size: u64,
    pub allocation_delta: u64,
}

/// Input for FSCTL_CREATE_USN_JOURNAL.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct CreateJournalData {
    maximum_size: u64,
    allocation_delta: u64,
}

/// Input for FSCTL_READ_USN_JOURNAL (V2-only read).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ReadJournalData {
    start_usn: i64,
    reason_mask: u32,
    return_only_on_close: u32,
    timeout: u64,
    bytes_to_wait_for: u64,
    journal_id: u64,
    min_major_version: u16,
    max_major_version: u16,
}

/// Owned volume handle; closed on drop along every path.
pub struct VolumeHandle {
    handle: HANDLE,
    volume_name: String,
}

// The handle is used from the single reader thread that opened it, but
// moving it there requires Send.
unsafe impl Send for VolumeHandle {}

impl VolumeHandle {
    /// Open a volume for journal access.
    pub fn open(volume: &str) -> Result<Self> {
        let device_path = device_path_for(volume);
        let wide = to_wide(&device_path);

        // SAFETY: documented Win32 call with a valid NUL-terminated path;
        // the handle is wrapped immediately for cleanup.
        let handle = unsafe {
            CreateFileW(
                PCWSTR(wide.as_ptr()),
                FILE_GENERIC_READ.0,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                None,
                OPEN_EXISTING,
                FILE_ATTRIBUTE_NORMAL,
                None,
            )
        };

        match handle {
            Ok(h) if h != INVALID_HANDLE_VALUE && !h.is_invalid() => Ok(VolumeHandle {
                handle: h,
                volume_name: volume.to_string(),
            }),
            _ => Err(last_error_for("CreateFileW", volume)),
        }
    }

    pub fn volume_name(&self) -> &str {
        &self.volume_name
    }

    /// Query journal metadata. Fails with `JournalAbsent` when the volume
    /// has no active journal.
    pub fn query_journal(&self) -> Result<JournalData> {
        let mut data = JournalData::default();
        let mut bytes_returned = 0u32;

        // SAFETY: output buffer is a properly sized repr(C) struct.
        let result = unsafe {
            DeviceIoControl(
                self.handle,
                FSCTL_QUERY_USN_JOURNAL,
                None,
                0,
                Some(&mut data as *mut _ as *mut _),
                mem::size_of::<JournalData>() as u32,
                Some(&mut bytes_returned),
                None,
            )
        };

        if result.is_err() {
            return Err(self.map_error("FSCTL_QUERY_USN_JOURNAL"));
        }

        debug!(
            volume = %self.volume_name,
            journal_id = data.journal_id,
            first_usn = data.first_usn,
            next_usn = data.next_usn,
            "Queried journal"
        );
        Ok(data)
    }

    /// Enable the change journal on this volume.
    pub fn create_journal(&self, max_size: u64, allocation_delta: u64) -> Result<()> {
        let input = CreateJournalData {
            maximum_size: max_size,
            allocation_delta,
        };
        let mut bytes_returned = 0u32;

        // SAFETY: input buffer is a properly sized repr(C) struct.
        let result = unsafe {
            DeviceIoControl(
                self.handle,
                FSCTL_CREATE_USN_JOURNAL,
                Some(&input as *const _ as *const _),
                mem::size_of::<CreateJournalData>() as u32,
                None,
                0,
                Some(&mut bytes_returned),
                None,
            )
        };

        if result.is_err() {
            return Err(self.map_error("FSCTL_CREATE_USN_JOURNAL"));
        }
        debug!(volume = %self.volume_name, max_size, allocation_delta, "Journal created");
        Ok(())
    }

    /// Read a batch of records starting at `start_usn` into `buffer`.
    ///
    /// Returns the number of bytes written. The first 8 bytes of the
    /// buffer are the next USN to request; records follow.
    pub fn read_journal(
        &self,
        journal_id: u64,
        start_usn: i64,
        reason_mask: u32,
        buffer: &mut [u8],
    ) -> Result<usize> {
        let input = ReadJournalData {
            start_usn,
            reason_mask,
            return_only_on_close: 0,
            timeout: 0,
            bytes_to_wait_for: 0,
            journal_id,
            min_major_version: 2,
            max_major_version: 2,
        };
        let mut bytes_returned = 0u32;

        // SAFETY: input and output buffers are valid for the call's
        // duration; bytes_returned bounds the readable region.
        let result = unsafe {
            DeviceIoControl(
                self.handle,
                FSCTL_READ_USN_JOURNAL,
                Some(&input as *const _ as *const _),
                mem::size_of::<ReadJournalData>() as u32,
                Some(buffer.as_mut_ptr() as *mut _),
                buffer.len() as u32,
                Some(&mut bytes_returned),
                None,
            )
        };

        if result.is_err() {
            return Err(self.map_error("FSCTL_READ_USN_JOURNAL"));
        }
        Ok(bytes_returned as usize)
    }

    fn map_error(&self, operation: &str) -> EngramError {
        map_last_error(operation, &self.volume_name)
    }
}

impl Drop for VolumeHandle {
    fn drop(&mut self) {
        if self.handle != INVALID_HANDLE_VALUE && !self.handle.is_invalid() {
            // SAFETY: the handle is owned and closed exactly once.
            unsafe {
                let _ = CloseHandle(self.handle);
            }
        }
    }
}

/// Map GetLastError into the core taxonomy.
fn map_last_error(operation: &str, volume: &str) -> EngramError {
    let code = unsafe { GetLastError().0 };
    match code {
        ERROR_ACCESS_DENIED => EngramError::AccessDenied {
            operation: format!("{} on {}", operation, volume),
        },
        ERROR_JOURNAL_NOT_ACTIVE | ERROR_JOURNAL_DELETE_IN_PROGRESS => EngramError::JournalAbsent {
            volume: volume.to_string(),
        },
        ERROR_JOURNAL_ENTRY_DELETED => EngramError::JournalTruncated {
            volume: volume.to_string(),
            cursor: -1,
            lowest_valid: -1,
        },
        ERROR_INVALID_PARAMETER | ERROR_HANDLE_EOF => EngramError::JournalReadOutOfRange {
            volume: volume.to_string(),
            reason: format!("{} failed with code {}", operation, code),
        },
        _ => EngramError::BackendTransient(format!(
            "{} on {} failed with Win32 error {}",
            operation, volume, code
        )),
    }
}

fn last_error_for(operation: &str, volume: &str) -> EngramError {
    map_last_error(operation, volume)
}

/// Normalize a volume spec to a device path (`\\.\C:`).
pub fn device_path_for(volume: &str) -> String {
    if volume.starts_with("\\\\.\\") || volume.starts_with("\\\\?\\") {
        return volume.trim_end_matches('\\').to_string();
    }
    let letter = volume
        .chars()
        .next()
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('C');
    format!("\\\\.\\{}:", letter)
}

fn to_wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

fn from_wide(buffer: &[u16]) -> String {
    let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..len])
}

/// Look up the volume GUID for a drive letter.
///
/// Returns the bare GUID (without the `\\?\Volume{...}\` wrapper), or
/// None when the mount point has no GUID mapping.
pub fn volume_guid_for_drive(drive_letter: char) -> Option<String> {
    let mount_point = to_wide(&format!("{}:\\", drive_letter.to_ascii_uppercase()));
    let mut name = [0u16; 64];

    // SAFETY: both buffers are valid and sized per the API contract.
    let result = unsafe {
        GetVolumeNameForVolumeMountPointW(PCWSTR(mount_point.as_ptr()), &mut name)
    };
    if result.is_err() {
        return None;
    }

    let volume_path = from_wide(&name);
    // Format: \\?\Volume{GUID}\
    let start = volume_path.find('{')? + 1;
    let end = volume_path.find('}')?;
    Some(volume_path[start..end].to_string())
}

/// Enumerate fixed NTFS volumes on the system.
pub fn enumerate_ntfs_volumes() -> Result<Vec<NtfsVolume>> {
    let mut volumes = Vec::new();
    let mut name = [0u16; MAX_PATH as usize];

    // SAFETY: name buffer is MAX_PATH wide per the API contract.
    let find = unsafe { FindFirstVolumeW(&mut name) }
        .map_err(|_| last_error_for("FindFirstVolumeW", "system"))?;

    loop {
        let volume_guid_path = from_wide(&name);

        if let Some(mount_point) = first_mount_point(&volume_guid_path) {
            if is_fixed_drive(&mount_point) {
                if let Some(volume) = probe_volume(&volume_guid_path, &mount_point) {
                    debug!(mount_point = %volume.mount_point, label = ?volume.label, "Found NTFS volume");
                    volumes.push(volume);
                }
            }
        }

        name = [0u16; MAX_PATH as usize];
        // SAFETY: continuation of the same enumeration handle.
        if unsafe { FindNextVolumeW(find, &mut name) }.is_err() {
            break;
        }
    }

    // SAFETY: the enumeration handle is closed exactly once.
    unsafe {
        let _ = FindVolumeClose(find);
    }

    Ok(volumes)
}

fn first_mount_point(volume_guid_path: &str) -> Option<String> {
    let wide = to_wide(volume_guid_path);
    let mut paths = [0u16; MAX_PATH as usize];
    let mut returned = 0u32;

    // SAFETY: buffers valid; the result is a NUL-separated multi-string.
    let result = unsafe {
        GetVolumePathNamesForVolumeNameW(PCWSTR(wide.as_ptr()), Some(&mut paths), &mut returned)
    };
    if result.is_err() {
        return None;
    }

    let first = from_wide(&paths);
    if first.is_empty() {
        None
    } else {
        Some(first.trim_end_matches('\\').to_string())
    }
}

fn is_fixed_drive(mount_point: &str) -> bool {
    let wide = to_wide(&format!("{}\\", mount_point));
    // SAFETY: valid NUL-terminated root path.
    unsafe { GetDriveTypeW(PCWSTR(wide.as_ptr())) == DRIVE_FIXED }
}

fn probe_volume(volume_guid_path: &str, mount_point: &str) -> Option<NtfsVolume> {
    let root = to_wide(&format!("{}\\", mount_point));
    let mut label = [0u16; MAX_PATH as usize];
    let mut serial = 0u32;
    let mut max_component = 0u32;
    let mut fs_flags = 0u32;
    let mut fs_name = [0u16; MAX_PATH as usize];

    // SAFETY: all out-buffers valid for the call.
    let result = unsafe {
        GetVolumeInformationW(
            PCWSTR(root.as_ptr()),
            Some(&mut label),
            Some(&mut serial),
            Some(&mut max_component),
            Some(&mut fs_flags),
            Some(&mut fs_name),
        )
    };
    if result.is_err() {
        warn!(mount_point, "GetVolumeInformationW failed");
        return None;
    }

    if from_wide(&fs_name) != "NTFS" {
        return None;
    }

    let guid = {
        let start = volume_guid_path.find('{').map(|i| i + 1);
        let end = volume_guid_path.find('}');
        match (start, end) {
            (Some(s), Some(e)) if s < e => Some(volume_guid_path[s..e].to_string()),
            _ => None,
        }
    };

    let label_str = {
        let text = from_wide(&label);
        if text.is_empty() { None } else { Some(text) }
    };

    Some(NtfsVolume {
        mount_point: mount_point.to_string(),
        volume_guid: guid,
        label: label_str,
        serial_number: serial,
    })
}
