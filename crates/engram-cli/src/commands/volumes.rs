//! Volumes command - list NTFS volumes and journal status.

use engram_backend_ntfs::enumerate_ntfs_volumes;

pub fn run() -> anyhow::Result<()> {
    let volumes = enumerate_ntfs_volumes()?;

    if volumes.is_empty() {
        println!("No fixed NTFS volumes found.");
        return Ok(());
    }

    println!("NTFS Volumes");
    println!("============");
    for volume in &volumes {
        println!(
            "  {}  {}  serial {:08X}",
            volume.mount_point,
            volume.label.as_deref().unwrap_or("(no label)"),
            volume.serial_number
        );
        if let Some(guid) = &volume.volume_guid {
            println!("      GUID: {}", guid);
        }
        print_journal_status(&volume.mount_point);
    }
    Ok(())
}

#[cfg(windows)]
fn print_journal_status(mount_point: &str) {
    use engram_backend_ntfs::VolumeHandle;

    match VolumeHandle::open(mount_point).and_then(|h| h.query_journal()) {
        Ok(journal) => {
            println!(
                "      Journal: id {:016X}, USN range {}..{}",
                journal.journal_id, journal.first_usn, journal.next_usn
            );
        }
        Err(e) => println!("      Journal: unavailable ({})", e),
    }
}

#[cfg(not(windows))]
fn print_journal_status(_mount_point: &str) {}
