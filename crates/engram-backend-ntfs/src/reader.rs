//! Per-volume journal reader tasks.
//!
//! One thread per monitored volume drives the read loop: read a batch,
//! walk its records, normalize and emit them into the bounded event
//! queue, advance the cursor. The thread owns its volume handle
//! exclusively and honors the shared stop signal at the read boundary and
//! at every record emit.
//!
//! Error policy (per class):
//! - access denied: fatal for this task; reported and the task stops
//! - journal absent: one create attempt, then re-query
//! - truncation / out-of-range reads: re-query and clamp the cursor up
//! - parse failures: the walker advances past them; they are counted
//! - full queue: the send blocks (backpressure), never drops

use crate::event::EventBuilder;
use crate::record::{buffer_next_usn, walk_records};
use crate::volume::{
    volume_guid_for_drive, VolumeHandle, DEFAULT_JOURNAL_ALLOCATION_DELTA,
    DEFAULT_JOURNAL_MAX_SIZE,
};
use crate::ReaderOptions;
use crossbeam_channel::{SendTimeoutError, Sender};
use engram_core::cursor::{resume_position, CursorFile};
use engram_core::error::{EngramError, Result};
use engram_core::types::{ActivityEvent, USN_REASON_ALL};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Journal read buffer size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// How long an emit waits before re-checking the stop signal.
const SEND_SLICE: Duration = Duration::from_millis(200);

/// Handle to one volume's reader thread.
pub struct VolumeReader {
    thread: Option<JoinHandle<()>>,
    volume: String,
}

impl VolumeReader {
    /// Spawn the reader thread for `volume`.
    pub fn spawn(
        volume: String,
        options: ReaderOptions,
        sender: Sender<ActivityEvent>,
        cursor: Arc<CursorFile>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self> {
        let thread_volume = volume.clone();
        let thread = std::thread::Builder::new()
            .name(format!("engram-usn-{}", volume.trim_end_matches(':')))
            .spawn(move || reader_loop(thread_volume, options, sender, cursor, stop))
            .map_err(EngramError::Io)?;

        Ok(VolumeReader {
            thread: Some(thread),
            volume,
        })
    }

    pub fn volume(&self) -> &str {
        &self.volume
    }

    /// Wait for the reader thread to finish.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for VolumeReader {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn reader_loop(
    volume: String,
    options: ReaderOptions,
    sender: Sender<ActivityEvent>,
    cursor: Arc<CursorFile>,
    stop: Arc<AtomicBool>,
) {
    info!(volume = %volume, "Journal reader starting");

    let handle = match VolumeHandle::open(&volume) {
        Ok(handle) => handle,
        Err(e) => {
            error!(volume = %volume, error = %e, "Cannot open volume, reader stopping");
            return;
        }
    };

    let mut journal = match query_or_create(&handle) {
        Ok(journal) => journal,
        Err(e) => {
            error!(volume = %volume, error = %e, "Cannot query journal, reader stopping");
            return;
        }
    };

    let mut next_usn = resume_position(
        cursor.get(&volume),
        journal.first_usn,
        journal.lowest_valid_usn,
        &volume,
    );

    let guid = if options.use_volume_guids {
        volume.chars().next().and_then(volume_guid_for_drive)
    } else {
        None
    };
    let builder = EventBuilder::new(volume.clone())
        .with_volume_guid(guid)
        .with_close_events(options.include_close_events);

    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut emitted_since_save: u64 = 0;

    while !stop.load(Ordering::Acquire) {
        let bytes = match handle.read_journal(journal.journal_id, next_usn, USN_REASON_ALL, &mut buffer)
        {
            Ok(bytes) => bytes,
            Err(e) if e.is_fatal() => {
                error!(volume = %volume, error = %e, "Fatal journal error, reader stopping");
                break;
            }
            Err(e) if e.requires_requery() => {
                match query_or_create(&handle) {
                    Ok(fresh) => {
                        journal = fresh;
                        if next_usn < journal.lowest_valid_usn {
                            warn!(
                                volume = %volume,
                                next_usn,
                                first_usn = journal.first_usn,
                                "Cursor fell out of journal range, clamping up"
                            );
                            next_usn = journal.first_usn;
                        }
                    }
                    Err(e) => {
                        warn!(volume = %volume, error = %e, "Journal re-query failed, retrying");
                    }
                }
                sleep_with_stop(options.monitor_interval, &stop);
                continue;
            }
            Err(e) => {
                warn!(volume = %volume, error = %e, "Journal read failed, retrying");
                sleep_with_stop(options.monitor_interval, &stop);
                continue;
            }
        };

        // The buffer head is the next position regardless of content.
        if let Some(head) = buffer_next_usn(&buffer[..bytes.min(buffer.len())]) {
            next_usn = head;
        }

        if bytes > 8 {
            let mut walker = walk_records(&buffer, bytes);
            let mut stopped = false;
            for record in &mut walker {
                if stop.load(Ordering::Acquire) {
                    stopped = true;
                    break;
                }

                if options.is_excluded(&record.file_name) {
                    continue;
                }
                let Some(event) = builder.build(&record) else {
                    continue;
                };
                let usn = event.usn;

                if !send_with_stop(&sender, event, &stop) {
                    stopped = true;
                    break;
                }

                emitted_since_save += 1;
                if emitted_since_save >= options.cursor_save_interval {
                    cursor.set(&volume, usn);
                    if let Err(e) = cursor.save() {
                        warn!(volume = %volume, error = %e, "Cursor save failed");
                    }
                    emitted_since_save = 0;
                }
            }

            if stopped {
                // Leave the cursor where it was so the partial batch is
                // re-read (idempotently) on restart.
                break;
            }
        }

        cursor.set(&volume, next_usn);
        if let Err(e) = cursor.save() {
            warn!(volume = %volume, error = %e, "Cursor save failed");
        }

        sleep_with_stop(options.monitor_interval, &stop);
    }

    // Quiescence: flush the cursor, then release the handle via drop.
    if let Err(e) = cursor.save() {
        warn!(volume = %volume, error = %e, "Final cursor save failed");
    }
    drop(handle);
    info!(volume = %volume, "Journal reader stopped");
}

/// Query journal metadata, creating the journal once if absent.
fn query_or_create(handle: &VolumeHandle) -> Result<crate::volume::JournalData> {
    match handle.query_journal() {
        Ok(journal) => Ok(journal),
        Err(EngramError::JournalAbsent { volume }) => {
            info!(volume = %volume, "No journal, creating with defaults");
            handle.create_journal(DEFAULT_JOURNAL_MAX_SIZE, DEFAULT_JOURNAL_ALLOCATION_DELTA)?;
            handle.query_journal()
        }
        Err(e) => Err(e),
    }
}

/// Blocking send with stop checks; returns false if stopping.
fn send_with_stop(
    sender: &Sender<ActivityEvent>,
    mut event: ActivityEvent,
    stop: &AtomicBool,
) -> bool {
    loop {
        match sender.send_timeout(event, SEND_SLICE) {
            Ok(()) => return true,
            Err(SendTimeoutError::Timeout(returned)) => {
                if stop.load(Ordering::Acquire) {
                    debug!("Stop raised while queue full, dropping unsent event for replay");
                    return false;
                }
                event = returned;
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                warn!("Event queue disconnected");
                return false;
            }
        }
    }
}

fn sleep_with_stop(interval: Duration, stop: &AtomicBool) {
    let mut remaining = interval;
    while !stop.load(Ordering::Acquire) && remaining > Duration::ZERO {
        let slice = remaining.min(Duration::from_millis(100));
        std::thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}

/// Reader threads for every monitored volume of one collector.
pub struct JournalCollector {
    readers: Vec<VolumeReader>,
}

impl JournalCollector {
    /// Spawn one reader per volume.
    pub fn start(
        volumes: Vec<String>,
        options: ReaderOptions,
        sender: Sender<ActivityEvent>,
        cursor: Arc<CursorFile>,
        stop: Arc<AtomicBool>,
    ) -> Result<Self> {
        let mut readers = Vec::with_capacity(volumes.len());
        for volume in volumes {
            readers.push(VolumeReader::spawn(
                volume,
                options.clone(),
                sender.clone(),
                cursor.clone(),
                stop.clone(),
            )?);
        }
        Ok(JournalCollector { readers })
    }

    pub fn volumes(&self) -> Vec<String> {
        self.readers.iter().map(|r| r.volume().to_string()).collect()
    }

    /// Wait for every reader to reach quiescence.
    pub fn join(self) {
        for reader in self.readers {
            reader.join();
        }
    }
}
