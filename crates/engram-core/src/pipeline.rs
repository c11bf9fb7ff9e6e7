//! Event-processing pipeline.
//!
//! Journal readers produce normalized events into one bounded channel;
//! a single processing task drains it into the hot tier. The bound is the
//! backpressure mechanism: when the hot tier falls behind, producers block
//! on send rather than dropping events, and the persisted cursor trailing
//! the queue head means nothing is lost across a restart.
//!
//! Per-record failures are isolated and counted. A fatal backend error
//! disables further writes until restart; the processor then drains and
//! counts events instead of writing them, and reports one summary line
//! per minute rather than one per failure.

use crate::error::EngramError;
use crate::hot::HotTierRecorder;
use crate::types::ActivityEvent;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How long the processor blocks on the queue before re-checking stop.
const RECV_TIMEOUT: Duration = Duration::from_millis(200);

/// Minimum spacing between failure summary log lines.
const FAILURE_SUMMARY_INTERVAL: Duration = Duration::from_secs(60);

/// Create the bounded event queue shared by readers and the processor.
pub fn event_queue(capacity: usize) -> (Sender<ActivityEvent>, Receiver<ActivityEvent>) {
    bounded(capacity)
}

/// Shared counters observable while the processor runs.
#[derive(Debug, Default)]
pub struct ProcessorCounters {
    pub processed: AtomicU64,
    pub failed_transient: AtomicU64,
    pub failed_serialization: AtomicU64,
    pub dropped_after_fatal: AtomicU64,
}

impl ProcessorCounters {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn total_failed(&self) -> u64 {
        self.failed_transient.load(Ordering::Relaxed)
            + self.failed_serialization.load(Ordering::Relaxed)
            + self.dropped_after_fatal.load(Ordering::Relaxed)
    }
}

/// Handle to the running processor task.
pub struct EventProcessor {
    thread: Option<JoinHandle<()>>,
    counters: Arc<ProcessorCounters>,
}

impl EventProcessor {
    /// Spawn the processing task over `receiver`.
    pub fn spawn(
        hot: Arc<HotTierRecorder>,
        receiver: Receiver<ActivityEvent>,
        stop: Arc<AtomicBool>,
    ) -> EventProcessor {
        let counters = Arc::new(ProcessorCounters::default());
        let counters_clone = counters.clone();

        let thread = std::thread::Builder::new()
            .name("engram-event-processor".to_string())
            .spawn(move || process_loop(hot, receiver, stop, counters_clone))
            .expect("failed to spawn event processor thread");

        EventProcessor {
            thread: Some(thread),
            counters,
        }
    }

    pub fn counters(&self) -> Arc<ProcessorCounters> {
        self.counters.clone()
    }

    /// Wait for the processor to drain and exit.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for EventProcessor {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn process_loop(
    hot: Arc<HotTierRecorder>,
    receiver: Receiver<ActivityEvent>,
    stop: Arc<AtomicBool>,
    counters: Arc<ProcessorCounters>,
) {
    info!("Event processor started");
    let mut writes_disabled = false;
    let mut last_summary = Instant::now();
    let mut failures_since_summary: u64 = 0;

    loop {
        let event = match receiver.recv_timeout(RECV_TIMEOUT) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        if let Some(event) = event {
            handle_event(
                &hot,
                event,
                &counters,
                &mut writes_disabled,
                &mut failures_since_summary,
            );
        } else if stop.load(Ordering::Acquire) {
            break;
        }

        if failures_since_summary > 0 && last_summary.elapsed() >= FAILURE_SUMMARY_INTERVAL {
            warn!(
                transient = counters.failed_transient.load(Ordering::Relaxed),
                serialization = counters.failed_serialization.load(Ordering::Relaxed),
                dropped = counters.dropped_after_fatal.load(Ordering::Relaxed),
                "Ingest failures in the last interval"
            );
            last_summary = Instant::now();
            failures_since_summary = 0;
        }
    }

    // Drain whatever is still queued so the cursor never runs ahead of
    // the persisted activities.
    while let Ok(event) = receiver.try_recv() {
        handle_event(
            &hot,
            event,
            &counters,
            &mut writes_disabled,
            &mut failures_since_summary,
        );
    }

    info!(
        processed = counters.processed(),
        failed = counters.total_failed(),
        "Event processor stopped"
    );
}

fn handle_event(
    hot: &HotTierRecorder,
    event: ActivityEvent,
    counters: &ProcessorCounters,
    writes_disabled: &mut bool,
    failures_since_summary: &mut u64,
) {
    if *writes_disabled {
        counters.dropped_after_fatal.fetch_add(1, Ordering::Relaxed);
        *failures_since_summary += 1;
        return;
    }

    match hot.record_event(event) {
        Ok(_) => {
            counters.processed.fetch_add(1, Ordering::Relaxed);
        }
        Err(EngramError::BackendFatal(reason)) => {
            error!(%reason, "Fatal backend error, disabling hot-tier writes until restart");
            *writes_disabled = true;
            counters.dropped_after_fatal.fetch_add(1, Ordering::Relaxed);
            *failures_since_summary += 1;
        }
        Err(EngramError::BackendTransient(_)) => {
            counters.failed_transient.fetch_add(1, Ordering::Relaxed);
            *failures_since_summary += 1;
        }
        Err(e) => {
            warn!(error = %e, "Event failed to record");
            counters.failed_serialization.fetch_add(1, Ordering::Relaxed);
            *failures_since_summary += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityResolver;
    use crate::store::{DocumentStore, MemoryStore, Query};
    use crate::types::{activity_id_for, frn_hex, ActivityKind, USN_REASON_FILE_CREATE};
    use chrono::Utc;

    fn hot() -> (Arc<dyn DocumentStore>, Arc<HotTierRecorder>) {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let resolver = Arc::new(EntityResolver::new(store.clone()).unwrap());
        let hot = Arc::new(HotTierRecorder::new(store.clone(), resolver, 4).unwrap());
        (store, hot)
    }

    fn event(usn: i64) -> ActivityEvent {
        ActivityEvent {
            activity_id: activity_id_for("C:", usn),
            volume_name: "C:".to_string(),
            file_name: format!("f{}.txt", usn),
            file_path: format!("C:\\f{}.txt", usn),
            is_directory: false,
            file_reference_number: frn_hex(usn as u64),
            parent_file_reference_number: frn_hex(5),
            activity_type: ActivityKind::Create,
            reason_flags: USN_REASON_FILE_CREATE,
            // Distinct per-event timestamps keep sort order observable.
            timestamp: Utc::now() + chrono::Duration::milliseconds(usn),
            usn,
            attributes: serde_json::Map::new(),
        }
    }

    #[test]
    fn processes_queued_events_and_drains_on_stop() {
        let (store, hot) = hot();
        let (tx, rx) = event_queue(16);
        let stop = Arc::new(AtomicBool::new(false));

        let processor = EventProcessor::spawn(hot, rx, stop.clone());
        let counters = processor.counters();

        for usn in 0..10 {
            tx.send(event(usn)).unwrap();
        }

        stop.store(true, Ordering::Release);
        drop(tx);
        processor.join();

        assert_eq!(counters.processed(), 10);
        assert_eq!(counters.total_failed(), 0);
        assert_eq!(
            store
                .count(crate::hot::HOT_COLLECTION, &Query::new())
                .unwrap(),
            10
        );
    }

    #[test]
    fn producer_order_is_preserved() {
        let (store, hot) = hot();
        let (tx, rx) = event_queue(64);
        let stop = Arc::new(AtomicBool::new(false));

        let processor = EventProcessor::spawn(hot, rx, stop.clone());
        for usn in 0..50 {
            tx.send(event(usn)).unwrap();
        }
        stop.store(true, Ordering::Release);
        drop(tx);
        processor.join();

        let docs = store
            .find(
                crate::hot::HOT_COLLECTION,
                &Query::new().sort_asc("timestamp"),
            )
            .unwrap();
        let usns: Vec<i64> = docs
            .iter()
            .filter_map(|d| d.get("usn").and_then(serde_json::Value::as_i64))
            .collect();
        let mut sorted = usns.clone();
        sorted.sort_unstable();
        assert_eq!(usns, sorted);
    }
}
