//! Monitor command - watch volumes and record activity.

use crate::app::App;
use engram_backend_ntfs::{enumerate_ntfs_volumes, JournalCollector, ReaderOptions};
use engram_core::cursor::CursorFile;
use engram_core::pipeline::{event_queue, EventProcessor};
use engram_core::store::memory::spawn_ttl_sweeper;
use engram_core::Config;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Sweep cadence matching the one-minute TTL expiry bound.
const TTL_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the monitor command until Ctrl-C.
pub fn run(config: Config, volume_filter: Vec<String>, no_transitions: bool) -> anyhow::Result<()> {
    let app = App::new(config)?;

    // Pick volumes: explicit list, or every NTFS volume passing config.
    let volumes: Vec<String> = if volume_filter.is_empty() {
        enumerate_ntfs_volumes()?
            .into_iter()
            .map(|v| v.mount_point)
            .filter(|m| app.config.should_monitor_volume(m))
            .collect()
    } else {
        volume_filter
    };

    if volumes.is_empty() {
        anyhow::bail!("no NTFS volumes to monitor");
    }

    println!("Monitoring volumes: {}", volumes.join(", "));
    println!("Press Ctrl+C to stop.");

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            println!("\nShutting down...");
            stop.store(true, Ordering::Release);
        })?;
    }

    // Bounded queue between readers and the hot tier; a full queue
    // blocks the readers rather than dropping events.
    let (sender, receiver) = event_queue(app.config.monitor.queue_size);
    let processor = EventProcessor::spawn(app.hot.clone(), receiver, stop.clone());
    let counters = processor.counters();

    let cursor = Arc::new(CursorFile::load_or_new(app.cursor_path()?, Uuid::new_v4()));
    let collector = JournalCollector::start(
        volumes,
        ReaderOptions::from_config(&app.config),
        sender,
        cursor.clone(),
        stop.clone(),
    )?;

    // The in-process store has no native TTL index; the sweeper stands in.
    let sweeper = spawn_ttl_sweeper(app.store.clone(), TTL_SWEEP_INTERVAL, stop.clone());

    // Scheduled hot-to-warm transitions on their own thread.
    let transition_thread = if no_transitions {
        None
    } else {
        let manager = app.transition_manager(false)?;
        let interval = Duration::from_secs(app.config.tiers.interval_minutes * 60);
        let stop = stop.clone();
        Some(std::thread::Builder::new()
            .name("engram-transitions".to_string())
            .spawn(move || manager.run_scheduled(interval, stop))?)
    };

    // Wait for shutdown: readers first (they flush cursors), then the
    // processor drains the queue, then the periodic tasks.
    collector.join();
    processor.join();
    if let Some(thread) = transition_thread {
        let _ = thread.join();
    }
    let _ = sweeper.join();
    cursor.save()?;

    info!(
        processed = counters.processed(),
        failed = counters.total_failed(),
        "Monitoring stopped"
    );
    println!(
        "Recorded {} activities ({} failures).",
        counters.processed(),
        counters.total_failed()
    );
    Ok(())
}
