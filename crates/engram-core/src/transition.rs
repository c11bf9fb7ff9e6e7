//! Hot → warm tier transitions.
//!
//! The transition manager batches aged hot-tier records into the warm
//! tier. Ordering makes an in-progress batch atomic from the outside:
//! warm records are written first, and only then are the hot sources
//! marked `transitioned`. A crash between the two steps re-selects the
//! same sources on restart, and the deterministic warm keys overwrite
//! rather than duplicate.
//!
//! Candidate selection scales the age threshold by importance class:
//! high-importance records linger in the hot tier twice as long, while
//! low-importance records leave at half the base age.

use crate::error::Result;
use crate::hot::HotTierRecorder;
use crate::types::{HotRecord, WarmRecord};
use crate::warm::{ImportanceClass, WarmTierRecorder};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Transition tuning, derived from [`crate::config::TierConfig`].
#[derive(Debug, Clone)]
pub struct TransitionConfig {
    pub age_threshold: Duration,
    pub high_importance_age_multiplier: f64,
    pub low_importance_age_multiplier: f64,
    pub batch_size: usize,
    pub max_batches: u32,
    pub pause: std::time::Duration,
    /// Snapshot root; None disables snapshots.
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for TransitionConfig {
    fn default() -> Self {
        TransitionConfig {
            age_threshold: Duration::hours(12),
            high_importance_age_multiplier: 2.0,
            low_importance_age_multiplier: 0.5,
            batch_size: 1000,
            max_batches: 10,
            pause: std::time::Duration::from_secs(5),
            snapshot_dir: None,
        }
    }
}

impl TransitionConfig {
    pub fn from_tier_config(tiers: &crate::config::TierConfig, snapshot_dir: Option<PathBuf>) -> Self {
        TransitionConfig {
            age_threshold: Duration::hours(tiers.age_threshold_hours as i64),
            high_importance_age_multiplier: tiers.high_importance_age_multiplier,
            low_importance_age_multiplier: tiers.low_importance_age_multiplier,
            batch_size: tiers.batch_size,
            max_batches: tiers.max_batches,
            pause: std::time::Duration::from_secs(tiers.pause_seconds),
            snapshot_dir: if tiers.snapshots { snapshot_dir } else { None },
        }
    }

    /// Age a record of the given class must reach before it transitions.
    fn threshold_for(&self, class: ImportanceClass) -> Duration {
        let multiplier = match class {
            ImportanceClass::High => self.high_importance_age_multiplier,
            ImportanceClass::Medium => 1.0,
            ImportanceClass::Low => self.low_importance_age_multiplier,
        };
        let seconds = (self.age_threshold.num_seconds() as f64 * multiplier).round() as i64;
        Duration::seconds(seconds.max(0))
    }

    /// The loosest threshold; used to pre-filter candidates.
    fn selection_threshold(&self) -> Duration {
        self.threshold_for(ImportanceClass::Low)
            .min(self.threshold_for(ImportanceClass::Medium))
            .min(self.threshold_for(ImportanceClass::High))
    }
}

/// Result of one transition batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub batch_number: u32,
    pub found: usize,
    pub transitioned: usize,
    pub duration_ms: u64,
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    NotReady,
}

/// Result of a multi-batch transition run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub batches: Vec<BatchResult>,
    pub total_found: usize,
    pub total_transitioned: usize,
}

/// Point-in-time view of both tiers for operators.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionStats {
    pub status: &'static str,
    pub hot_total: u64,
    pub hot_transition_ready: u64,
    pub hot_already_transitioned: u64,
    pub warm_total: u64,
    pub warm_aggregated: u64,
    pub warm_individual: u64,
    /// Source events represented by aggregated warm records.
    pub warm_represented: u64,
}

/// Orchestrates batched hot → warm moves.
pub struct TransitionManager {
    hot: Arc<HotTierRecorder>,
    warm: Arc<WarmTierRecorder>,
    config: TransitionConfig,
}

impl TransitionManager {
    pub fn new(
        hot: Arc<HotTierRecorder>,
        warm: Arc<WarmTierRecorder>,
        config: TransitionConfig,
    ) -> Self {
        // A snapshot directory may hold debris from a crashed run.
        if let Some(root) = &config.snapshot_dir {
            if let Err(e) = discard_partial_snapshots(root) {
                warn!(error = %e, "Could not clean partial snapshots");
            }
        }
        TransitionManager { hot, warm, config }
    }

    /// Both recorders initialized and their backing store reachable.
    pub fn check_readiness(&self) -> bool {
        let ready = self.hot.store().is_live() && self.warm.store().is_live();
        if !ready {
            warn!("Transition manager not ready: backing store unreachable");
        }
        ready
    }

    /// Current transition state of both tiers.
    pub fn stats(&self) -> Result<TransitionStats> {
        if !self.check_readiness() {
            return Ok(TransitionStats {
                status: "not_ready",
                hot_total: 0,
                hot_transition_ready: 0,
                hot_already_transitioned: 0,
                warm_total: 0,
                warm_aggregated: 0,
                warm_individual: 0,
                warm_represented: 0,
            });
        }

        let hot_stats = self.hot.statistics()?;
        let warm_stats = self.warm.statistics()?;
        let ready = self
            .hot
            .count_transition_ready(self.config.age_threshold, Utc::now())?;

        Ok(TransitionStats {
            status: if ready > 0 { "pending_transition" } else { "ready" },
            hot_total: hot_stats.total_count,
            hot_transition_ready: ready,
            hot_already_transitioned: hot_stats.transitioned_count,
            warm_total: warm_stats.total_count,
            warm_aggregated: warm_stats.aggregated_count,
            warm_individual: warm_stats.individual_count,
            warm_represented: warm_stats.count_sum,
        })
    }

    /// Transition one batch. Returns `(candidates_found, transitioned)`.
    ///
    /// Performs no writes when the backing store is unreachable.
    pub fn transition_batch(&self, now: DateTime<Utc>) -> Result<(usize, usize)> {
        if !self.check_readiness() {
            return Ok((0, 0));
        }

        let candidates = self.hot.find_transition_candidates(
            self.config.selection_threshold(),
            self.config.batch_size,
            now,
        )?;
        if candidates.is_empty() {
            debug!("No transition-ready records");
            return Ok((0, 0));
        }
        let found = candidates.len();

        // Apply the class-scaled age threshold to each candidate.
        let thresholds = self.warm.thresholds();
        let selected: Vec<HotRecord> = candidates
            .into_iter()
            .filter(|record| {
                let class = thresholds.classify(self.warm.rescore(record, now));
                now - record.event.timestamp >= self.config.threshold_for(class)
            })
            .collect();

        if selected.is_empty() {
            debug!(found, "All candidates deferred by importance-scaled age thresholds");
            return Ok((found, 0));
        }

        let warm_records = self.warm.process_batch(selected.clone(), now);

        if let Some(root) = &self.config.snapshot_dir {
            if let Err(e) = write_snapshot(root, now, &selected, &warm_records) {
                warn!(error = %e, "Snapshot write failed, continuing transition");
            }
        }

        // Warm writes happen before the hot-side mark so a crash between
        // the two re-runs this batch instead of losing it.
        let stored = self.warm.store_records(&warm_records);

        let selected_ids: Vec<_> = selected.iter().map(|r| r.event.activity_id).collect();
        let marked = self.hot.mark_transitioned(&selected_ids, now)?;

        info!(
            found,
            selected = selected.len(),
            warm_records = warm_records.len(),
            stored,
            marked,
            "Transition batch complete"
        );
        Ok((found, selected.len()))
    }

    /// Run up to `max_batches` batches with pauses between them.
    pub fn run(&self) -> RunReport {
        self.run_with_stop(&AtomicBool::new(false))
    }

    /// Run a full transition, checking the stop signal between batches.
    pub fn run_with_stop(&self, stop: &AtomicBool) -> RunReport {
        if !self.check_readiness() {
            return RunReport {
                status: RunStatus::NotReady,
                batches: Vec::new(),
                total_found: 0,
                total_transitioned: 0,
            };
        }

        let mut report = RunReport {
            status: RunStatus::Success,
            batches: Vec::new(),
            total_found: 0,
            total_transitioned: 0,
        };

        for batch_number in 1..=self.config.max_batches {
            if stop.load(Ordering::Acquire) {
                break;
            }

            let started = std::time::Instant::now();
            let (found, transitioned) = match self.transition_batch(Utc::now()) {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, batch_number, "Transition batch failed");
                    (0, 0)
                }
            };

            report.batches.push(BatchResult {
                batch_number,
                found,
                transitioned,
                duration_ms: started.elapsed().as_millis() as u64,
            });
            report.total_found += found;
            report.total_transitioned += transitioned;

            if found == 0 {
                debug!("No more transition-ready records, stopping run");
                break;
            }

            if batch_number < self.config.max_batches && !stop.load(Ordering::Acquire) {
                std::thread::sleep(self.config.pause);
            }
        }

        info!(
            batches = report.batches.len(),
            found = report.total_found,
            transitioned = report.total_transitioned,
            "Transition run complete"
        );
        report
    }

    /// Run transitions on a fixed interval until the stop signal.
    ///
    /// If a run overruns the interval, the next run starts immediately;
    /// missed runs are not coalesced into extra ones.
    pub fn run_scheduled(&self, interval: std::time::Duration, stop: Arc<AtomicBool>) {
        info!(interval_secs = interval.as_secs(), "Scheduled transitions started");
        while !stop.load(Ordering::Acquire) {
            let started = std::time::Instant::now();
            self.run_with_stop(&stop);

            let elapsed = started.elapsed();
            if elapsed >= interval {
                debug!(?elapsed, "Transition run overran its interval, starting next immediately");
                continue;
            }

            let mut remaining = interval - elapsed;
            while !stop.load(Ordering::Acquire) && remaining > std::time::Duration::ZERO {
                let slice = remaining.min(std::time::Duration::from_millis(200));
                std::thread::sleep(slice);
                remaining = remaining.saturating_sub(slice);
            }
        }
        info!("Scheduled transitions stopped");
    }
}

/// Write `hot.jsonl` and `warm.jsonl` under a timestamped directory.
///
/// Each file is written to a `.tmp` name and renamed once complete, so a
/// crash mid-write leaves debris that [`discard_partial_snapshots`]
/// removes on the next startup.
pub fn write_snapshot(
    root: &Path,
    now: DateTime<Utc>,
    hot_records: &[HotRecord],
    warm_records: &[WarmRecord],
) -> Result<PathBuf> {
    // Compact ISO8601; ':' is not allowed in Windows file names.
    let dir = root.join(now.format("%Y%m%dT%H%M%S%3fZ").to_string());
    fs::create_dir_all(&dir)?;

    write_jsonl(&dir.join("hot.jsonl"), hot_records)?;
    write_jsonl(&dir.join("warm.jsonl"), warm_records)?;

    info!(dir = %dir.display(), hot = hot_records.len(), warm = warm_records.len(), "Snapshot written");
    Ok(dir)
}

fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let temp_path = path.with_extension("jsonl.tmp");
    {
        let file = fs::File::create(&temp_path)?;
        let mut writer = std::io::BufWriter::new(file);
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Remove snapshot directories left half-written by a crash.
///
/// A directory is partial if it contains any `.tmp` file.
pub fn discard_partial_snapshots(root: &Path) -> Result<usize> {
    if !root.exists() {
        return Ok(0);
    }

    let mut discarded = 0;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        let dir = entry.path();
        let partial = fs::read_dir(&dir)?.any(|f| {
            f.ok()
                .map(|f| f.path().extension().is_some_and(|ext| ext == "tmp"))
                .unwrap_or(false)
        });

        if partial {
            warn!(dir = %dir.display(), "Discarding partial snapshot");
            fs::remove_dir_all(&dir)?;
            discarded += 1;
        }
    }
    Ok(discarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityResolver;
    use crate::store::{DocumentStore, MemoryStore, Query};
    use crate::types::{activity_id_for, frn_hex, ActivityEvent, ActivityKind};
    use crate::warm::WARM_COLLECTION;
    use tempfile::TempDir;

    fn setup(snapshot_dir: Option<PathBuf>) -> (Arc<HotTierRecorder>, Arc<WarmTierRecorder>, TransitionManager) {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let resolver = Arc::new(EntityResolver::new(store.clone()).unwrap());
        let hot = Arc::new(HotTierRecorder::new(store.clone(), resolver.clone(), 4).unwrap());
        let warm = Arc::new(WarmTierRecorder::new(store, resolver, 30, 6).unwrap());
        let config = TransitionConfig {
            pause: std::time::Duration::ZERO,
            snapshot_dir,
            ..Default::default()
        };
        let manager = TransitionManager::new(hot.clone(), warm.clone(), config);
        (hot, warm, manager)
    }

    fn aged_event(usn: i64, hours_old: i64, name: &str, frn: u64) -> ActivityEvent {
        ActivityEvent {
            activity_id: activity_id_for("C:", usn),
            volume_name: "C:".to_string(),
            file_name: name.to_string(),
            file_path: format!("C:\\Temp\\{}", name),
            is_directory: false,
            file_reference_number: frn_hex(frn),
            parent_file_reference_number: frn_hex(5),
            activity_type: ActivityKind::Modify,
            reason_flags: crate::types::USN_REASON_DATA_EXTEND,
            timestamp: Utc::now() - Duration::hours(hours_old),
            usn,
            attributes: serde_json::Map::new(),
        }
    }

    #[test]
    fn batch_moves_aged_records() {
        let (hot, warm, manager) = setup(None);

        // Five aged low-importance modifies on one file plus one fresh one.
        for i in 0..5 {
            hot.record_event(aged_event(100 + i, 13, "churn.log", 60)).unwrap();
        }
        hot.record_event(aged_event(200, 1, "fresh.log", 61)).unwrap();

        let (found, transitioned) = manager.transition_batch(Utc::now()).unwrap();
        assert_eq!(found, 5);
        assert_eq!(transitioned, 5);

        // Sources are marked; the fresh record is untouched.
        let remaining = hot
            .find_transition_candidates(Duration::hours(6), 100, Utc::now())
            .unwrap();
        assert!(remaining.is_empty());

        // One aggregated warm record materialized... unless the five spread
        // across a window boundary, in which case two.
        let stats = warm.statistics().unwrap();
        assert!(stats.total_count >= 1);
        assert_eq!(stats.count_sum, 5);
    }

    #[test]
    fn rerun_is_noop() {
        let (hot, warm, manager) = setup(None);
        for i in 0..5 {
            hot.record_event(aged_event(300 + i, 13, "again.log", 62)).unwrap();
        }

        let (_, first) = manager.transition_batch(Utc::now()).unwrap();
        assert_eq!(first, 5);

        let (found, second) = manager.transition_batch(Utc::now()).unwrap();
        assert_eq!(found, 0);
        assert_eq!(second, 0);

        let warm_count = warm
            .store()
            .count(WARM_COLLECTION, &Query::new())
            .unwrap();
        assert!(warm_count >= 1);
    }

    #[test]
    fn run_processes_until_empty() {
        let (hot, _, manager) = setup(None);
        for i in 0..5 {
            hot.record_event(aged_event(400 + i, 13, "bulk.log", 63)).unwrap();
        }

        let report = manager.run();
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.total_transitioned, 5);
        // Second batch finds nothing and ends the run early.
        assert!(report.batches.len() <= 2);
    }

    #[test]
    fn snapshots_are_written_and_complete() {
        let dir = TempDir::new().unwrap();
        let (hot, _, manager) = setup(Some(dir.path().to_path_buf()));
        for i in 0..5 {
            hot.record_event(aged_event(500 + i, 13, "snap.log", 64)).unwrap();
        }

        manager.transition_batch(Utc::now()).unwrap();

        let snapshot_dirs: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(snapshot_dirs.len(), 1);
        let snapshot = snapshot_dirs[0].as_ref().unwrap().path();
        assert!(snapshot.join("hot.jsonl").exists());
        assert!(snapshot.join("warm.jsonl").exists());

        let hot_lines = fs::read_to_string(snapshot.join("hot.jsonl")).unwrap();
        assert_eq!(hot_lines.lines().count(), 5);
        // Every line parses back
        for line in hot_lines.lines() {
            let _: HotRecord = serde_json::from_str(line).unwrap();
        }
    }

    #[test]
    fn partial_snapshots_are_discarded_on_startup() {
        let dir = TempDir::new().unwrap();
        let partial = dir.path().join("20260730T020000000Z");
        fs::create_dir_all(&partial).unwrap();
        fs::write(partial.join("hot.jsonl.tmp"), "{}").unwrap();

        let complete = dir.path().join("20260730T030000000Z");
        fs::create_dir_all(&complete).unwrap();
        fs::write(complete.join("hot.jsonl"), "{}\n").unwrap();
        fs::write(complete.join("warm.jsonl"), "{}\n").unwrap();

        let discarded = discard_partial_snapshots(dir.path()).unwrap();
        assert_eq!(discarded, 1);
        assert!(!partial.exists());
        assert!(complete.exists());
    }

    #[test]
    fn importance_scaled_thresholds() {
        let config = TransitionConfig::default();
        assert_eq!(config.threshold_for(ImportanceClass::High), Duration::hours(24));
        assert_eq!(config.threshold_for(ImportanceClass::Medium), Duration::hours(12));
        assert_eq!(config.threshold_for(ImportanceClass::Low), Duration::hours(6));
        assert_eq!(config.selection_threshold(), Duration::hours(6));
    }

    #[test]
    fn stats_reflect_pending_work() {
        let (hot, _, manager) = setup(None);
        hot.record_event(aged_event(900, 13, "pending.log", 65)).unwrap();

        let stats = manager.stats().unwrap();
        assert_eq!(stats.status, "pending_transition");
        assert_eq!(stats.hot_total, 1);
        assert_eq!(stats.hot_transition_ready, 1);

        manager.transition_batch(Utc::now()).unwrap();
        let stats = manager.stats().unwrap();
        assert_eq!(stats.status, "ready");
        assert_eq!(stats.hot_already_transitioned, 1);
    }
}
