//! Hot-tier recorder.
//!
//! The hot tier holds every normalized event at full fidelity for a short
//! window (4 days by default). The contract: for every event, exactly one
//! hot-tier document exists until TTL expiry or transition. Document keys
//! are deterministic over `(volume, usn)`, so re-ingesting a journal
//! segment is idempotent.
//!
//! Ingest enhances each event with a TTL timestamp, an initial importance
//! score, and a zeroed search-hit counter, binds it to a stable entity,
//! and updates entity metadata best-effort: a resolver failure is logged
//! and counted but never blocks the activity write.

use crate::entity::EntityResolver;
use crate::error::{with_retry, Result};
use crate::scoring::ImportanceScorer;
use crate::store::{DocumentStore, FilterOp, Query};
use crate::types::{ts_string, ActivityEvent, ActivityKind, HotRecord};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default hot-tier collection name.
pub const HOT_COLLECTION: &str = "ntfs_activities_hot";

/// Recent activities touched by [`HotTierRecorder::mark_entity_searched`].
const SEARCH_FEEDBACK_LIMIT: usize = 10;

/// Per-call boost applied to an entity by search feedback.
const SEARCH_FEEDBACK_BOOST: f64 = 0.05;

/// Aggregate statistics over the hot tier.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HotTierStatistics {
    pub total_count: u64,
    pub transitioned_count: u64,
    /// Counts keyed by activity kind name.
    pub by_type: BTreeMap<String, u64>,
    /// Counts keyed by importance bucket (`floor(score * 10) / 10`).
    pub by_importance: BTreeMap<String, u64>,
    /// Counts keyed by age in whole days.
    pub by_day: BTreeMap<String, u64>,
    pub ttl_days: i64,
}

/// Outcome of a batch ingest.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub stored: Vec<Uuid>,
    pub failed: usize,
}

/// Records normalized events into the hot tier and serves its queries.
pub struct HotTierRecorder {
    store: Arc<dyn DocumentStore>,
    resolver: Arc<EntityResolver>,
    scorer: ImportanceScorer,
    collection: String,
    ttl: Duration,
}

impl HotTierRecorder {
    /// Create a recorder, declaring the collection and its indices.
    ///
    /// Index-creation failures are reported but not fatal; queries fall
    /// back to linear plans.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        resolver: Arc<EntityResolver>,
        ttl_days: u32,
    ) -> Result<Self> {
        store.ensure_collection(HOT_COLLECTION)?;
        for field in ["timestamp", "file_reference_number", "entity_id", "activity_type"] {
            if let Err(e) = store.ensure_hash_index(HOT_COLLECTION, field) {
                warn!(field, error = %e, "Hot-tier index creation failed, using linear scans");
            }
        }
        store.ensure_ttl_index(HOT_COLLECTION, "ttl_timestamp")?;

        Ok(HotTierRecorder {
            store,
            resolver,
            scorer: ImportanceScorer::hot(),
            collection: HOT_COLLECTION.to_string(),
            ttl: Duration::days(ttl_days as i64),
        })
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    /// Ingest one normalized event. Returns the hot-tier document key.
    pub fn record_event(&self, event: ActivityEvent) -> Result<Uuid> {
        let now = Utc::now();

        // Bind to a stable entity. A resolution failure falls back to a
        // fresh id so the activity itself is never lost.
        let entity_id = match self.resolver.resolve_or_create(
            &event.volume_name,
            &event.file_reference_number,
            &event.file_path,
            event.is_directory,
            now,
        ) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, file = %event.file_name, "Entity resolution failed, using fallback id");
                Uuid::new_v4()
            }
        };

        let entity = self.resolver.get(entity_id).unwrap_or_default();
        let importance_score = self.scorer.score(&event, entity.as_ref(), 0, now);

        // TTL is anchored past the event timestamp even under clock skew.
        let ttl_timestamp = now.max(event.timestamp) + self.ttl;

        let record = HotRecord {
            entity_id,
            importance_score,
            search_hits: 0,
            ttl_timestamp,
            transitioned: false,
            event,
        };

        let key = record.event.activity_id.to_string();
        let doc = serde_json::to_value(&record)?;
        with_retry(|| self.store.put(&self.collection, &key, doc.clone()))?;

        // Metadata update is best-effort.
        if let Err(e) = self.resolver.update_metadata(entity_id, &record.event) {
            warn!(error = %e, %entity_id, "Entity metadata update failed");
        }

        debug!(
            activity_id = %record.event.activity_id,
            kind = %record.event.activity_type,
            score = importance_score,
            "Recorded hot-tier activity"
        );
        Ok(record.event.activity_id)
    }

    /// Ingest a batch. Per-record failures are isolated: one failed
    /// insert never aborts the batch.
    pub fn record_batch(&self, events: impl IntoIterator<Item = ActivityEvent>) -> IngestReport {
        let mut report = IngestReport::default();
        for event in events {
            match self.record_event(event) {
                Ok(id) => report.stored.push(id),
                Err(e) => {
                    warn!(error = %e, "Failed to record activity");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Load newline-delimited JSON events captured offline.
    pub fn ingest_jsonl(&self, path: &Path) -> Result<IngestReport> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);

        let mut report = IngestReport::default();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ActivityEvent>(&line) {
                Ok(event) => match self.record_event(event) {
                    Ok(id) => report.stored.push(id),
                    Err(e) => {
                        warn!(error = %e, line = line_no + 1, "Failed to record imported activity");
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    warn!(error = %e, line = line_no + 1, "Skipping malformed JSONL line");
                    report.failed += 1;
                }
            }
        }
        info!(
            path = %path.display(),
            stored = report.stored.len(),
            failed = report.failed,
            "JSONL import finished"
        );
        Ok(report)
    }

    /// Fetch a hot-tier record by key.
    pub fn get(&self, activity_id: Uuid) -> Result<Option<HotRecord>> {
        match self.store.get(&self.collection, &activity_id.to_string())? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Activities for an entity, newest first.
    pub fn activities_by_entity(
        &self,
        entity_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HotRecord>> {
        self.find_records(
            Query::new()
                .filter_eq("entity_id", entity_id.to_string())
                .sort_desc("timestamp")
                .limit(limit)
                .offset(offset),
        )
    }

    /// Activities within an inclusive UTC time window, newest first.
    pub fn activities_by_time_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HotRecord>> {
        self.find_records(
            Query::new()
                .filter("timestamp", FilterOp::Ge, ts_string(&start))
                .filter("timestamp", FilterOp::Le, ts_string(&end))
                .sort_desc("timestamp")
                .limit(limit)
                .offset(offset),
        )
    }

    /// Activities from the last `hours` hours, newest first.
    pub fn recent_activities(&self, hours: u32, limit: usize, offset: usize) -> Result<Vec<HotRecord>> {
        let now = Utc::now();
        self.activities_by_time_window(now - Duration::hours(hours as i64), now, limit, offset)
    }

    /// Activities of one kind, newest first.
    pub fn activities_by_type(
        &self,
        kind: ActivityKind,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<HotRecord>> {
        self.find_records(
            Query::new()
                .filter_eq("activity_type", kind.as_str())
                .sort_desc("timestamp")
                .limit(limit)
                .offset(offset),
        )
    }

    /// Atomically bump the search-hit counter for an activity. The count
    /// feeds back into importance at transition time.
    pub fn increment_search_hit(&self, activity_id: Uuid) -> Result<u32> {
        let hits = with_retry(|| {
            self.store
                .increment(&self.collection, &activity_id.to_string(), "search_hits", 1)
        })?;
        Ok(hits.max(0) as u32)
    }

    /// Query-feedback hook: a search surfaced this entity.
    ///
    /// Bumps search hits on the entity's recent activities and raises the
    /// entity's importance boost.
    pub fn mark_entity_searched(&self, entity_id: Uuid) -> Result<()> {
        for record in self.activities_by_entity(entity_id, SEARCH_FEEDBACK_LIMIT, 0)? {
            if let Err(e) = self.increment_search_hit(record.event.activity_id) {
                warn!(error = %e, activity = %record.event.activity_id, "Search-hit bump failed");
            }
        }
        self.resolver.boost_importance(entity_id, SEARCH_FEEDBACK_BOOST)
    }

    /// Transition-ready records: older than `age_threshold` and not yet
    /// transitioned, in ascending timestamp order.
    pub fn find_transition_candidates(
        &self,
        age_threshold: Duration,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<HotRecord>> {
        let threshold = now - age_threshold;
        self.find_records(
            Query::new()
                .filter("timestamp", FilterOp::Le, ts_string(&threshold))
                .filter_eq("transitioned", false)
                .sort_asc("timestamp")
                .limit(batch_size),
        )
    }

    /// Count records eligible for transition at the base threshold.
    pub fn count_transition_ready(&self, age_threshold: Duration, now: DateTime<Utc>) -> Result<u64> {
        let threshold = now - age_threshold;
        self.store.count(
            &self.collection,
            &Query::new()
                .filter("timestamp", FilterOp::Le, ts_string(&threshold))
                .filter_eq("transitioned", false),
        )
    }

    /// Mark source records as preserved in the warm tier.
    ///
    /// Returns how many documents were updated; already-missing documents
    /// (expired between selection and mark) are skipped.
    pub fn mark_transitioned(&self, activity_ids: &[Uuid], at: DateTime<Utc>) -> Result<usize> {
        let mut marked = 0;
        for id in activity_ids {
            let key = id.to_string();
            let patch = serde_json::json!({
                "transitioned": true,
                "transition_time": ts_string(&at),
            });
            match self.store.merge(&self.collection, &key, patch) {
                Ok(()) => marked += 1,
                Err(e) => {
                    if self.store.get(&self.collection, &key)?.is_none() {
                        debug!(activity = %id, "Source record expired before transition mark");
                    } else {
                        return Err(e);
                    }
                }
            }
        }
        Ok(marked)
    }

    /// Totals by kind, importance bucket, and day-of-age.
    pub fn statistics(&self) -> Result<HotTierStatistics> {
        let docs = self.store.find(&self.collection, &Query::new())?;
        let now = Utc::now();

        let mut stats = HotTierStatistics {
            ttl_days: self.ttl.num_days(),
            ..Default::default()
        };

        for doc in &docs {
            stats.total_count += 1;

            if doc.get("transitioned").and_then(serde_json::Value::as_bool) == Some(true) {
                stats.transitioned_count += 1;
            }

            if let Some(kind) = doc.get("activity_type").and_then(serde_json::Value::as_str) {
                *stats.by_type.entry(kind.to_string()).or_default() += 1;
            }

            if let Some(score) = doc.get("importance_score").and_then(serde_json::Value::as_f64) {
                let bucket = format!("{:.1}", (score * 10.0).floor() / 10.0);
                *stats.by_importance.entry(bucket).or_default() += 1;
            }

            if let Some(ts) = doc
                .get("timestamp")
                .and_then(serde_json::Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            {
                let days = (now - ts.with_timezone(&Utc)).num_days().max(0);
                *stats
                    .by_day
                    .entry(format!("{} days ago", days))
                    .or_default() += 1;
            }
        }

        Ok(stats)
    }

    fn find_records(&self, query: Query) -> Result<Vec<HotRecord>> {
        let docs = self.store.find(&self.collection, &query)?;
        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            match serde_json::from_value::<HotRecord>(doc) {
                Ok(record) => records.push(record),
                // A malformed document fails alone; the query continues.
                Err(e) => warn!(error = %e, "Skipping undecodable hot-tier document"),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{
        activity_id_for, frn_hex, USN_REASON_CLOSE, USN_REASON_DATA_EXTEND, USN_REASON_FILE_CREATE,
    };

    fn recorder() -> HotTierRecorder {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let resolver = Arc::new(EntityResolver::new(store.clone()).unwrap());
        HotTierRecorder::new(store, resolver, 4).unwrap()
    }

    fn event(usn: i64, reason_flags: u32, name: &str, frn: u64) -> ActivityEvent {
        ActivityEvent {
            activity_id: activity_id_for("C:", usn),
            volume_name: "C:".to_string(),
            file_name: name.to_string(),
            file_path: format!("C:\\{}", name),
            is_directory: false,
            file_reference_number: frn_hex(frn),
            parent_file_reference_number: frn_hex(5),
            activity_type: ActivityKind::from_reason_flags(reason_flags),
            reason_flags,
            timestamp: Utc::now(),
            usn,
            attributes: serde_json::Map::new(),
        }
    }

    #[test]
    fn create_modify_close_share_an_entity() {
        let recorder = recorder();

        let ids = [
            recorder.record_event(event(100, USN_REASON_FILE_CREATE, "notes.txt", 77)).unwrap(),
            recorder.record_event(event(108, USN_REASON_DATA_EXTEND, "notes.txt", 77)).unwrap(),
            recorder.record_event(event(116, USN_REASON_CLOSE, "notes.txt", 77)).unwrap(),
        ];

        let records: Vec<HotRecord> = ids
            .iter()
            .map(|id| recorder.get(*id).unwrap().unwrap())
            .collect();

        assert_eq!(records[0].event.activity_type, ActivityKind::Create);
        assert_eq!(records[1].event.activity_type, ActivityKind::Modify);
        assert_eq!(records[2].event.activity_type, ActivityKind::Close);

        // All three bind to the same entity
        assert_eq!(records[0].entity_id, records[1].entity_id);
        assert_eq!(records[1].entity_id, records[2].entity_id);

        // The create outscores the close
        assert!(records[0].importance_score > records[2].importance_score);

        // Invariants hold on every record
        for r in &records {
            assert!((0.1..=1.0).contains(&r.importance_score));
            assert!(r.ttl_timestamp > r.event.timestamp);
            assert!(!r.transitioned);
            assert_eq!(r.search_hits, 0);
        }
    }

    #[test]
    fn reingest_is_idempotent() {
        let recorder = recorder();
        let ev = event(500, USN_REASON_FILE_CREATE, "dup.txt", 80);

        let first = recorder.record_event(ev.clone()).unwrap();
        let second = recorder.record_event(ev).unwrap();

        assert_eq!(first, second);
        let count = recorder
            .store
            .count(HOT_COLLECTION, &Query::new())
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn query_surface() {
        let recorder = recorder();
        recorder.record_event(event(1, USN_REASON_FILE_CREATE, "a.txt", 10)).unwrap();
        recorder.record_event(event(2, USN_REASON_DATA_EXTEND, "a.txt", 10)).unwrap();
        recorder.record_event(event(3, USN_REASON_FILE_CREATE, "b.txt", 11)).unwrap();

        let creates = recorder.activities_by_type(ActivityKind::Create, 10, 0).unwrap();
        assert_eq!(creates.len(), 2);

        let entity_id = creates
            .iter()
            .find(|r| r.event.file_name == "a.txt")
            .unwrap()
            .entity_id;
        let by_entity = recorder.activities_by_entity(entity_id, 10, 0).unwrap();
        assert_eq!(by_entity.len(), 2);
        // Newest first
        assert!(by_entity[0].event.timestamp >= by_entity[1].event.timestamp);

        let recent = recorder.recent_activities(1, 10, 0).unwrap();
        assert_eq!(recent.len(), 3);

        let paged = recorder.recent_activities(1, 2, 2).unwrap();
        assert_eq!(paged.len(), 1);
    }

    #[test]
    fn search_hits_increment_and_feed_back() {
        let recorder = recorder();
        let id = recorder.record_event(event(9, USN_REASON_FILE_CREATE, "hit.txt", 12)).unwrap();

        assert_eq!(recorder.increment_search_hit(id).unwrap(), 1);
        assert_eq!(recorder.increment_search_hit(id).unwrap(), 2);
        assert_eq!(recorder.get(id).unwrap().unwrap().search_hits, 2);

        let entity_id = recorder.get(id).unwrap().unwrap().entity_id;
        recorder.mark_entity_searched(entity_id).unwrap();
        assert_eq!(recorder.get(id).unwrap().unwrap().search_hits, 3);
        let entity = recorder.resolver.get(entity_id).unwrap().unwrap();
        assert!(entity.properties.importance_boost > 0.0);
    }

    #[test]
    fn transition_candidates_respect_age_and_flag() {
        let recorder = recorder();
        let now = Utc::now();

        let mut old = event(100, USN_REASON_DATA_EXTEND, "old.txt", 20);
        old.timestamp = now - Duration::hours(13);
        let mut fresh = event(200, USN_REASON_DATA_EXTEND, "fresh.txt", 21);
        fresh.timestamp = now - Duration::hours(1);

        let old_id = recorder.record_event(old).unwrap();
        recorder.record_event(fresh).unwrap();

        let candidates = recorder
            .find_transition_candidates(Duration::hours(12), 100, now)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].event.activity_id, old_id);

        // Marked records stop being candidates.
        recorder.mark_transitioned(&[old_id], now).unwrap();
        let candidates = recorder
            .find_transition_candidates(Duration::hours(12), 100, now)
            .unwrap();
        assert!(candidates.is_empty());
        assert!(recorder.get(old_id).unwrap().unwrap().transitioned);
    }

    #[test]
    fn statistics_bucket_correctly() {
        let recorder = recorder();
        recorder.record_event(event(1, USN_REASON_FILE_CREATE, "a.md", 30)).unwrap();
        recorder.record_event(event(2, USN_REASON_DATA_EXTEND, "a.md", 30)).unwrap();

        let stats = recorder.statistics().unwrap();
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.by_type.get("create"), Some(&1));
        assert_eq!(stats.by_type.get("modify"), Some(&1));
        assert_eq!(stats.ttl_days, 4);
        assert_eq!(stats.by_day.get("0 days ago"), Some(&2));
        assert_eq!(stats.by_importance.values().sum::<u64>(), 2);
    }

    #[test]
    fn ingest_jsonl_roundtrip() {
        let recorder = recorder();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.jsonl");

        let lines: Vec<String> = (0..3)
            .map(|i| {
                serde_json::to_string(&event(i, USN_REASON_FILE_CREATE, &format!("f{}.txt", i), 40 + i as u64))
                    .unwrap()
            })
            .collect();
        std::fs::write(&path, format!("{}\nnot-json\n", lines.join("\n"))).unwrap();

        let report = recorder.ingest_jsonl(&path).unwrap();
        assert_eq!(report.stored.len(), 3);
        assert_eq!(report.failed, 1);
    }
}
