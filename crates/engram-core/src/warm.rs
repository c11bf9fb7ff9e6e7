//! Warm-tier recorder.
//!
//! The warm tier keeps aged activity for a month by default, trading
//! fidelity for footprint. Incoming hot-tier records are re-scored with
//! the warm weight set, partitioned by importance class, and the
//! medium/low classes are aggregated by `(entity, kind, time window)`.
//! High-importance records are preserved one-to-one and never aggregated.
//!
//! Aggregated records satisfy three invariants: `count` equals the number
//! of source ids, the time range is `[timestamp, end_timestamp]`, and the
//! importance is the maximum across members.

use crate::entity::EntityResolver;
use crate::error::{with_retry, Result};
use crate::scoring::ImportanceScorer;
use crate::store::{DocumentStore, Query};
use crate::types::{ActivityKind, HotRecord, WarmRecord, ACTIVITY_ID_NAMESPACE};
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default warm-tier collection name.
pub const WARM_COLLECTION: &str = "ntfs_activities_warm";

/// Groups smaller than this may fall back to individual retention.
const MIN_AGGREGATION_GROUP: usize = 3;

/// Importance class boundaries.
#[derive(Debug, Clone, Copy)]
pub struct ImportanceThresholds {
    /// At or above: kept one-to-one, never aggregated.
    pub high: f64,
    /// At or above (but below high): moderate aggregation.
    pub medium: f64,
}

impl Default for ImportanceThresholds {
    fn default() -> Self {
        ImportanceThresholds {
            high: 0.7,
            medium: 0.4,
        }
    }
}

/// Retention class assigned to a record at transition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportanceClass {
    High,
    Medium,
    Low,
}

impl ImportanceThresholds {
    pub fn classify(&self, score: f64) -> ImportanceClass {
        if score >= self.high {
            ImportanceClass::High
        } else if score >= self.medium {
            ImportanceClass::Medium
        } else {
            ImportanceClass::Low
        }
    }
}

/// Aggregate statistics over the warm tier.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmTierStatistics {
    pub total_count: u64,
    pub aggregated_count: u64,
    pub individual_count: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_importance: BTreeMap<String, u64>,
    pub by_day: BTreeMap<String, u64>,
    /// Sum of `count` over aggregated records: how many source events the
    /// tier represents.
    pub count_sum: u64,
    pub count_avg: f64,
    pub count_min: u32,
    pub count_max: u32,
    pub ttl_days: i64,
}

/// Stores aged activity compactly and serves warm-tier queries.
pub struct WarmTierRecorder {
    store: Arc<dyn DocumentStore>,
    resolver: Arc<EntityResolver>,
    scorer: ImportanceScorer,
    collection: String,
    ttl: Duration,
    aggregation_window_hours: u32,
    thresholds: ImportanceThresholds,
}

impl WarmTierRecorder {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        resolver: Arc<EntityResolver>,
        ttl_days: u32,
        aggregation_window_hours: u32,
    ) -> Result<Self> {
        store.ensure_collection(WARM_COLLECTION)?;
        for field in ["timestamp", "entity_id", "activity_type", "is_aggregated"] {
            if let Err(e) = store.ensure_hash_index(WARM_COLLECTION, field) {
                warn!(field, error = %e, "Warm-tier index creation failed, using linear scans");
            }
        }
        store.ensure_ttl_index(WARM_COLLECTION, "ttl_timestamp")?;

        Ok(WarmTierRecorder {
            store,
            resolver,
            scorer: ImportanceScorer::warm(),
            collection: WARM_COLLECTION.to_string(),
            ttl: Duration::days(ttl_days as i64),
            aggregation_window_hours: aggregation_window_hours.clamp(1, 24),
            thresholds: ImportanceThresholds::default(),
        })
    }

    /// Override the importance class boundaries.
    pub fn with_thresholds(mut self, thresholds: ImportanceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn thresholds(&self) -> ImportanceThresholds {
        self.thresholds
    }

    /// Re-score a hot-tier record with the warm weight set and current
    /// entity metadata.
    pub fn rescore(&self, record: &HotRecord, now: DateTime<Utc>) -> f64 {
        let entity = self.resolver.get(record.entity_id).unwrap_or_default();
        self.scorer
            .score(&record.event, entity.as_ref(), record.search_hits, now)
    }

    /// Turn a batch of hot-tier records into warm-tier records.
    ///
    /// Already-transitioned records are skipped, so replaying a batch is a
    /// no-op. The returned records are not yet stored.
    pub fn process_batch(&self, records: Vec<HotRecord>, now: DateTime<Utc>) -> Vec<WarmRecord> {
        let mut high = Vec::new();
        let mut medium = Vec::new();
        let mut low = Vec::new();

        for record in records {
            if record.transitioned {
                continue;
            }
            let score = self.rescore(&record, now);
            match self.thresholds.classify(score) {
                ImportanceClass::High => high.push((record, score)),
                ImportanceClass::Medium => medium.push((record, score)),
                ImportanceClass::Low => low.push((record, score)),
            }
        }

        debug!(
            high = high.len(),
            medium = medium.len(),
            low = low.len(),
            "Importance distribution for warm transition"
        );

        let mut out: Vec<WarmRecord> = high
            .into_iter()
            .map(|(record, score)| self.individual_record(record, score, now))
            .collect();
        out.extend(self.aggregate(medium, now));
        out.extend(self.aggregate(low, now));
        out
    }

    /// Persist warm records. Serialization or write failures are fatal for
    /// the single record only; the rest of the batch continues.
    pub fn store_records(&self, records: &[WarmRecord]) -> usize {
        let mut stored = 0;
        for record in records {
            let key = record.activity_id.to_string();
            let doc = match serde_json::to_value(record) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(error = %e, activity = %record.activity_id, "Warm record serialization failed");
                    continue;
                }
            };
            match with_retry(|| self.store.put(&self.collection, &key, doc.clone())) {
                Ok(()) => stored += 1,
                Err(e) => warn!(error = %e, activity = %record.activity_id, "Warm record write failed"),
            }
        }
        stored
    }

    /// Aggregation group key: entity, kind, and the calendar-day time
    /// window the event falls in.
    pub fn group_key(&self, entity_id: Uuid, kind: ActivityKind, timestamp: DateTime<Utc>) -> String {
        let window = timestamp.hour() / self.aggregation_window_hours;
        format!(
            "{}_{}_{}_{}",
            entity_id,
            kind,
            timestamp.format("%Y-%m-%d"),
            window
        )
    }

    fn individual_record(&self, record: HotRecord, score: f64, now: DateTime<Utc>) -> WarmRecord {
        let group = self.group_key(
            record.entity_id,
            record.event.activity_type,
            record.event.timestamp,
        );
        let event = record.event;
        WarmRecord {
            activity_id: event.activity_id,
            entity_id: record.entity_id,
            volume_name: event.volume_name,
            file_name: event.file_name,
            file_path: event.file_path,
            is_directory: event.is_directory,
            file_reference_number: event.file_reference_number,
            parent_file_reference_number: event.parent_file_reference_number,
            activity_type: event.activity_type,
            reason_flags: event.reason_flags,
            timestamp: event.timestamp,
            end_timestamp: event.timestamp,
            usn: event.usn,
            importance_score: score,
            search_hits: record.search_hits,
            is_aggregated: false,
            count: 1,
            aggregation_group: group,
            original_ids: vec![event.activity_id],
            ttl_timestamp: now + self.ttl,
            attributes: event.attributes,
        }
    }

    /// Group scored records by `(entity, kind, window)` and build one
    /// aggregated record per group.
    ///
    /// Groups below [`MIN_AGGREGATION_GROUP`] whose lead member still
    /// scores at the high threshold fall back to individual retention.
    fn aggregate(&self, scored: Vec<(HotRecord, f64)>, now: DateTime<Utc>) -> Vec<WarmRecord> {
        let mut groups: BTreeMap<String, Vec<(HotRecord, f64)>> = BTreeMap::new();
        for (record, score) in scored {
            let key = self.group_key(
                record.entity_id,
                record.event.activity_type,
                record.event.timestamp,
            );
            groups.entry(key).or_default().push((record, score));
        }

        let mut out = Vec::with_capacity(groups.len());
        for (key, mut members) in groups {
            members.sort_by_key(|(record, _)| record.event.timestamp);

            if members.len() < MIN_AGGREGATION_GROUP {
                let lead_score = members[0].1;
                if lead_score >= self.thresholds.high {
                    out.extend(
                        members
                            .into_iter()
                            .map(|(record, score)| self.individual_record(record, score, now)),
                    );
                    continue;
                }
            }

            out.push(self.aggregated_record(key, members, now));
        }
        out
    }

    fn aggregated_record(
        &self,
        key: String,
        members: Vec<(HotRecord, f64)>,
        now: DateTime<Utc>,
    ) -> WarmRecord {
        // Members arrive sorted by timestamp; the first is the lead.
        let start = members.first().map(|(r, _)| r.event.timestamp).unwrap_or(now);
        let end = members.last().map(|(r, _)| r.event.timestamp).unwrap_or(now);
        let max_score = members
            .iter()
            .map(|(_, score)| *score)
            .fold(f64::MIN, f64::max);
        let total_hits: u32 = members.iter().map(|(r, _)| r.search_hits).sum();
        let original_ids: Vec<Uuid> = members
            .iter()
            .map(|(r, _)| r.event.activity_id)
            .collect();

        let (lead, _) = &members[0];
        let mut attributes = lead.event.attributes.clone();
        attributes.insert("aggregated_count".into(), original_ids.len().into());

        WarmRecord {
            // Deterministic over the group key, so a replayed batch
            // overwrites rather than duplicates.
            activity_id: Uuid::new_v5(&ACTIVITY_ID_NAMESPACE, key.as_bytes()),
            entity_id: lead.entity_id,
            volume_name: lead.event.volume_name.clone(),
            file_name: lead.event.file_name.clone(),
            file_path: lead.event.file_path.clone(),
            is_directory: lead.event.is_directory,
            file_reference_number: lead.event.file_reference_number.clone(),
            parent_file_reference_number: lead.event.parent_file_reference_number.clone(),
            activity_type: lead.event.activity_type,
            reason_flags: lead.event.reason_flags,
            timestamp: start,
            end_timestamp: end,
            usn: lead.event.usn,
            importance_score: max_score,
            search_hits: total_hits,
            is_aggregated: true,
            count: original_ids.len() as u32,
            aggregation_group: key,
            original_ids,
            ttl_timestamp: now + self.ttl,
            attributes,
        }
    }

    /// Fetch a warm-tier record by key.
    pub fn get(&self, activity_id: Uuid) -> Result<Option<WarmRecord>> {
        match self.store.get(&self.collection, &activity_id.to_string())? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Warm records of one kind, newest first.
    pub fn records_by_type(
        &self,
        kind: ActivityKind,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WarmRecord>> {
        self.find_records(
            Query::new()
                .filter_eq("activity_type", kind.as_str())
                .sort_desc("timestamp")
                .limit(limit)
                .offset(offset),
        )
    }

    /// Warm records within an inclusive UTC time window, newest first.
    ///
    /// Aggregated records match when their `[timestamp, end_timestamp]`
    /// range overlaps the window.
    pub fn records_by_time_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WarmRecord>> {
        use crate::store::FilterOp;
        use crate::types::ts_string;

        self.find_records(
            Query::new()
                .filter("end_timestamp", FilterOp::Ge, ts_string(&start))
                .filter("timestamp", FilterOp::Le, ts_string(&end))
                .sort_desc("timestamp")
                .limit(limit)
                .offset(offset),
        )
    }

    /// Warm records filtered by aggregation status, newest first.
    pub fn records_by_aggregation(
        &self,
        aggregated: bool,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<WarmRecord>> {
        self.find_records(
            Query::new()
                .filter_eq("is_aggregated", aggregated)
                .sort_desc("timestamp")
                .limit(limit)
                .offset(offset),
        )
    }

    /// Totals by kind, importance bucket, aggregation status, time bucket,
    /// and aggregation size statistics.
    pub fn statistics(&self) -> Result<WarmTierStatistics> {
        let docs = self.store.find(&self.collection, &Query::new())?;
        let now = Utc::now();

        let mut stats = WarmTierStatistics {
            ttl_days: self.ttl.num_days(),
            count_min: u32::MAX,
            ..Default::default()
        };
        let mut aggregated_sizes: Vec<u32> = Vec::new();

        for doc in &docs {
            stats.total_count += 1;

            let aggregated = doc.get("is_aggregated").and_then(serde_json::Value::as_bool)
                == Some(true);
            if aggregated {
                stats.aggregated_count += 1;
                if let Some(count) = doc.get("count").and_then(serde_json::Value::as_u64) {
                    aggregated_sizes.push(count as u32);
                }
            } else {
                stats.individual_count += 1;
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
                *stats.by_day.entry(format!("{} days ago", days)).or_default() += 1;
            }
        }

        if aggregated_sizes.is_empty() {
            stats.count_min = 0;
        } else {
            stats.count_sum = aggregated_sizes.iter().map(|c| *c as u64).sum();
            stats.count_avg = stats.count_sum as f64 / aggregated_sizes.len() as f64;
            stats.count_min = *aggregated_sizes.iter().min().unwrap();
            stats.count_max = *aggregated_sizes.iter().max().unwrap();
        }

        info!(
            total = stats.total_count,
            aggregated = stats.aggregated_count,
            represented = stats.count_sum,
            "Warm-tier statistics computed"
        );
        Ok(stats)
    }

    fn find_records(&self, query: Query) -> Result<Vec<WarmRecord>> {
        let docs = self.store.find(&self.collection, &query)?;
        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            match serde_json::from_value::<WarmRecord>(doc) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "Skipping undecodable warm-tier document"),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{activity_id_for, frn_hex, ActivityEvent};
    use chrono::TimeZone;

    fn recorder() -> (Arc<dyn DocumentStore>, WarmTierRecorder) {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let resolver = Arc::new(EntityResolver::new(store.clone()).unwrap());
        let warm = WarmTierRecorder::new(store.clone(), resolver, 30, 6).unwrap();
        (store, warm)
    }

    fn hot_record(
        usn: i64,
        kind: ActivityKind,
        path: &str,
        entity_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> HotRecord {
        let name = path.rsplit('\\').next().unwrap().to_string();
        HotRecord {
            event: ActivityEvent {
                activity_id: activity_id_for("C:", usn),
                volume_name: "C:".to_string(),
                file_name: name,
                file_path: path.to_string(),
                is_directory: false,
                file_reference_number: frn_hex(50),
                parent_file_reference_number: frn_hex(5),
                activity_type: kind,
                reason_flags: 0,
                timestamp,
                usn,
                attributes: serde_json::Map::new(),
            },
            entity_id,
            importance_score: 0.5,
            search_hits: 0,
            ttl_timestamp: timestamp + Duration::days(4),
            transitioned: false,
        }
    }

    #[test]
    fn low_importance_group_aggregates() {
        let (_, warm) = recorder();
        let entity_id = Uuid::new_v4();
        // Five modifies in one 6-hour window, 13+ hours old, temp path.
        let base = Utc.with_ymd_and_hms(2026, 7, 30, 2, 0, 0).unwrap();
        let now = base + Duration::hours(14);

        let records: Vec<HotRecord> = (0..5)
            .map(|i| {
                hot_record(
                    1000 + i,
                    ActivityKind::Modify,
                    "C:\\Temp\\cache\\x.tmp",
                    entity_id,
                    base + Duration::minutes(i * 10),
                )
            })
            .collect();

        let out = warm.process_batch(records, now);
        assert_eq!(out.len(), 1);
        let agg = &out[0];
        assert!(agg.is_aggregated);
        assert_eq!(agg.count, 5);
        assert_eq!(agg.original_ids.len(), 5);
        assert!(agg.timestamp <= agg.end_timestamp);
        assert_eq!(agg.end_timestamp - agg.timestamp, Duration::minutes(40));
        assert!(agg.importance_score < 0.4);
        assert!(agg.ttl_timestamp > agg.end_timestamp);
    }

    #[test]
    fn aggregated_importance_is_member_max() {
        let (_, warm) = recorder();
        let entity_id = Uuid::new_v4();
        let base = Utc.with_ymd_and_hms(2026, 7, 30, 2, 0, 0).unwrap();
        let now = base + Duration::hours(14);

        let records: Vec<HotRecord> = (0..4)
            .map(|i| {
                // Different paths would split groups, so vary time only.
                hot_record(
                    2000 + i,
                    ActivityKind::Modify,
                    "C:\\Temp\\x.log",
                    entity_id,
                    base + Duration::minutes(i),
                )
            })
            .collect();

        let expected_max = records
            .iter()
            .map(|r| warm.rescore(r, now))
            .fold(f64::MIN, f64::max);

        let out = warm.process_batch(records, now);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].importance_score, expected_max);
    }

    #[test]
    fn windows_split_groups() {
        let (_, warm) = recorder();
        let entity_id = Uuid::new_v4();
        let day = Utc.with_ymd_and_hms(2026, 7, 30, 0, 0, 0).unwrap();
        let now = day + Duration::hours(30);

        // Hours 2 and 9 land in different 6-hour windows.
        let records = vec![
            hot_record(1, ActivityKind::Modify, "C:\\Temp\\a.log", entity_id, day + Duration::hours(2)),
            hot_record(2, ActivityKind::Modify, "C:\\Temp\\a.log", entity_id, day + Duration::hours(2) + Duration::minutes(1)),
            hot_record(3, ActivityKind::Modify, "C:\\Temp\\a.log", entity_id, day + Duration::hours(2) + Duration::minutes(2)),
            hot_record(4, ActivityKind::Modify, "C:\\Temp\\a.log", entity_id, day + Duration::hours(9)),
            hot_record(5, ActivityKind::Modify, "C:\\Temp\\a.log", entity_id, day + Duration::hours(9) + Duration::minutes(1)),
            hot_record(6, ActivityKind::Modify, "C:\\Temp\\a.log", entity_id, day + Duration::hours(9) + Duration::minutes(2)),
        ];

        let out = warm.process_batch(records, now);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.count == 3));
        // Distinct groups get distinct deterministic ids
        assert_ne!(out[0].activity_id, out[1].activity_id);
    }

    #[test]
    fn high_importance_is_kept_individually() {
        let (_, warm) = recorder();
        let warm = warm.with_thresholds(ImportanceThresholds {
            high: 0.45,
            medium: 0.3,
        });
        let entity_id = Uuid::new_v4();
        let now = Utc::now();

        // Fresh creates of an important document clear the high bar.
        let records: Vec<HotRecord> = (0..3)
            .map(|i| {
                hot_record(
                    3000 + i,
                    ActivityKind::Create,
                    "C:\\Documents\\thesis\\report.docx",
                    entity_id,
                    now - Duration::minutes(5 - i),
                )
            })
            .collect();

        let rescored: Vec<f64> = records.iter().map(|r| warm.rescore(r, now)).collect();
        assert!(rescored.iter().all(|s| *s >= 0.45), "scores: {:?}", rescored);

        let out = warm.process_batch(records, now);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|r| !r.is_aggregated && r.count == 1));
        assert!(out.iter().all(|r| r.original_ids.len() == 1));
        assert!(out.iter().all(|r| r.timestamp == r.end_timestamp));
    }

    #[test]
    fn transitioned_records_are_skipped() {
        let (_, warm) = recorder();
        let entity_id = Uuid::new_v4();
        let now = Utc::now();

        let mut record = hot_record(
            4000,
            ActivityKind::Modify,
            "C:\\Temp\\y.log",
            entity_id,
            now - Duration::hours(13),
        );
        record.transitioned = true;

        let out = warm.process_batch(vec![record], now);
        assert!(out.is_empty());
    }

    #[test]
    fn store_and_query_warm_records() {
        let (_, warm) = recorder();
        let entity_id = Uuid::new_v4();
        let base = Utc.with_ymd_and_hms(2026, 7, 30, 2, 0, 0).unwrap();
        let now = base + Duration::hours(14);

        let records: Vec<HotRecord> = (0..5)
            .map(|i| {
                hot_record(
                    5000 + i,
                    ActivityKind::Modify,
                    "C:\\Temp\\cache\\z.tmp",
                    entity_id,
                    base + Duration::minutes(i),
                )
            })
            .collect();

        let out = warm.process_batch(records, now);
        assert_eq!(warm.store_records(&out), out.len());

        let by_type = warm.records_by_type(ActivityKind::Modify, 10, 0).unwrap();
        assert_eq!(by_type.len(), 1);

        let aggregated = warm.records_by_aggregation(true, 10, 0).unwrap();
        assert_eq!(aggregated.len(), 1);
        assert_eq!(warm.records_by_aggregation(false, 10, 0).unwrap().len(), 0);

        // Any window overlapping the aggregate's time range matches it.
        let windowed = warm
            .records_by_time_window(base + Duration::minutes(2), base + Duration::hours(1), 10, 0)
            .unwrap();
        assert_eq!(windowed.len(), 1);
        let outside = warm
            .records_by_time_window(base + Duration::hours(2), base + Duration::hours(3), 10, 0)
            .unwrap();
        assert!(outside.is_empty());

        let stats = warm.statistics().unwrap();
        assert_eq!(stats.total_count, 1);
        assert_eq!(stats.aggregated_count, 1);
        assert_eq!(stats.count_sum, 5);
        assert_eq!(stats.count_min, 5);
        assert_eq!(stats.count_max, 5);
        assert!((stats.count_avg - 5.0).abs() < 1e-9);
    }

    #[test]
    fn replayed_group_overwrites_instead_of_duplicating() {
        let (store, warm) = recorder();
        let entity_id = Uuid::new_v4();
        let base = Utc.with_ymd_and_hms(2026, 7, 30, 2, 0, 0).unwrap();
        let now = base + Duration::hours(14);

        let make = || -> Vec<HotRecord> {
            (0..5)
                .map(|i| {
                    hot_record(
                        6000 + i,
                        ActivityKind::Modify,
                        "C:\\Temp\\w.tmp",
                        entity_id,
                        base + Duration::minutes(i),
                    )
                })
                .collect()
        };

        let first = warm.process_batch(make(), now);
        warm.store_records(&first);
        let second = warm.process_batch(make(), now);
        warm.store_records(&second);

        assert_eq!(store.count(WARM_COLLECTION, &Query::new()).unwrap(), 1);
    }
}
