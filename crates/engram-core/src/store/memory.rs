//! In-process document store.
//!
//! `MemoryStore` implements the [`DocumentStore`](super::DocumentStore)
//! contract with plain maps behind a read-write lock. It backs the test
//! suite and standalone operation where no external document database is
//! configured.
//!
//! TTL expiry has no native backend here, so it is realized by a sweeper:
//! [`MemoryStore::sweep_expired`] removes documents whose TTL field is in
//! the past, and [`spawn_ttl_sweeper`] runs that on an interval. The
//! observable behavior matches a native TTL index within one sweep period.

use super::{compare_values, lookup_path, matches_filter, Document, DocumentStore, Query, SortOrder};
use crate::error::{EngramError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Collection {
    docs: BTreeMap<String, Document>,
    hash_indexes: HashSet<String>,
    ttl_field: Option<String>,
}

/// In-memory implementation of the document-store contract.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Hash-index fields declared on a collection (introspection; the
    /// in-memory store answers every query by scan regardless).
    pub fn declared_indexes(&self, collection: &str) -> Vec<String> {
        self.collections
            .read()
            .get(collection)
            .map(|c| {
                let mut fields: Vec<String> = c.hash_indexes.iter().cloned().collect();
                fields.sort();
                fields
            })
            .unwrap_or_default()
    }

    /// Remove expired documents from every collection with a TTL index.
    ///
    /// Returns the number of documents expired. Documents whose TTL field
    /// is absent or unparseable are left alone.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut collections = self.collections.write();
        let mut expired = 0;

        for (name, collection) in collections.iter_mut() {
            let Some(ttl_field) = collection.ttl_field.clone() else {
                continue;
            };

            let dead: Vec<String> = collection
                .docs
                .iter()
                .filter(|(_, doc)| {
                    lookup_path(doc, &ttl_field)
                        .and_then(Value::as_str)
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                        .map(|ttl| ttl.with_timezone(&Utc) < now)
                        .unwrap_or(false)
                })
                .map(|(key, _)| key.clone())
                .collect();

            if !dead.is_empty() {
                debug!(collection = %name, count = dead.len(), "Expiring documents past TTL");
            }
            for key in dead {
                collection.docs.remove(&key);
                expired += 1;
            }
        }

        expired
    }

    fn with_collection<T>(&self, name: &str, f: impl FnOnce(&Collection) -> T) -> Result<T> {
        let collections = self.collections.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| EngramError::BackendFatal(format!("unknown collection: {}", name)))?;
        Ok(f(collection))
    }

    fn with_collection_mut<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Collection) -> Result<T>,
    ) -> Result<T> {
        let mut collections = self.collections.write();
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| EngramError::BackendFatal(format!("unknown collection: {}", name)))?;
        f(collection)
    }
}

/// Walk (and create) the object chain down to the parent of a dotted
/// field path.
fn parent_object<'a>(
    doc: &'a mut Value,
    segments: &[&str],
) -> crate::error::Result<&'a mut serde_json::Map<String, Value>> {
    match segments.split_first() {
        None => doc
            .as_object_mut()
            .ok_or_else(|| EngramError::BackendFatal("document is not an object".into())),
        Some((head, rest)) => {
            let map = doc
                .as_object_mut()
                .ok_or_else(|| EngramError::BackendFatal(format!("{} is not an object", head)))?;
            let child = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
            parent_object(child, rest)
        }
    }
}

/// Deep-merge `patch` into `target`: object fields merge recursively,
/// anything else is replaced.
fn deep_merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match target_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, patch_value),
                    None => {
                        target_map.insert(key, patch_value);
                    }
                }
            }
        }
        (slot, patch) => *slot = patch,
    }
}

impl DocumentStore for MemoryStore {
    fn ensure_collection(&self, collection: &str) -> Result<()> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    fn put(&self, collection: &str, key: &str, doc: Document) -> Result<()> {
        self.with_collection_mut(collection, |c| {
            c.docs.insert(key.to_string(), doc);
            Ok(())
        })
    }

    fn get(&self, collection: &str, key: &str) -> Result<Option<Document>> {
        self.with_collection(collection, |c| c.docs.get(key).cloned())
    }

    fn merge(&self, collection: &str, key: &str, patch: Document) -> Result<()> {
        self.with_collection_mut(collection, |c| {
            let doc = c.docs.get_mut(key).ok_or_else(|| {
                EngramError::BackendFatal(format!("merge on missing key {}/{}", collection, key))
            })?;
            deep_merge(doc, patch);
            Ok(())
        })
    }

    fn remove(&self, collection: &str, key: &str) -> Result<bool> {
        self.with_collection_mut(collection, |c| Ok(c.docs.remove(key).is_some()))
    }

    fn increment(&self, collection: &str, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.with_collection_mut(collection, |c| {
            let doc = c.docs.get_mut(key).ok_or_else(|| {
                EngramError::BackendFatal(format!(
                    "increment on missing key {}/{}",
                    collection, key
                ))
            })?;

            let segments: Vec<&str> = field.split('.').collect();
            let leaf = segments[segments.len() - 1];
            let map = parent_object(doc, &segments[..segments.len() - 1])?;

            let new_value = map
                .get(leaf)
                .and_then(Value::as_i64)
                .unwrap_or(0)
                .saturating_add(delta);
            map.insert(leaf.to_string(), Value::from(new_value));
            Ok(new_value)
        })
    }

    fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        self.with_collection(collection, |c| {
            let mut matches: Vec<Document> = c
                .docs
                .values()
                .filter(|doc| query.filters.iter().all(|f| matches_filter(doc, f)))
                .cloned()
                .collect();

            if let Some((field, order)) = &query.sort {
                matches.sort_by(|a, b| {
                    let ord = match (lookup_path(a, field), lookup_path(b, field)) {
                        (Some(x), Some(y)) => compare_values(x, y),
                        (Some(_), None) => std::cmp::Ordering::Greater,
                        (None, Some(_)) => std::cmp::Ordering::Less,
                        (None, None) => std::cmp::Ordering::Equal,
                    };
                    match order {
                        SortOrder::Asc => ord,
                        SortOrder::Desc => ord.reverse(),
                    }
                });
            }

            let mut results: Vec<Document> = matches.into_iter().skip(query.offset).collect();
            if let Some(limit) = query.limit {
                results.truncate(limit);
            }
            results
        })
    }

    fn count(&self, collection: &str, query: &Query) -> Result<u64> {
        self.with_collection(collection, |c| {
            c.docs
                .values()
                .filter(|doc| query.filters.iter().all(|f| matches_filter(doc, f)))
                .count() as u64
        })
    }

    fn ensure_hash_index(&self, collection: &str, field: &str) -> Result<()> {
        self.ensure_collection(collection)?;
        self.with_collection_mut(collection, |c| {
            c.hash_indexes.insert(field.to_string());
            Ok(())
        })
    }

    fn ensure_ttl_index(&self, collection: &str, field: &str) -> Result<()> {
        self.ensure_collection(collection)?;
        self.with_collection_mut(collection, |c| {
            if let Some(existing) = &c.ttl_field {
                if existing != field {
                    warn!(
                        collection,
                        old = %existing,
                        new = %field,
                        "Replacing TTL index field"
                    );
                }
            }
            c.ttl_field = Some(field.to_string());
            Ok(())
        })
    }

    fn is_live(&self) -> bool {
        true
    }
}

/// Run the TTL sweeper until the stop signal is raised.
///
/// The sweep interval defaults to one minute in callers, matching the
/// expiry-latency bound of the store contract.
pub fn spawn_ttl_sweeper(
    store: Arc<MemoryStore>,
    interval: Duration,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("engram-ttl-sweeper".to_string())
        .spawn(move || {
            info!(interval_secs = interval.as_secs(), "TTL sweeper started");
            while !stop.load(Ordering::Acquire) {
                let expired = store.sweep_expired(Utc::now());
                if expired > 0 {
                    debug!(expired, "TTL sweep removed documents");
                }
                // Sleep in short slices so shutdown stays prompt.
                let mut remaining = interval;
                while !stop.load(Ordering::Acquire) && remaining > Duration::ZERO {
                    let slice = remaining.min(Duration::from_millis(200));
                    std::thread::sleep(slice);
                    remaining = remaining.saturating_sub(slice);
                }
            }
            info!("TTL sweeper stopped");
        })
        .expect("failed to spawn TTL sweeper thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FilterOp;
    use serde_json::json;

    fn store_with(docs: &[(&str, Value)]) -> MemoryStore {
        let store = MemoryStore::new();
        store.ensure_collection("test").unwrap();
        for (key, doc) in docs {
            store.put("test", key, doc.clone()).unwrap();
        }
        store
    }

    #[test]
    fn put_get_remove() {
        let store = store_with(&[("a", json!({"x": 1}))]);
        assert_eq!(store.get("test", "a").unwrap(), Some(json!({"x": 1})));
        assert!(store.remove("test", "a").unwrap());
        assert!(!store.remove("test", "a").unwrap());
        assert_eq!(store.get("test", "a").unwrap(), None);
    }

    #[test]
    fn put_same_key_leaves_one_document() {
        let store = store_with(&[("a", json!({"x": 1}))]);
        store.put("test", "a", json!({"x": 2})).unwrap();
        assert_eq!(store.count("test", &Query::new()).unwrap(), 1);
        assert_eq!(store.get("test", "a").unwrap(), Some(json!({"x": 2})));
    }

    #[test]
    fn unknown_collection_is_fatal() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get("nope", "a"),
            Err(EngramError::BackendFatal(_))
        ));
    }

    #[test]
    fn merge_is_deep() {
        let store = store_with(&[(
            "e",
            json!({"properties": {"deleted": false, "volume": "C:"}, "label": "a.txt"}),
        )]);
        store
            .merge("test", "e", json!({"properties": {"deleted": true}}))
            .unwrap();
        let doc = store.get("test", "e").unwrap().unwrap();
        assert_eq!(doc["properties"]["deleted"], json!(true));
        // Sibling fields survive the merge
        assert_eq!(doc["properties"]["volume"], json!("C:"));
        assert_eq!(doc["label"], json!("a.txt"));
    }

    #[test]
    fn increment_creates_and_adds() {
        let store = store_with(&[("a", json!({"search_hits": 2}))]);
        assert_eq!(store.increment("test", "a", "search_hits", 1).unwrap(), 3);
        assert_eq!(
            store
                .increment("test", "a", "properties.access_count", 1)
                .unwrap(),
            1
        );
        let doc = store.get("test", "a").unwrap().unwrap();
        assert_eq!(doc["properties"]["access_count"], json!(1));
    }

    #[test]
    fn find_filters_sorts_and_pages() {
        let store = store_with(&[
            ("a", json!({"ts": "2026-07-01T00:00:00Z", "kind": "create"})),
            ("b", json!({"ts": "2026-07-03T00:00:00Z", "kind": "modify"})),
            ("c", json!({"ts": "2026-07-02T00:00:00Z", "kind": "modify"})),
        ]);

        let results = store
            .find(
                "test",
                &Query::new()
                    .filter_eq("kind", "modify")
                    .sort_desc("ts")
                    .limit(10),
            )
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["ts"], json!("2026-07-03T00:00:00Z"));

        let paged = store
            .find("test", &Query::new().sort_asc("ts").offset(1).limit(1))
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0]["ts"], json!("2026-07-02T00:00:00Z"));

        let ranged = store
            .find(
                "test",
                &Query::new()
                    .filter("ts", FilterOp::Ge, "2026-07-02T00:00:00Z")
                    .filter("ts", FilterOp::Le, "2026-07-03T00:00:00Z"),
            )
            .unwrap();
        assert_eq!(ranged.len(), 2);
    }

    #[test]
    fn hash_indexes_are_recorded() {
        let store = MemoryStore::new();
        store.ensure_hash_index("test", "entity_id").unwrap();
        store.ensure_hash_index("test", "timestamp").unwrap();
        assert_eq!(
            store.declared_indexes("test"),
            vec!["entity_id".to_string(), "timestamp".to_string()]
        );
        assert!(store.declared_indexes("other").is_empty());
    }

    #[test]
    fn ttl_sweep_expires_past_documents() {
        let store = MemoryStore::new();
        store.ensure_ttl_index("test", "ttl_timestamp").unwrap();
        store
            .put("test", "old", json!({"ttl_timestamp": "2020-01-01T00:00:00Z"}))
            .unwrap();
        store
            .put(
                "test",
                "fresh",
                json!({"ttl_timestamp": "2099-01-01T00:00:00Z"}),
            )
            .unwrap();
        store.put("test", "no-ttl", json!({"x": 1})).unwrap();

        let expired = store.sweep_expired(Utc::now());
        assert_eq!(expired, 1);
        assert!(store.get("test", "old").unwrap().is_none());
        assert!(store.get("test", "fresh").unwrap().is_some());
        assert!(store.get("test", "no-ttl").unwrap().is_some());
    }

    #[test]
    fn ttl_boundary_expires_within_one_tick() {
        let store = MemoryStore::new();
        store.ensure_ttl_index("test", "ttl_timestamp").unwrap();
        let now = Utc::now();
        store
            .put(
                "test",
                "edge",
                json!({"ttl_timestamp": now.to_rfc3339()}),
            )
            .unwrap();
        // A TTL equal to "now" expires on the next sweep tick.
        let later = now + chrono::Duration::seconds(1);
        assert_eq!(store.sweep_expired(later), 1);
    }
}
