//! Stable file-entity resolution.
//!
//! NTFS identifies files by (volume, file reference number), but an FRN is
//! only stable for the lifetime of the inode: restore and copy operations
//! reassign it, and drive letters move between volumes. The resolver maps
//! journal identities onto stable entity UUIDs that survive renames, FRN
//! reassignment, and drive-letter changes.
//!
//! Resolution order for `(volume, frn, path)`:
//!
//! 1. FRN cache hit
//! 2. entity collection lookup by `(volume, frn)`
//! 3. path cache / collection lookup by `(volume, path)`; the entity is
//!    reused and its FRN updated
//! 4. a new entity is minted
//!
//! Caches are concurrent maps: one writer per volume task, readers
//! anywhere. Metadata updates are deduplicated through a bounded LRU of
//! `(entity, kind, timestamp)` keys so replayed records are idempotent.

use crate::error::{EngramError, Result};
use crate::store::{DocumentStore, Query};
use crate::types::{ts_string, ActivityEvent, ActivityKind, EntityProperties, EntityRecord};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::json;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default entity collection name.
pub const ENTITY_COLLECTION: &str = "file_entities";

/// Bound on the recent-update dedup window.
const RECENT_UPDATE_CAPACITY: usize = 10_000;

/// Maps (volume, FRN) and (volume, path) to stable entity UUIDs.
pub struct EntityResolver {
    store: Arc<dyn DocumentStore>,
    collection: String,
    frn_cache: DashMap<(String, String), Uuid>,
    path_cache: DashMap<(String, String), Uuid>,
    recent_updates: Mutex<LruCache<String, ()>>,
}

impl EntityResolver {
    /// Create a resolver over the given store.
    ///
    /// Collection and index setup failures here are fatal: running without
    /// a working resolver silently corrupts the data model.
    pub fn new(store: Arc<dyn DocumentStore>) -> Result<Self> {
        store.ensure_collection(ENTITY_COLLECTION)?;
        for field in [
            "properties.file_reference_number",
            "properties.volume",
            "properties.file_path",
        ] {
            if let Err(e) = store.ensure_hash_index(ENTITY_COLLECTION, field) {
                warn!(field, error = %e, "Entity index creation failed, queries fall back to scans");
            }
        }

        Ok(EntityResolver {
            store,
            collection: ENTITY_COLLECTION.to_string(),
            frn_cache: DashMap::new(),
            path_cache: DashMap::new(),
            recent_updates: Mutex::new(LruCache::new(
                NonZeroUsize::new(RECENT_UPDATE_CAPACITY).unwrap(),
            )),
        })
    }

    /// Resolve the entity for a journal identity, creating one if needed.
    pub fn resolve_or_create(
        &self,
        volume: &str,
        frn: &str,
        path: &str,
        is_directory: bool,
        now: DateTime<Utc>,
    ) -> Result<Uuid> {
        let frn_key = (volume.to_string(), frn.to_string());
        if let Some(entity_id) = self.frn_cache.get(&frn_key) {
            return Ok(*entity_id);
        }

        // Collection lookup by (volume, FRN)
        let found = self.store.find(
            &self.collection,
            &Query::new()
                .filter_eq("properties.file_reference_number", frn)
                .filter_eq("properties.volume", volume)
                .limit(1),
        )?;
        if let Some(doc) = found.into_iter().next() {
            let entity: EntityRecord = serde_json::from_value(doc)?;
            self.frn_cache.insert(frn_key, entity.entity_id);
            return Ok(entity.entity_id);
        }

        // FRN reassignment: the path may already belong to an entity.
        let path_key = (volume.to_string(), path.to_string());
        let by_path = self.path_cache.get(&path_key).map(|e| *e).or_else(|| {
            self.store
                .find(
                    &self.collection,
                    &Query::new()
                        .filter_eq("properties.file_path", path)
                        .filter_eq("properties.volume", volume)
                        .filter_eq("properties.deleted", false)
                        .sort_desc("modified_at")
                        .limit(1),
                )
                .ok()
                .and_then(|docs| docs.into_iter().next())
                .and_then(|doc| serde_json::from_value::<EntityRecord>(doc).ok())
                .map(|e| e.entity_id)
        });
        if let Some(entity_id) = by_path {
            debug!(%entity_id, frn, "Reusing entity found by path, updating FRN");
            self.store.merge(
                &self.collection,
                &entity_id.to_string(),
                json!({
                    "properties": { "file_reference_number": frn, "volume": volume },
                    "modified_at": ts_string(&now),
                }),
            )?;
            self.frn_cache.insert(frn_key, entity_id);
            self.path_cache.insert(path_key, entity_id);
            return Ok(entity_id);
        }

        // No prior identity: mint a new entity.
        let entity_id = Uuid::new_v4();
        let label = path
            .rsplit(['\\', '/'])
            .next()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("entity-{}", &entity_id.to_string()[..8]));

        let record = EntityRecord {
            entity_id,
            label,
            properties: EntityProperties {
                file_reference_number: frn.to_string(),
                volume: volume.to_string(),
                file_path: path.to_string(),
                is_directory,
                last_accessed: now,
                last_modified: None,
                deleted: false,
                access_count: 0,
                importance_boost: 0.0,
            },
            created_at: now,
            modified_at: now,
        };

        self.store.put(
            &self.collection,
            &entity_id.to_string(),
            serde_json::to_value(&record)?,
        )?;
        debug!(%entity_id, frn, path, "Created entity");

        self.frn_cache.insert(frn_key, entity_id);
        self.path_cache.insert(path_key, entity_id);
        Ok(entity_id)
    }

    /// Update entity metadata for an observed activity.
    ///
    /// Duplicate `(entity, kind, timestamp)` updates are suppressed, so
    /// replaying a journal segment leaves the entity unchanged.
    pub fn update_metadata(&self, entity_id: Uuid, event: &ActivityEvent) -> Result<()> {
        let dedup_key = format!(
            "{}:{}:{}",
            entity_id,
            event.activity_type,
            event.timestamp.to_rfc3339()
        );
        {
            let mut recent = self.recent_updates.lock();
            if recent.put(dedup_key, ()).is_some() {
                return Ok(());
            }
        }

        let now = Utc::now();
        let timestamp = ts_string(&event.timestamp);
        let key = entity_id.to_string();

        let patch = match event.activity_type {
            ActivityKind::Delete => json!({
                "properties": { "deleted": true, "last_accessed": timestamp },
                "modified_at": ts_string(&now),
            }),
            ActivityKind::Rename => {
                // The entity no longer claims its previous path; a new
                // file reusing that name must not resolve to it.
                self.path_cache.retain(|_, cached| *cached != entity_id);
                self.path_cache.insert(
                    (event.volume_name.clone(), event.file_path.clone()),
                    entity_id,
                );
                json!({
                    "label": event.file_name,
                    "properties": {
                        "file_path": event.file_path,
                        "last_accessed": timestamp,
                    },
                    "modified_at": ts_string(&now),
                })
            }
            ActivityKind::Create | ActivityKind::Modify | ActivityKind::AttributeChange => json!({
                "properties": {
                    "last_modified": timestamp,
                    "last_accessed": timestamp,
                },
                "modified_at": ts_string(&now),
            }),
            _ => json!({
                "properties": { "last_accessed": timestamp },
            }),
        };

        self.store.merge(&self.collection, &key, patch)?;
        self.store
            .increment(&self.collection, &key, "properties.access_count", 1)?;
        Ok(())
    }

    /// Raise the entity's importance boost (query-feedback hook).
    pub fn boost_importance(&self, entity_id: Uuid, delta: f64) -> Result<()> {
        let key = entity_id.to_string();
        let current = self
            .store
            .get(&self.collection, &key)?
            .ok_or_else(|| EngramError::BackendFatal(format!("unknown entity {}", entity_id)))?;
        let boost = current
            .pointer("/properties/importance_boost")
            .and_then(serde_json::Value::as_f64)
            .unwrap_or(0.0);
        self.store.merge(
            &self.collection,
            &key,
            json!({ "properties": { "importance_boost": boost + delta } }),
        )
    }

    /// Fetch an entity record.
    pub fn get(&self, entity_id: Uuid) -> Result<Option<EntityRecord>> {
        match self.store.get(&self.collection, &entity_id.to_string())? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Resolve an entity by `(volume, path)` without creating one.
    pub fn lookup_by_path(&self, volume: &str, path: &str) -> Result<Option<Uuid>> {
        let path_key = (volume.to_string(), path.to_string());
        if let Some(entity_id) = self.path_cache.get(&path_key) {
            return Ok(Some(*entity_id));
        }
        let found = self.store.find(
            &self.collection,
            &Query::new()
                .filter_eq("properties.file_path", path)
                .filter_eq("properties.volume", volume)
                .sort_desc("modified_at")
                .limit(1),
        )?;
        Ok(found
            .into_iter()
            .next()
            .and_then(|doc| serde_json::from_value::<EntityRecord>(doc).ok())
            .map(|e| e.entity_id))
    }
}
