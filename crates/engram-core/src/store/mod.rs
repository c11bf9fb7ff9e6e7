//! Document-store abstraction.
//!
//! The retention engine persists everything through this trait: hot-tier
//! activities, warm-tier records, entities, and nothing else. The contract
//! is deliberately small: string-keyed collections, atomic single-document
//! operations, filter+sort+limit queries, and per-document TTL declared on
//! an RFC3339 field. There are no cross-document transactions; every write
//! is independently durable.
//!
//! Backends that lack native TTL expiry (such as [`memory::MemoryStore`])
//! realize it with a sweeper; behavior must match a native TTL index within
//! one minute.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use serde_json::Value;

/// A stored document. Documents are JSON objects; nested fields are
/// addressed with dotted paths (`properties.volume`).
pub type Document = Value;

/// Comparison operator for a query filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A single field predicate.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A filter + sort + limit/offset query over one collection.
///
/// RFC3339 UTC timestamps compare correctly as strings, so time-window
/// queries are plain string-range filters.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub sort: Option<(String, SortOrder)>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn filter_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    pub fn sort_asc(mut self, field: impl Into<String>) -> Self {
        self.sort = Some((field.into(), SortOrder::Asc));
        self
    }

    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.sort = Some((field.into(), SortOrder::Desc));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// Abstract document store.
///
/// ## Thread safety
///
/// Implementations must be `Send + Sync`; the hot recorder, warm recorder,
/// and transition manager share one store across threads.
///
/// ## Error mapping
///
/// Implementations map their failures into `BackendTransient` (retried
/// with bounded backoff) or `BackendFatal` (disables further writes);
/// backend-specific error types never cross this boundary.
pub trait DocumentStore: Send + Sync {
    /// Create the collection if it does not exist.
    fn ensure_collection(&self, collection: &str) -> Result<()>;

    /// Insert or replace the document at `key`. Atomic per document;
    /// writing the same key twice leaves exactly one document.
    fn put(&self, collection: &str, key: &str, doc: Document) -> Result<()>;

    /// Fetch a document by key.
    fn get(&self, collection: &str, key: &str) -> Result<Option<Document>>;

    /// Deep-merge `patch` into the document at `key`. Object fields merge
    /// recursively; everything else is replaced. Fails if absent.
    fn merge(&self, collection: &str, key: &str, patch: Document) -> Result<()>;

    /// Delete a document. Returns whether it existed.
    fn remove(&self, collection: &str, key: &str) -> Result<bool>;

    /// Atomically add `delta` to a numeric field, returning the new value.
    /// A missing field starts from zero.
    fn increment(&self, collection: &str, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Run a filter+sort+limit query.
    fn find(&self, collection: &str, query: &Query) -> Result<Vec<Document>>;

    /// Count documents matching the query's filters.
    fn count(&self, collection: &str, query: &Query) -> Result<u64>;

    /// Declare a hash index on `field`. Index-creation failure is not
    /// fatal; callers fall back to linear query plans.
    fn ensure_hash_index(&self, collection: &str, field: &str) -> Result<()>;

    /// Declare a TTL index: documents whose RFC3339 `field` is in the
    /// past are expired by the backend.
    fn ensure_ttl_index(&self, collection: &str, field: &str) -> Result<()>;

    /// Backend connectivity probe used by readiness checks.
    fn is_live(&self) -> bool;
}

/// Resolve a dotted field path within a document.
pub fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Total order over JSON values used by filters and sorts.
///
/// Numbers compare numerically, strings lexicographically (RFC3339 UTC
/// timestamps order correctly this way); mismatched types compare by a
/// fixed type rank so sorting is stable.
pub fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    fn type_rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Evaluate a filter against a document.
pub fn matches_filter(doc: &Value, filter: &Filter) -> bool {
    use std::cmp::Ordering;

    let Some(field_value) = lookup_path(doc, &filter.field) else {
        // An absent field only matches explicit inequality checks.
        return filter.op == FilterOp::Ne && !filter.value.is_null();
    };

    let ord = compare_values(field_value, &filter.value);
    match filter.op {
        FilterOp::Eq => ord == Ordering::Equal,
        FilterOp::Ne => ord != Ordering::Equal,
        FilterOp::Lt => ord == Ordering::Less,
        FilterOp::Le => ord != Ordering::Greater,
        FilterOp::Gt => ord == Ordering::Greater,
        FilterOp::Ge => ord != Ordering::Less,
    }
}
