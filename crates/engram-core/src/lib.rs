//! # Engram Core Library
//!
//! Engram turns the NTFS USN change journal into a personal file-activity
//! memory with tiered retention. This crate holds everything platform-
//! agnostic: the data model, entity resolution, importance scoring, the
//! hot and warm tier recorders, and the transition machinery between
//! them. Reading the journal itself lives in `engram-backend-ntfs`.
//!
//! ## Architecture
//!
//! - **Types** (`types`): activity events, hot/warm records, entities
//! - **Store** (`store`): the document-store contract and an in-process
//!   implementation with a TTL sweeper
//! - **Entity** (`entity`): (volume, FRN) ↔ stable entity UUID resolution
//! - **Scoring** (`scoring`): multi-factor importance with time decay
//! - **Hot/Warm** (`hot`, `warm`): the two retention tiers
//! - **Transition** (`transition`): batched hot → warm migration
//! - **Pipeline** (`pipeline`): the bounded queue between readers and
//!   the hot tier
//! - **Cursor** (`cursor`): resume-safe per-volume journal positions
//!
//! ## Data flow
//!
//! ```text
//! volume readers ──bounded queue──▶ hot tier ──scheduled batches──▶ warm tier
//!                                      │
//!                                entity resolver
//! ```

pub mod config;
pub mod cursor;
pub mod entity;
pub mod error;
pub mod hot;
pub mod pipeline;
pub mod scoring;
pub mod store;
pub mod transition;
pub mod types;
pub mod warm;

// Re-export commonly used types
pub use config::Config;
pub use cursor::CursorFile;
pub use entity::EntityResolver;
pub use error::{EngramError, Result};
pub use hot::HotTierRecorder;
pub use scoring::ImportanceScorer;
pub use store::{DocumentStore, MemoryStore};
pub use transition::TransitionManager;
pub use types::{ActivityEvent, ActivityKind, EntityRecord, HotRecord, WarmRecord};
pub use warm::WarmTierRecorder;
