//! Importance scoring for storage activities.
//!
//! The score is a proxy for how likely an event is to matter later, and it
//! drives every retention decision: hot-tier records carry an initial
//! score, and the transition manager re-scores before deciding what to
//! keep one-to-one and what to aggregate.
//!
//! The scorer is a pure function over `(event, entity metadata, search
//! hits, now)`: identical inputs produce bit-identical outputs. Five
//! weighted factors contribute, each in [0, 1], and the weighted sum is
//! clamped to [0.1, 1.0].

use crate::config::ScoringConfig;
use crate::types::{ActivityEvent, ActivityKind, EntityRecord};
use chrono::{DateTime, Utc};

/// Recency half-life: score halves every 7 days of age.
const RECENCY_HALF_LIFE_DAYS: f64 = 7.0;

/// Extensions of document and source files that score higher.
const IMPORTANT_EXTENSIONS: &[&str] = &[
    // Documents
    "docx", "doc", "pdf", "pptx", "xlsx", "xls", "txt", "md", "rtf",
    // Source code
    "py", "js", "ts", "html", "css", "c", "cpp", "h", "java", "cs", "go", "rs", "php", "rb",
    "swift",
    // Data
    "json", "xml", "yaml", "yml", "csv", "sql", "db",
];

/// Path segments that mark user work areas.
const IMPORTANT_PATH_SEGMENTS: &[&str] = &[
    "documents",
    "projects",
    "src",
    "source",
    "repos",
    "work",
    "research",
    "thesis",
    "paper",
    "manuscript",
    "report",
];

/// Path segments that mark scratch areas.
const TEMPORARY_PATH_SEGMENTS: &[&str] = &[
    "temp",
    "tmp",
    "cache",
    "downloaded",
    ".git",
    "node_modules",
    "__pycache__",
    ".venv",
    "bin",
    "obj",
    "build",
    "dist",
];

/// Basenames of project metadata files that score higher.
const METADATA_FILE_NAMES: &[&str] = &[
    "readme.md",
    "license",
    "package.json",
    "cargo.toml",
    "pyproject.toml",
    "makefile",
    "dockerfile",
    "manifest",
    "config",
];

/// Factor weights; normalized to sum to 1.0 when a scorer is built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub recency: f64,
    pub activity_type: f64,
    pub content: f64,
    pub frequency: f64,
    pub novelty: f64,
}

impl ScoreWeights {
    /// Hot-tier (ingest) weights.
    pub const HOT: ScoreWeights = ScoreWeights {
        recency: 0.30,
        activity_type: 0.25,
        content: 0.20,
        frequency: 0.15,
        novelty: 0.10,
    };

    /// Warm-tier (transition re-score) weights.
    ///
    /// Recency is de-emphasized: every transition candidate is recent on
    /// the hot tier's timescale, so letting recency dominate would push
    /// scratch-area churn above the aggregation threshold.
    pub const WARM: ScoreWeights = ScoreWeights {
        recency: 0.15,
        activity_type: 0.30,
        content: 0.25,
        frequency: 0.20,
        novelty: 0.10,
    };

    fn normalized(self) -> Self {
        let sum = self.recency + self.activity_type + self.content + self.frequency + self.novelty;
        if sum <= 0.0 {
            return ScoreWeights::HOT;
        }
        ScoreWeights {
            recency: self.recency / sum,
            activity_type: self.activity_type / sum,
            content: self.content / sum,
            frequency: self.frequency / sum,
            novelty: self.novelty / sum,
        }
    }
}

impl From<&ScoringConfig> for ScoreWeights {
    fn from(config: &ScoringConfig) -> Self {
        ScoreWeights {
            recency: config.recency_weight,
            activity_type: config.type_weight,
            content: config.content_weight,
            frequency: config.frequency_weight,
            novelty: config.novelty_weight,
        }
    }
}

/// Multi-factor importance scorer.
#[derive(Debug, Clone)]
pub struct ImportanceScorer {
    weights: ScoreWeights,
}

impl ImportanceScorer {
    /// Scorer with the hot-tier weight set.
    pub fn hot() -> Self {
        Self::with_weights(ScoreWeights::HOT)
    }

    /// Scorer with the warm-tier weight set.
    pub fn warm() -> Self {
        Self::with_weights(ScoreWeights::WARM)
    }

    pub fn with_weights(weights: ScoreWeights) -> Self {
        ImportanceScorer {
            weights: weights.normalized(),
        }
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    /// Calculate the composite importance of an activity.
    ///
    /// `now` is passed explicitly so scoring stays deterministic and
    /// testable; callers pass `Utc::now()`.
    pub fn score(
        &self,
        event: &ActivityEvent,
        entity: Option<&EntityRecord>,
        search_hits: u32,
        now: DateTime<Utc>,
    ) -> f64 {
        let weighted = self.weights.recency * recency_score(event, now)
            + self.weights.activity_type * type_score(event.activity_type)
            + self.weights.content * content_score(event)
            + self.weights.frequency * frequency_score(entity, search_hits)
            + self.weights.novelty * novelty_score(event, entity, now);

        weighted.clamp(0.1, 1.0)
    }
}

/// Exponential time decay; events from the future score 1.0.
fn recency_score(event: &ActivityEvent, now: DateTime<Utc>) -> f64 {
    let age_days = (now - event.timestamp).num_seconds() as f64 / 86_400.0;
    if age_days <= 0.0 {
        return 1.0;
    }
    (-age_days / RECENCY_HALF_LIFE_DAYS).exp()
}

fn type_score(kind: ActivityKind) -> f64 {
    match kind {
        ActivityKind::Create => 0.50,
        ActivityKind::Delete => 0.45,
        ActivityKind::Rename => 0.45,
        ActivityKind::SecurityChange => 0.40,
        ActivityKind::Modify => 0.30,
        ActivityKind::AttributeChange => 0.10,
        ActivityKind::Close => 0.05,
        ActivityKind::Read | ActivityKind::Other => 0.30,
    }
}

fn content_score(event: &ActivityEvent) -> f64 {
    let mut score: f64 = 0.3;

    if let Some(ext) = event.extension() {
        if IMPORTANT_EXTENSIONS.contains(&ext.as_str()) {
            score += 0.2;
        }
    }

    if path_has_segment(&event.file_path, IMPORTANT_PATH_SEGMENTS) {
        score += 0.2;
    } else if path_has_segment(&event.file_path, TEMPORARY_PATH_SEGMENTS) {
        score -= 0.1;
    }

    if event.is_directory {
        score += 0.1;
    }

    let basename = event
        .file_path
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or(&event.file_name)
        .to_ascii_lowercase();
    if METADATA_FILE_NAMES.contains(&basename.as_str()) {
        score += 0.15;
    }

    score.clamp(0.0, 1.0)
}

/// Match directory segments only; the final path component is the file
/// name and does not count.
fn path_has_segment(path: &str, segments: &[&str]) -> bool {
    let parts: Vec<&str> = path.split(['\\', '/']).filter(|s| !s.is_empty()).collect();
    if parts.len() < 2 {
        return false;
    }
    parts[..parts.len() - 1]
        .iter()
        .any(|part| segments.iter().any(|s| part.eq_ignore_ascii_case(s)))
}

fn frequency_score(entity: Option<&EntityRecord>, search_hits: u32) -> f64 {
    let mut score = 0.3;

    if search_hits > 0 {
        // Log scale: 1 hit -> +0.1, 10 hits -> +0.3, 100 hits -> +0.5
        score += (0.1 * (1.0 + search_hits as f64).log10()).min(0.5);
    }

    if let Some(entity) = entity {
        let access_count = entity.properties.access_count;
        if access_count > 0 {
            score += (0.05 * (1.0 + access_count as f64).log10()).min(0.25);
        }
        score += entity.properties.importance_boost;
    }

    score.clamp(0.0, 1.0)
}

fn novelty_score(event: &ActivityEvent, entity: Option<&EntityRecord>, now: DateTime<Utc>) -> f64 {
    let mut score: f64 = 0.5;

    if event.activity_type == ActivityKind::Create {
        score += 0.3;
    }

    if let Some(entity) = entity {
        let age_days = entity.age_days(now);
        if age_days < 1.0 {
            score += 0.2;
        } else if age_days < 7.0 {
            score += 0.1;
        }

        if entity.properties.access_count == 0 {
            score += 0.1;
        } else if entity.properties.access_count < 5 {
            score += 0.05;
        }
    }

    score.clamp(0.0, 1.0)
}
