//! Common types for the semantic retrieval subsystem.
//!
//! These types are shared by both index backends and the adaptive
//! orchestrator, and are always available regardless of feature flags.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Row identity
// ============================================================================

/// What kind of entity a row surfaces in search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    /// The row surfaces a meeting document.
    Meeting,
    /// The row surfaces a single agenda item.
    AgendaItem,
}

/// Provenance of the text that produced a row. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Abstractive summary of the parent document.
    Summary,
    /// Extractive summary fallback.
    SummaryExtractive,
    /// Text of one agenda item, surfacing the parent meeting.
    AgendaItem,
    /// Bounded chunk of raw document content.
    ContentChunk,
    /// Text of one agenda item, surfacing the item itself.
    AgendaItemResult,
}

impl SourceKind {
    /// Stable string form, used in metadata maps and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::SummaryExtractive => "summary_extractive",
            Self::AgendaItem => "agenda_item",
            Self::ContentChunk => "content_chunk",
            Self::AgendaItemResult => "agenda_item_result",
        }
    }
}

/// One retrievable unit of the local index.
///
/// `row_id` is dense and 0-based: it is the row's position in the persisted
/// vector matrix, assigned only after the full corpus is materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedRow {
    /// Position in the persisted vector matrix.
    pub row_id: usize,

    /// Kind of entity surfaced by this row.
    pub result_kind: ResultKind,

    /// Id of the surfaced entity (document id or agenda item id).
    pub source_db_id: i64,

    /// Id of the meeting event this row belongs to.
    pub event_id: i64,

    /// Catalog (document) id, when the row derives from a document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<i64>,

    /// Agenda item id, when the row derives from an agenda item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agenda_item_id: Option<i64>,

    /// Provenance of the embedded text.
    pub source_kind: SourceKind,

    /// City the meeting belongs to.
    pub city: String,

    /// Meeting category (council, committee, ...).
    pub meeting_category: String,

    /// Organization holding the meeting.
    pub organization: String,

    /// Meeting date as an ISO-8601 date string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl IndexedRow {
    /// Parent identity used for result deduplication.
    ///
    /// Meeting-kind rows group by catalog id (falling back to the surfaced
    /// entity id when absent); agenda-item rows group by their own id.
    pub fn parent_key(&self) -> (ResultKind, i64) {
        let key = match self.result_kind {
            ResultKind::Meeting => self.catalog_id.unwrap_or(self.source_db_id),
            ResultKind::AgendaItem => self.source_db_id,
        };
        (self.result_kind, key)
    }
}

// ============================================================================
// Build metadata
// ============================================================================

/// Which engine variant produced or serves an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Local backend with a native ANN index resident.
    LocalAnn,
    /// Local backend falling back to brute-force matrix search.
    LocalBruteforce,
    /// Relational store with native vector search.
    Relational,
}

impl EngineKind {
    /// Stable string form for diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalAnn => "local_ann",
            Self::LocalBruteforce => "local_bruteforce",
            Self::Relational => "relational",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata describing one successful index build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildMetadata {
    /// Embedding model that produced the vectors.
    pub model_name: String,

    /// Build completion time, ISO-8601 UTC.
    pub built_at: String,

    /// Number of indexed rows.
    pub row_count: usize,

    /// Number of distinct parent documents that contributed rows.
    pub catalog_count: usize,

    /// SHA-256 fingerprint over the full indexable row set.
    pub corpus_hash: String,

    /// Row counts per text provenance.
    pub source_counts: BTreeMap<SourceKind, usize>,

    /// Engine variant that built the index.
    pub engine: EngineKind,

    /// Embedding dimension, needed to reload the raw vector matrix.
    pub embedding_dim: usize,
}

/// Outcome of a `build_index` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildReport {
    /// Metadata of the (possibly pre-existing) build.
    pub metadata: BuildMetadata,

    /// True when the corpus hash matched the previous build and no
    /// re-embedding happened.
    pub from_cache: bool,

    /// Wall-clock build duration in milliseconds.
    pub duration_ms: u64,
}

// ============================================================================
// Query types
// ============================================================================

/// One backend query result: a row and its cosine similarity to the query.
///
/// Vectors are unit-normalized, so the inner product used by the backends
/// equals cosine similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticCandidate {
    /// Position of the matching row in the index.
    pub row_id: usize,

    /// Cosine similarity, higher is better.
    pub score: f32,

    /// Metadata of the matching row.
    pub row: IndexedRow,
}

/// One lexically matched result offered to a backend for reranking.
///
/// Only meeting-kind candidates with a resolvable catalog id participate;
/// backends drop the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalCandidate {
    /// Kind of the lexical result.
    pub result_kind: ResultKind,

    /// Catalog id, when the lexical engine resolved one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<i64>,
}

impl LexicalCandidate {
    /// A meeting-kind candidate for the given document.
    pub fn meeting(catalog_id: i64) -> Self {
        Self {
            result_kind: ResultKind::Meeting,
            catalog_id: Some(catalog_id),
        }
    }
}

/// One reranked document: catalog id with its vector similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankedDocument {
    /// Catalog id of the reranked document.
    pub catalog_id: i64,

    /// Cosine similarity of the query to the document's embedding.
    pub score: f32,
}

/// Caller-supplied metadata filters, applied after hydration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Restrict to one city.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,

    /// Restrict to one organization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,

    /// Restrict to one meeting category.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_category: Option<String>,

    /// Inclusive lower bound, ISO-8601 date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_from: Option<String>,

    /// Inclusive upper bound, ISO-8601 date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
}

impl SearchFilters {
    /// Whether any filter is set.
    pub fn is_empty(&self) -> bool {
        self.city.is_none()
            && self.organization.is_none()
            && self.meeting_category.is_none()
            && self.date_from.is_none()
            && self.date_to.is_none()
    }

    /// Whether a hydrated hit satisfies all set filters.
    ///
    /// Date bounds compare ISO-8601 `YYYY-MM-DD` strings lexicographically,
    /// which is order-preserving for that fixed format. Hits without a date
    /// fail any date-bounded filter.
    pub fn matches(&self, hit: &SearchHit) -> bool {
        if let Some(ref city) = self.city {
            if !hit.city.eq_ignore_ascii_case(city) {
                return false;
            }
        }
        if let Some(ref org) = self.organization {
            if !hit.organization.eq_ignore_ascii_case(org) {
                return false;
            }
        }
        if let Some(ref category) = self.meeting_category {
            if !hit.meeting_category.eq_ignore_ascii_case(category) {
                return false;
            }
        }
        if self.date_from.is_some() || self.date_to.is_some() {
            let Some(ref date) = hit.date else {
                return false;
            };
            if let Some(ref from) = self.date_from {
                if date.as_str() < from.as_str() {
                    return false;
                }
            }
            if let Some(ref to) = self.date_to {
                if date.as_str() > to.as_str() {
                    return false;
                }
            }
        }
        true
    }
}

/// A fully hydrated, ranked search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Kind of the surfaced entity.
    pub result_kind: ResultKind,

    /// Id of the surfaced entity.
    pub source_db_id: i64,

    /// Meeting event id.
    pub event_id: i64,

    /// Catalog id, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<i64>,

    /// Agenda item id, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agenda_item_id: Option<i64>,

    /// Hydrated title from the document store.
    pub title: String,

    /// Hydrated snippet or summary text.
    pub snippet: String,

    /// City, authoritative value from the document store.
    pub city: String,

    /// Organization, authoritative value from the document store.
    pub organization: String,

    /// Meeting category, authoritative value from the document store.
    pub meeting_category: String,

    /// Meeting date, ISO-8601.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    /// Cosine similarity of the best row for this entity.
    pub semantic_score: f32,
}

/// Diagnostics describing how a search was answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDiagnostics {
    /// Engine variant in use.
    pub engine: EngineKind,

    /// Number of pool-expansion steps taken.
    pub expansion_steps: u32,

    /// Final candidate pool size used.
    pub pool_size: usize,
}

/// Response of the adaptive retrieval orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Ranked hits, best first.
    pub hits: Vec<SearchHit>,

    /// Post-filter, post-dedup match count before the limit was applied.
    pub estimated_total_hits: usize,

    /// How the search was answered.
    pub diagnostics: SearchDiagnostics,
}

// ============================================================================
// Health
// ============================================================================

/// Health report for an index backend.
///
/// Produced without loading the embedding model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHealth {
    /// Whether the full artifact set (or any stored embeddings) exists.
    pub artifacts_present: bool,

    /// Whether the artifacts are mutually consistent.
    pub consistent: bool,

    /// Row count, when artifacts are readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,

    /// Model that built the index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    /// Build timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub built_at: Option<String>,

    /// Active engine variant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<EngineKind>,
}

impl IndexHealth {
    /// Health report for a backend with no artifacts at all.
    pub fn absent() -> Self {
        Self {
            artifacts_present: false,
            consistent: false,
            row_count: None,
            model_name: None,
            built_at: None,
            engine: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
