//! Corpus collection.
//!
//! Projects external document/agenda rows into indexable text units with
//! metadata. Rows are generated in a strict priority order per parent
//! document:
//!
//! 1. a non-empty summary yields exactly one row; else
//! 2. a non-empty extractive summary yields one row; else
//! 3. each agenda item yields one row; else
//! 4. the raw content is split into at most [`MAX_CONTENT_CHUNKS`] bounded
//!    chunks, each a row.
//!
//! Independently of the above, every agenda item contributes one additional
//! `agenda_item_result` row surfacing the item itself. Text is
//! whitespace-normalized before length checks, and rows below the minimum
//! content length are dropped, not padded. Dense `row_id`s are assigned only
//! after the full sequence is materialized.

use async_trait::async_trait;
use civica_core::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::SemanticConfig;
use crate::types::{IndexedRow, ResultKind, SourceKind};

/// Hard cap on content-chunk rows per document.
pub const MAX_CONTENT_CHUNKS: usize = 5;

// ============================================================================
// Source records
// ============================================================================

/// One agenda item as read from the external document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgendaItemRecord {
    /// Agenda item id in the external store.
    pub id: i64,

    /// Item heading.
    pub title: String,

    /// Item body text, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl AgendaItemRecord {
    /// Text composed for embedding: title and body joined.
    fn composed_text(&self) -> String {
        match &self.text {
            Some(body) => format!("{} {}", self.title, body),
            None => self.title.clone(),
        }
    }
}

/// One catalog document (meeting document) as read from the external store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogRecord {
    /// Document id in the external store.
    pub catalog_id: i64,

    /// Meeting event id.
    pub event_id: i64,

    /// Abstractive summary, when derived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    /// Extractive summary fallback, when derived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_extractive: Option<String>,

    /// Raw extracted document content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Agenda items segmented from this document.
    #[serde(default)]
    pub agenda_items: Vec<AgendaItemRecord>,

    /// City the meeting belongs to.
    pub city: String,

    /// Meeting category.
    pub meeting_category: String,

    /// Organization holding the meeting.
    pub organization: String,

    /// Meeting date, ISO-8601.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// Read handle to the external document store.
#[async_trait]
pub trait CorpusSource: Send + Sync {
    /// Fetch all catalog documents eligible for indexing.
    async fn fetch_catalog(&self) -> Result<Vec<CatalogRecord>>;
}

/// Corpus source reading a JSON snapshot file (an array of
/// [`CatalogRecord`]), used by the CLI and for offline builds.
#[derive(Debug, Clone)]
pub struct JsonCorpusSource {
    path: std::path::PathBuf,
}

impl JsonCorpusSource {
    /// Create a source for the given snapshot path.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl CorpusSource for JsonCorpusSource {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogRecord>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| Error::io_with_path(e, &self.path))?;
        let records: Vec<CatalogRecord> = serde_json::from_str(&raw)?;
        Ok(records)
    }
}

// ============================================================================
// Collection
// ============================================================================

/// A collected row: the text to embed plus its metadata.
#[derive(Debug, Clone, Serialize)]
pub struct CorpusRow {
    /// Normalized text to embed.
    pub text: String,

    /// Row metadata; `row_id` is dense and final.
    pub row: IndexedRow,
}

/// Collapse whitespace runs to single spaces and trim.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = true;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Split normalized text into greedy word-packed chunks.
///
/// Words are never split; a single word longer than `max_chars` becomes its
/// own oversized chunk. At most [`MAX_CONTENT_CHUNKS`] chunks are returned.
pub fn chunk_text(normalized: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in normalized.split(' ') {
        if word.is_empty() {
            continue;
        }
        if !current.is_empty() && current.len() + 1 + word.len() > max_chars {
            chunks.push(std::mem::take(&mut current));
            if chunks.len() == MAX_CONTENT_CHUNKS {
                return chunks;
            }
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() && chunks.len() < MAX_CONTENT_CHUNKS {
        chunks.push(current);
    }
    chunks
}

/// Collect the full indexable corpus from catalog records.
///
/// Returns rows in collection order with dense, 0-based `row_id`s. The
/// output is deterministic for a given input ordering.
pub fn collect_corpus(records: &[CatalogRecord], config: &SemanticConfig) -> Vec<CorpusRow> {
    let min_chars = config.min_content_chars;
    let mut pending: Vec<CorpusRow> = Vec::new();

    for record in records {
        collect_document_rows(record, config, &mut pending);

        // Every agenda item surfaces itself, regardless of what the parent
        // document contributed.
        for item in &record.agenda_items {
            let text = normalize_whitespace(&item.composed_text());
            if text.len() < min_chars {
                continue;
            }
            pending.push(CorpusRow {
                text,
                row: row_template(record, ResultKind::AgendaItem, item.id)
                    .with_source(SourceKind::AgendaItemResult)
                    .with_agenda_item(item.id)
                    .build(),
            });
        }
    }

    // Dense row ids, assigned after the full sequence is materialized.
    for (row_id, entry) in pending.iter_mut().enumerate() {
        entry.row.row_id = row_id;
    }
    pending
}

/// Collect the priority-ordered document rows for one catalog record.
fn collect_document_rows(record: &CatalogRecord, config: &SemanticConfig, out: &mut Vec<CorpusRow>) {
    let min_chars = config.min_content_chars;

    let summary = record
        .summary
        .as_deref()
        .map(normalize_whitespace)
        .filter(|t| t.len() >= min_chars);
    if let Some(text) = summary {
        out.push(CorpusRow {
            text,
            row: row_template(record, ResultKind::Meeting, record.catalog_id)
                .with_source(SourceKind::Summary)
                .build(),
        });
        return;
    }

    let extractive = record
        .summary_extractive
        .as_deref()
        .map(normalize_whitespace)
        .filter(|t| t.len() >= min_chars);
    if let Some(text) = extractive {
        out.push(CorpusRow {
            text,
            row: row_template(record, ResultKind::Meeting, record.catalog_id)
                .with_source(SourceKind::SummaryExtractive)
                .build(),
        });
        return;
    }

    if !record.agenda_items.is_empty() {
        let mut produced = false;
        for item in &record.agenda_items {
            let text = normalize_whitespace(&item.composed_text());
            if text.len() < min_chars {
                continue;
            }
            produced = true;
            out.push(CorpusRow {
                text,
                row: row_template(record, ResultKind::Meeting, record.catalog_id)
                    .with_source(SourceKind::AgendaItem)
                    .with_agenda_item(item.id)
                    .build(),
            });
        }
        if produced {
            return;
        }
    }

    if let Some(content) = record.content.as_deref() {
        let normalized = normalize_whitespace(content);
        for chunk in chunk_text(&normalized, config.chunk_max_chars) {
            if chunk.len() < min_chars {
                continue;
            }
            out.push(CorpusRow {
                text: chunk,
                row: row_template(record, ResultKind::Meeting, record.catalog_id)
                    .with_source(SourceKind::ContentChunk)
                    .build(),
            });
        }
    }
}

// Small builder so the collection code above stays readable.
struct RowTemplate {
    row: IndexedRow,
}

fn row_template(record: &CatalogRecord, kind: ResultKind, source_db_id: i64) -> RowTemplate {
    RowTemplate {
        row: IndexedRow {
            row_id: 0,
            result_kind: kind,
            source_db_id,
            event_id: record.event_id,
            catalog_id: Some(record.catalog_id),
            agenda_item_id: None,
            source_kind: SourceKind::Summary,
            city: record.city.clone(),
            meeting_category: record.meeting_category.clone(),
            organization: record.organization.clone(),
            date: record.date.clone(),
        },
    }
}

impl RowTemplate {
    fn with_source(mut self, kind: SourceKind) -> Self {
        self.row.source_kind = kind;
        self
    }

    fn with_agenda_item(mut self, id: i64) -> Self {
        self.row.agenda_item_id = Some(id);
        self
    }

    fn build(self) -> IndexedRow {
        self.row
    }
}

// ============================================================================
// Fingerprints
// ============================================================================

/// SHA-256 hex digest of a single text, used for relational
/// skip-if-hash-matches caching.
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex_digest(hasher)
}

/// Order-independent SHA-256 fingerprint over the full row set.
///
/// Each row is hashed over a canonical serialization of its text and
/// identity fields (excluding `row_id`, which encodes order); the sorted
/// per-row digests are then hashed together. Identical row sets therefore
/// yield identical hashes regardless of collection order.
pub fn corpus_hash(rows: &[CorpusRow]) -> String {
    let mut digests: Vec<String> = rows
        .iter()
        .map(|entry| {
            let mut hasher = Sha256::new();
            hasher.update(entry.text.as_bytes());
            hasher.update([0u8]);
            let identity = (
                entry.row.result_kind,
                entry.row.source_db_id,
                entry.row.event_id,
                entry.row.catalog_id,
                entry.row.agenda_item_id,
                entry.row.source_kind,
                &entry.row.city,
                &entry.row.meeting_category,
                &entry.row.organization,
                &entry.row.date,
            );
            // serde_json on a tuple is stable for a fixed struct layout
            let canonical = serde_json::to_string(&identity).unwrap_or_default();
            hasher.update(canonical.as_bytes());
            hex_digest(hasher)
        })
        .collect();
    digests.sort_unstable();

    let mut outer = Sha256::new();
    for digest in &digests {
        outer.update(digest.as_bytes());
    }
    hex_digest(outer)
}

/// Row counts per text provenance.
pub fn source_counts(rows: &[CorpusRow]) -> BTreeMap<SourceKind, usize> {
    let mut counts = BTreeMap::new();
    for entry in rows {
        *counts.entry(entry.row.source_kind).or_insert(0) += 1;
    }
    counts
}

/// Number of distinct catalog documents contributing rows.
pub fn catalog_count(rows: &[CorpusRow]) -> usize {
    let mut ids: Vec<i64> = rows.iter().filter_map(|r| r.row.catalog_id).collect();
    ids.sort_unstable();
    ids.dedup();
    ids.len()
}

fn hex_digest(hasher: Sha256) -> String {
    use std::fmt::Write;
    let bytes = hasher.finalize();
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SemanticConfig {
        SemanticConfig {
            min_content_chars: 10,
            chunk_max_chars: 40,
            ..Default::default()
        }
    }

    fn record(catalog_id: i64) -> CatalogRecord {
        CatalogRecord {
            catalog_id,
            event_id: catalog_id + 1000,
            summary: None,
            summary_extractive: None,
            content: None,
            agenda_items: Vec::new(),
            city: "Greenfield".to_string(),
            meeting_category: "council".to_string(),
            organization: "City Council".to_string(),
            date: Some("2025-03-12".to_string()),
        }
    }

    // ------------------------------------------------------------------------
    // Normalization and chunking
    // ------------------------------------------------------------------------

    #[test]
    fn test_normalize_whitespace_collapses_runs() {
        assert_eq!(
            normalize_whitespace("  council \t\n budget\r\n  session  "),
            "council budget session"
        );
    }

    #[test]
    fn test_normalize_whitespace_empty() {
        assert_eq!(normalize_whitespace("   \n\t "), "");
    }

    #[test]
    fn test_chunk_text_never_splits_words() {
        let text = "alpha beta gamma delta epsilon zeta";
        let chunks = chunk_text(text, 12);
        for chunk in &chunks {
            for word in chunk.split(' ') {
                assert!(text.contains(word));
            }
            assert!(chunk.len() <= 12, "chunk too long: {chunk:?}");
        }
    }

    #[test]
    fn test_chunk_text_greedy_packing() {
        let chunks = chunk_text("aa bb cc dd", 5);
        assert_eq!(chunks, vec!["aa bb", "cc dd"]);
    }

    #[test]
    fn test_chunk_text_oversized_word_kept_whole() {
        let chunks = chunk_text("short supercalifragilistic word", 10);
        assert!(chunks.iter().any(|c| c.contains("supercalifragilistic")));
    }

    #[test]
    fn test_chunk_text_caps_at_five() {
        let text = (0..100).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let chunks = chunk_text(&text, 20);
        assert_eq!(chunks.len(), MAX_CONTENT_CHUNKS);
    }

    // ------------------------------------------------------------------------
    // Priority order
    // ------------------------------------------------------------------------

    #[test]
    fn test_summary_wins_over_everything() {
        let mut rec = record(1);
        rec.summary = Some("the council discussed the budget".to_string());
        rec.summary_extractive = Some("an extractive summary here".to_string());
        rec.content = Some("long raw content that would otherwise chunk".to_string());

        let rows = collect_corpus(&[rec], &config());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row.source_kind, SourceKind::Summary);
        assert_eq!(rows[0].row.result_kind, ResultKind::Meeting);
        assert_eq!(rows[0].row.source_db_id, 1);
    }

    #[test]
    fn test_extractive_fallback() {
        let mut rec = record(2);
        rec.summary = Some("   ".to_string()); // empty after normalization
        rec.summary_extractive = Some("fallback extractive summary".to_string());

        let rows = collect_corpus(&[rec], &config());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row.source_kind, SourceKind::SummaryExtractive);
    }

    #[test]
    fn test_agenda_items_fallback_plus_result_rows() {
        let mut rec = record(3);
        rec.agenda_items = vec![
            AgendaItemRecord {
                id: 31,
                title: "Approve playground funding".to_string(),
                text: None,
            },
            AgendaItemRecord {
                id: 32,
                title: "Sewer maintenance contract".to_string(),
                text: Some("award to the lowest bidder".to_string()),
            },
        ];

        let rows = collect_corpus(&[rec], &config());
        // 2 meeting-kind agenda rows + 2 agenda_item_result rows
        assert_eq!(rows.len(), 4);

        let meeting_rows: Vec<_> = rows
            .iter()
            .filter(|r| r.row.source_kind == SourceKind::AgendaItem)
            .collect();
        assert_eq!(meeting_rows.len(), 2);
        for r in &meeting_rows {
            assert_eq!(r.row.result_kind, ResultKind::Meeting);
            assert_eq!(r.row.source_db_id, 3);
        }

        let item_rows: Vec<_> = rows
            .iter()
            .filter(|r| r.row.source_kind == SourceKind::AgendaItemResult)
            .collect();
        assert_eq!(item_rows.len(), 2);
        for r in &item_rows {
            assert_eq!(r.row.result_kind, ResultKind::AgendaItem);
            assert_eq!(r.row.agenda_item_id, Some(r.row.source_db_id));
        }
    }

    #[test]
    fn test_content_chunk_last_resort() {
        let mut rec = record(4);
        rec.content = Some(
            "zoning variance request for the corner lot including parking \
             requirements and setback rules for mixed use development"
                .to_string(),
        );

        let rows = collect_corpus(&[rec], &config());
        assert!(!rows.is_empty());
        assert!(rows.len() <= MAX_CONTENT_CHUNKS);
        for r in &rows {
            assert_eq!(r.row.source_kind, SourceKind::ContentChunk);
            assert!(r.text.len() >= 10);
        }
    }

    #[test]
    fn test_agenda_result_rows_emitted_even_with_summary() {
        let mut rec = record(5);
        rec.summary = Some("summary present for this meeting".to_string());
        rec.agenda_items = vec![AgendaItemRecord {
            id: 51,
            title: "Adopt the noise ordinance".to_string(),
            text: None,
        }];

        let rows = collect_corpus(&[rec], &config());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row.source_kind, SourceKind::Summary);
        assert_eq!(rows[1].row.source_kind, SourceKind::AgendaItemResult);
    }

    #[test]
    fn test_short_rows_dropped_not_padded() {
        let mut rec = record(6);
        rec.summary = Some("too short".to_string()); // 9 chars < 10
        rec.content = Some("tiny".to_string());

        let rows = collect_corpus(&[rec], &config());
        assert!(rows.is_empty());
    }

    #[test]
    fn test_row_ids_dense_and_ordered() {
        let mut a = record(1);
        a.summary = Some("first document summary text".to_string());
        let mut b = record(2);
        b.summary = Some("second document summary text".to_string());

        let rows = collect_corpus(&[a, b], &config());
        for (i, r) in rows.iter().enumerate() {
            assert_eq!(r.row.row_id, i);
        }
    }

    // ------------------------------------------------------------------------
    // Fingerprints
    // ------------------------------------------------------------------------

    #[test]
    fn test_corpus_hash_stable_across_runs() {
        let mut rec = record(1);
        rec.summary = Some("stable summary text for hashing".to_string());
        let records = vec![rec];

        let h1 = corpus_hash(&collect_corpus(&records, &config()));
        let h2 = corpus_hash(&collect_corpus(&records, &config()));
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn test_corpus_hash_order_independent() {
        let mut a = record(1);
        a.summary = Some("first document summary text".to_string());
        let mut b = record(2);
        b.summary = Some("second document summary text".to_string());

        let forward = collect_corpus(&[a.clone(), b.clone()], &config());
        let reverse = collect_corpus(&[b, a], &config());
        assert_eq!(corpus_hash(&forward), corpus_hash(&reverse));
    }

    #[test]
    fn test_corpus_hash_changes_with_content() {
        let mut a = record(1);
        a.summary = Some("original summary text here".to_string());
        let mut b = record(1);
        b.summary = Some("amended summary text here".to_string());

        let ha = corpus_hash(&collect_corpus(&[a], &config()));
        let hb = corpus_hash(&collect_corpus(&[b], &config()));
        assert_ne!(ha, hb);
    }

    #[test]
    fn test_text_hash_hex() {
        let h = text_hash("council");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, text_hash("council"));
        assert_ne!(h, text_hash("Council"));
    }

    #[test]
    fn test_source_counts_and_catalog_count() {
        let mut a = record(1);
        a.summary = Some("summary for document one okay".to_string());
        a.agenda_items = vec![AgendaItemRecord {
            id: 11,
            title: "Approve meeting minutes now".to_string(),
            text: None,
        }];
        let mut b = record(2);
        b.summary = Some("summary for document two okay".to_string());

        let rows = collect_corpus(&[a, b], &config());
        let counts = source_counts(&rows);
        assert_eq!(counts.get(&SourceKind::Summary), Some(&2));
        assert_eq!(counts.get(&SourceKind::AgendaItemResult), Some(&1));
        assert_eq!(catalog_count(&rows), 2);
    }

    // ------------------------------------------------------------------------
    // JSON snapshot source
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_json_corpus_source_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        let mut rec = record(9);
        rec.summary = Some("snapshot summary for round trip".to_string());
        let json = serde_json::to_string(&vec![rec]).unwrap();
        std::fs::write(&path, json).unwrap();

        let source = JsonCorpusSource::new(&path);
        let records = source.fetch_catalog().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].catalog_id, 9);
    }

    #[tokio::test]
    async fn test_json_corpus_source_missing_file() {
        let source = JsonCorpusSource::new("/nonexistent/snapshot.json");
        let err = source.fetch_catalog().await.unwrap_err();
        assert!(err.to_string().contains("snapshot.json"));
    }
}
