//! Local file-backed index backend.
//!
//! # Architecture
//!
//! ```text
//! build_index ──► collect corpus ──► fingerprint ──┬── unchanged ──► from_cache
//!                                                  └── changed ───► embed batches
//!                                                                     │
//!                                          atomic artifact swap ◄─────┘
//!
//! query ──► resident artifacts (lazy, double-checked) ──► ANN table
//!                                                           │ unavailable
//!                                                           ▼
//!                                                  brute-force matrix scan
//! ```
//!
//! The resident state is loaded at most once per process and replaced
//! wholesale on rebuild. Scores are inner products over unit vectors, i.e.
//! cosine similarity.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use civica_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::artifacts::{self, ArtifactPaths, LoadedArtifacts, VectorMatrix};
use crate::backend::{eligible_catalog_ids, SemanticBackend};
use crate::config::SemanticConfig;
use crate::corpus::{self, CorpusSource};
use crate::embedding::{dot, SharedEmbedder};
use crate::guard;
use crate::types::{
    BuildMetadata, BuildReport, EngineKind, IndexHealth, LexicalCandidate, RerankedDocument,
    ResultKind, SemanticCandidate,
};

/// File-backed semantic index with a process-resident copy.
pub struct LocalIndexBackend {
    config: SemanticConfig,
    embedder: SharedEmbedder,
    paths: ArtifactPaths,
    resident: RwLock<Option<Arc<LoadedArtifacts>>>,
}

impl LocalIndexBackend {
    /// Create the backend. Nothing is loaded until the first query or build.
    pub fn new(config: SemanticConfig, embedder: SharedEmbedder) -> Result<Self> {
        let paths = ArtifactPaths::new(config.index_dir()?);
        Ok(Self {
            config,
            embedder,
            paths,
            resident: RwLock::new(None),
        })
    }

    /// Model name an index built from the current configuration would carry.
    fn configured_model_name(&self) -> &str {
        if self.config.provider == "mock" {
            "mock"
        } else {
            &self.config.model
        }
    }

    /// Get the resident artifact set, loading it from disk on first use.
    ///
    /// Double-checked under a read/write lock: concurrent first callers
    /// serialize on the write lock and all observe the same load.
    async fn ensure_resident(&self) -> Result<Arc<LoadedArtifacts>> {
        if let Some(resident) = self.resident.read().await.as_ref() {
            return Ok(Arc::clone(resident));
        }

        let mut slot = self.resident.write().await;
        if let Some(resident) = slot.as_ref() {
            return Ok(Arc::clone(resident));
        }

        let paths = self.paths.clone();
        let loaded = tokio::task::spawn_blocking(move || artifacts::load_artifacts(&paths))
            .await
            .map_err(|e| Error::operation(format!("spawn_blocking failed: {e}")))??;

        log::info!(
            "loaded resident index: {} rows, engine {}",
            loaded.metadata.row_count,
            loaded.metadata.engine
        );

        let resident = Arc::new(loaded);
        *slot = Some(Arc::clone(&resident));
        Ok(resident)
    }

    /// Replace the resident set after a successful build.
    async fn swap_resident(&self, loaded: LoadedArtifacts) {
        *self.resident.write().await = Some(Arc::new(loaded));
    }

    /// Brute-force scan of the resident matrix.
    fn scan_matrix(
        resident: &LoadedArtifacts,
        query_vec: &[f32],
        limit: usize,
    ) -> Vec<SemanticCandidate> {
        let mut scored: Vec<(f32, usize)> = (0..resident.matrix.row_count())
            .map(|i| (dot(resident.matrix.row(i), query_vec), i))
            .collect();
        select_top_k(&mut scored, limit);

        scored
            .into_iter()
            .map(|(score, idx)| SemanticCandidate {
                row_id: idx,
                score,
                row: resident.rows[idx].clone(),
            })
            .collect()
    }
}

/// Partial top-`k` selection on (score, row index) pairs.
///
/// Ordering is score descending with row index ascending as the tiebreak,
/// so equal-scored sets come out identically regardless of input order.
/// Quickselect first, then an exact sort of the surviving prefix.
pub(crate) fn select_top_k(scored: &mut Vec<(f32, usize)>, k: usize) {
    let cmp = |a: &(f32, usize), b: &(f32, usize)| {
        b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1))
    };
    if k == 0 {
        scored.clear();
        return;
    }
    if k < scored.len() {
        scored.select_nth_unstable_by(k, cmp);
        scored.truncate(k);
    }
    scored.sort_unstable_by(cmp);
}

#[async_trait]
impl SemanticBackend for LocalIndexBackend {
    fn engine(&self) -> EngineKind {
        // The resident build knows whether ANN actually succeeded; before
        // anything is resident, report what this binary could serve.
        if let Ok(slot) = self.resident.try_read() {
            if let Some(resident) = slot.as_ref() {
                return resident.metadata.engine;
            }
        }
        if guard::ann_engine_available() {
            EngineKind::LocalAnn
        } else {
            EngineKind::LocalBruteforce
        }
    }

    async fn build_index(&self, source: &dyn CorpusSource) -> Result<BuildReport> {
        guard::preflight(&self.config)?;
        let started = Instant::now();

        let records = source.fetch_catalog().await?;
        let rows = corpus::collect_corpus(&records, &self.config);
        if rows.is_empty() {
            return Err(Error::config(
                "corpus produced no indexable rows; nothing to build",
            ));
        }
        let corpus_hash = corpus::corpus_hash(&rows);

        // Unchanged corpus under the same model: keep the existing build.
        if let Ok(existing) = artifacts::load_metadata(&self.paths) {
            if existing.corpus_hash == corpus_hash
                && existing.model_name == self.configured_model_name()
            {
                log::info!(
                    "corpus unchanged ({} rows, hash {}); skipping rebuild",
                    existing.row_count,
                    &corpus_hash[..12]
                );
                return Ok(BuildReport {
                    metadata: existing,
                    from_cache: true,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
        }

        let provider = self.embedder.get().await?;
        log::info!(
            "building local index: {} rows from {} documents, model {}",
            rows.len(),
            records.len(),
            provider.name()
        );

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(rows.len());
        for batch in rows.chunks(self.config.batch_size.max(1)) {
            let texts: Vec<&str> = batch.iter().map(|r| r.text.as_str()).collect();
            vectors.extend(provider.embed_batch(&texts).await?);
        }
        let matrix = VectorMatrix::from_rows(vectors)?;

        #[cfg(feature = "vector-lancedb")]
        let engine = match crate::lancedb::build_table(&self.paths, &matrix, &rows).await {
            Ok(()) => EngineKind::LocalAnn,
            Err(e) if self.config.require_ann => return Err(e),
            Err(e) => {
                log::warn!("ANN table build failed, serving brute-force: {e}");
                EngineKind::LocalBruteforce
            }
        };
        #[cfg(not(feature = "vector-lancedb"))]
        let engine = EngineKind::LocalBruteforce;

        let indexed: Vec<_> = rows.iter().map(|r| r.row.clone()).collect();
        let metadata = BuildMetadata {
            model_name: provider.name().to_string(),
            built_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            row_count: indexed.len(),
            catalog_count: corpus::catalog_count(&rows),
            corpus_hash,
            source_counts: corpus::source_counts(&rows),
            engine,
            embedding_dim: matrix.dim(),
        };

        {
            let paths = self.paths.clone();
            let matrix = matrix.clone();
            let indexed = indexed.clone();
            let metadata = metadata.clone();
            tokio::task::spawn_blocking(move || {
                artifacts::save_artifacts(&paths, &matrix, &indexed, &metadata)
            })
            .await
            .map_err(|e| Error::operation(format!("spawn_blocking failed: {e}")))??;
        }

        self.swap_resident(LoadedArtifacts {
            matrix,
            rows: indexed,
            metadata: metadata.clone(),
        })
        .await;

        Ok(BuildReport {
            metadata,
            from_cache: false,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn query(&self, query: &str, limit: usize) -> Result<Vec<SemanticCandidate>> {
        guard::preflight(&self.config)?;
        let resident = self.ensure_resident().await?;
        let provider = self.embedder.get().await?;
        let query_vec = provider.embed(query).await?;

        #[cfg(feature = "vector-lancedb")]
        if resident.metadata.engine == EngineKind::LocalAnn {
            match crate::lancedb::search(&self.paths, &query_vec, limit, &resident.rows).await {
                Ok(candidates) => return Ok(candidates),
                Err(e) => log::warn!("ANN search failed, falling back to brute force: {e}"),
            }
        }

        Ok(Self::scan_matrix(&resident, &query_vec, limit))
    }

    async fn rerank(
        &self,
        query: &str,
        candidates: &[LexicalCandidate],
    ) -> Result<Vec<RerankedDocument>> {
        guard::preflight(&self.config)?;
        let wanted: HashSet<i64> = eligible_catalog_ids(candidates, self.config.rerank_candidate_cap)
            .into_iter()
            .collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let resident = self.ensure_resident().await?;
        let provider = self.embedder.get().await?;
        let query_vec = provider.embed(query).await?;

        // Best score per document over its meeting-kind rows.
        let mut best: HashMap<i64, f32> = HashMap::new();
        for row in &resident.rows {
            if row.result_kind != ResultKind::Meeting {
                continue;
            }
            let Some(catalog_id) = row.catalog_id.filter(|id| wanted.contains(id)) else {
                continue;
            };
            let score = dot(resident.matrix.row(row.row_id), &query_vec);
            let entry = best.entry(catalog_id).or_insert(f32::NEG_INFINITY);
            if score > *entry {
                *entry = score;
            }
        }

        let mut reranked: Vec<RerankedDocument> = best
            .into_iter()
            .map(|(catalog_id, score)| RerankedDocument { catalog_id, score })
            .collect();
        reranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.catalog_id.cmp(&b.catalog_id))
        });
        Ok(reranked)
    }

    async fn health(&self) -> Result<IndexHealth> {
        let paths = self.paths.clone();
        tokio::task::spawn_blocking(move || Ok(artifacts::inspect(&paths)))
            .await
            .map_err(|e| Error::operation(format!("spawn_blocking failed: {e}")))?
    }
}

impl std::fmt::Debug for LocalIndexBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIndexBackend")
            .field("index_dir", &self.paths.dir())
            .field("model", &self.configured_model_name())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{AgendaItemRecord, CatalogRecord};
    use tempfile::tempdir;

    struct FixedSource {
        records: Vec<CatalogRecord>,
    }

    #[async_trait]
    impl CorpusSource for FixedSource {
        async fn fetch_catalog(&self) -> Result<Vec<CatalogRecord>> {
            Ok(self.records.clone())
        }
    }

    fn record(catalog_id: i64, summary: &str) -> CatalogRecord {
        CatalogRecord {
            catalog_id,
            event_id: 1000 + catalog_id,
            summary: Some(summary.to_string()),
            summary_extractive: None,
            content: None,
            agenda_items: vec![AgendaItemRecord {
                id: catalog_id * 10,
                title: format!("Agenda item for document {catalog_id}"),
                text: Some("Discussion and vote on the matter at hand.".to_string()),
            }],
            city: "Greenfield".to_string(),
            meeting_category: "council".to_string(),
            organization: "City Council".to_string(),
            date: Some("2025-03-12".to_string()),
        }
    }

    fn sample_records() -> Vec<CatalogRecord> {
        vec![
            record(1, "Council approved playground renovation funding for Miller Park."),
            record(2, "Committee reviewed the sewer maintenance contract extension."),
            record(3, "Board discussed the downtown transit corridor study results."),
        ]
    }

    fn backend(dir: &std::path::Path) -> LocalIndexBackend {
        let config = SemanticConfig {
            provider: "mock".to_string(),
            dimension: 64,
            index_path: Some(dir.to_string_lossy().into_owned()),
            ..Default::default()
        };
        let embedder = SharedEmbedder::new(config.clone());
        LocalIndexBackend::new(config, embedder).unwrap()
    }

    // ------------------------------------------------------------------------
    // select_top_k tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_select_top_k_orders_by_score_desc() {
        let mut scored = vec![(0.1, 0), (0.9, 1), (0.5, 2), (0.7, 3)];
        select_top_k(&mut scored, 2);
        assert_eq!(scored, vec![(0.9, 1), (0.7, 3)]);
    }

    #[test]
    fn test_select_top_k_ties_break_by_row_id() {
        // Two permutations of the same tied scores must select the same set.
        let mut a = vec![(0.5, 3), (0.5, 1), (0.5, 2), (0.5, 0)];
        let mut b = vec![(0.5, 0), (0.5, 2), (0.5, 1), (0.5, 3)];
        select_top_k(&mut a, 2);
        select_top_k(&mut b, 2);
        assert_eq!(a, vec![(0.5, 0), (0.5, 1)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_select_top_k_k_larger_than_input() {
        let mut scored = vec![(0.2, 0), (0.8, 1)];
        select_top_k(&mut scored, 10);
        assert_eq!(scored, vec![(0.8, 1), (0.2, 0)]);
    }

    #[test]
    fn test_select_top_k_zero() {
        let mut scored = vec![(0.2, 0), (0.8, 1)];
        select_top_k(&mut scored, 0);
        assert!(scored.is_empty());
    }

    // ------------------------------------------------------------------------
    // Build tests
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_build_and_query() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());
        let source = FixedSource {
            records: sample_records(),
        };

        let report = backend.build_index(&source).await.unwrap();
        assert!(!report.from_cache);
        assert_eq!(report.metadata.catalog_count, 3);
        assert_eq!(report.metadata.embedding_dim, 64);
        // summary row + agenda_item_result row per document
        assert_eq!(report.metadata.row_count, 6);

        let hits = backend
            .query("playground renovation funding", 3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].row.catalog_id, Some(1));
        // The on-topic summary wins outright, not by tie-break.
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_engine_reflects_resident_build() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());
        let report = backend
            .build_index(&FixedSource {
                records: sample_records(),
            })
            .await
            .unwrap();
        // Diagnostics name the engine that actually built the resident set,
        // not just what the binary could serve.
        assert_eq!(backend.engine(), report.metadata.engine);
    }

    #[tokio::test]
    async fn test_rebuild_unchanged_corpus_is_noop() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());
        let source = FixedSource {
            records: sample_records(),
        };

        let first = backend.build_index(&source).await.unwrap();
        let second = backend.build_index(&source).await.unwrap();
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(first.metadata.corpus_hash, second.metadata.corpus_hash);
        assert_eq!(first.metadata.built_at, second.metadata.built_at);
    }

    #[tokio::test]
    async fn test_rebuild_changed_corpus_reembeds() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());

        let first = backend
            .build_index(&FixedSource {
                records: sample_records(),
            })
            .await
            .unwrap();

        let mut changed = sample_records();
        changed[0].summary = Some("Council tabled the playground renovation item.".to_string());
        let second = backend
            .build_index(&FixedSource { records: changed })
            .await
            .unwrap();

        assert!(!second.from_cache);
        assert_ne!(first.metadata.corpus_hash, second.metadata.corpus_hash);
    }

    #[tokio::test]
    async fn test_build_empty_corpus_fails() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());
        let err = backend
            .build_index(&FixedSource { records: vec![] })
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("no indexable rows"));
    }

    #[tokio::test]
    async fn test_build_respects_topology_guard() {
        let dir = tempdir().unwrap();
        let config = SemanticConfig {
            provider: "mock".to_string(),
            index_path: Some(dir.path().to_string_lossy().into_owned()),
            worker_processes: 4,
            ..Default::default()
        };
        let embedder = SharedEmbedder::new(config.clone());
        let backend = LocalIndexBackend::new(config, embedder).unwrap();

        let err = backend
            .build_index(&FixedSource {
                records: sample_records(),
            })
            .await
            .unwrap_err();
        assert!(err.is_config());
        // The guard fires before any model load.
        assert!(!backend.embedder.is_loaded());
    }

    // ------------------------------------------------------------------------
    // Query tests
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_query_respects_topology_guard() {
        // Artifacts built by a safe process must not be served by a worker
        // in an unacknowledged multi-process deployment.
        let dir = tempdir().unwrap();
        backend(dir.path())
            .build_index(&FixedSource {
                records: sample_records(),
            })
            .await
            .unwrap();

        let config = SemanticConfig {
            provider: "mock".to_string(),
            dimension: 64,
            index_path: Some(dir.path().to_string_lossy().into_owned()),
            worker_processes: 4,
            ..Default::default()
        };
        let embedder = SharedEmbedder::new(config.clone());
        let worker = LocalIndexBackend::new(config, embedder).unwrap();

        let err = worker.query("playground", 3).await.unwrap_err();
        assert!(err.is_config());
        // Neither the resident index nor the model was loaded.
        assert!(worker.resident.try_read().unwrap().is_none());
        assert!(!worker.embedder.is_loaded());

        let err = worker
            .rerank("playground", &[LexicalCandidate::meeting(1)])
            .await
            .unwrap_err();
        assert!(err.is_config());
        assert!(!worker.embedder.is_loaded());
    }

    #[tokio::test]
    async fn test_query_without_build_is_not_built() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());
        let err = backend.query("anything", 5).await.unwrap_err();
        assert!(err.is_not_built());
    }

    #[tokio::test]
    async fn test_query_loads_persisted_artifacts() {
        let dir = tempdir().unwrap();
        {
            let writer = backend(dir.path());
            writer
                .build_index(&FixedSource {
                    records: sample_records(),
                })
                .await
                .unwrap();
        }

        // Fresh backend instance, same directory: lazy load from disk.
        let reader = backend(dir.path());
        let hits = reader.query("sewer maintenance contract", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].row.catalog_id, Some(2));
    }

    #[tokio::test]
    async fn test_query_limit_caps_results() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());
        backend
            .build_index(&FixedSource {
                records: sample_records(),
            })
            .await
            .unwrap();

        let hits = backend.query("meeting", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    // ------------------------------------------------------------------------
    // Rerank tests
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_rerank_restricts_to_offered_candidates() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());
        backend
            .build_index(&FixedSource {
                records: sample_records(),
            })
            .await
            .unwrap();

        let candidates = vec![LexicalCandidate::meeting(2), LexicalCandidate::meeting(3)];
        let reranked = backend
            .rerank("sewer maintenance contract", &candidates)
            .await
            .unwrap();
        assert_eq!(reranked.len(), 2);
        // Document 1 never appears even though it exists in the index.
        assert_eq!(reranked[0].catalog_id, 2);
        assert!(reranked.iter().all(|d| d.catalog_id == 2 || d.catalog_id == 3));
        assert!(reranked[0].score >= reranked[1].score);
    }

    #[tokio::test]
    async fn test_rerank_empty_candidate_set_short_circuits() {
        // No build has happened; the empty set must not touch the artifacts.
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());
        let reranked = backend.rerank("anything", &[]).await.unwrap();
        assert!(reranked.is_empty());
    }

    // ------------------------------------------------------------------------
    // Health tests
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_health_before_and_after_build() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());

        let health = backend.health().await.unwrap();
        assert!(!health.artifacts_present);

        backend
            .build_index(&FixedSource {
                records: sample_records(),
            })
            .await
            .unwrap();

        let health = backend.health().await.unwrap();
        assert!(health.artifacts_present);
        assert!(health.consistent);
        assert_eq!(health.row_count, Some(6));
        assert_eq!(health.model_name.as_deref(), Some("mock"));
    }

    #[tokio::test]
    async fn test_health_never_loads_model() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path());
        backend.health().await.unwrap();
        assert!(!backend.embedder.is_loaded());
    }
}
