//! Relational pgvector backend.
//!
//! Maintains one embedding row per (parent document, model) in Postgres
//! with the `vector` extension, and reranks lexically matched documents
//! with native cosine distance (`embedding <=> $query`). This backend
//! answers no open-corpus queries: it exists for hybrid reranking, so
//! [`SemanticBackend::query`] is a configuration error by contract.
//!
//! Builds are incremental. Each eligible document (one with a derived
//! summary) carries a `source_hash` of the exact text that produced its
//! stored vector; a rebuild skips documents whose hash is unchanged and
//! upserts the rest in place. Rows are never wholesale-deleted.
//!
//! # Schema
//!
//! `persisted_embeddings`: exactly one of `catalog_id` / `agenda_item_id`
//! is set per row (check constraint), with partial unique indexes on
//! `(catalog_id, model_name)` and `(agenda_item_id, model_name)`.
//!
//! # Feature Gate
//!
//! This module requires the `relational` feature.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use civica_core::{Error, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::OnceCell;

use crate::backend::{eligible_catalog_ids, SemanticBackend};
use crate::config::SemanticConfig;
use crate::corpus::{self, CorpusRow, CorpusSource};
use crate::embedding::SharedEmbedder;
use crate::guard;
use crate::types::{
    BuildMetadata, BuildReport, EngineKind, IndexHealth, LexicalCandidate, RerankedDocument,
    SemanticCandidate, SourceKind,
};

/// Postgres-backed semantic store, rerank-only.
pub struct RelationalBackend {
    config: SemanticConfig,
    embedder: SharedEmbedder,
    database_url: String,
    pool: OnceCell<PgPool>,
}

impl RelationalBackend {
    /// Create the backend. No connection is opened until first use.
    pub fn new(config: SemanticConfig, embedder: SharedEmbedder) -> Result<Self> {
        let database_url = config
            .database_url
            .clone()
            .ok_or_else(|| Error::config("database_url is required for the relational backend"))?;
        Ok(Self {
            config,
            embedder,
            database_url,
            pool: OnceCell::new(),
        })
    }

    /// Model name the current configuration embeds with.
    fn configured_model_name(&self) -> &str {
        if self.config.provider == "mock" {
            "mock"
        } else {
            &self.config.model
        }
    }

    /// Lazily opened connection pool, shared across callers.
    async fn pool(&self) -> Result<&PgPool> {
        self.pool
            .get_or_try_init(|| async {
                PgPoolOptions::new()
                    .max_connections(5)
                    .connect(&self.database_url)
                    .await
                    .map_err(|e| Error::store(format!("Failed to connect to Postgres: {e}")))
            })
            .await
    }

    /// Create the extension, table, and constraints if absent.
    async fn ensure_schema(&self, pool: &PgPool, dimension: usize) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(pool)
            .await
            .map_err(|e| Error::store(format!("Failed to create vector extension: {e}")))?;

        // Exactly one of catalog_id / agenda_item_id is set per row.
        let create = format!(
            "CREATE TABLE IF NOT EXISTS persisted_embeddings (
                id             BIGSERIAL PRIMARY KEY,
                catalog_id     BIGINT,
                agenda_item_id BIGINT,
                model_name     TEXT NOT NULL,
                embedding_dim  BIGINT NOT NULL,
                embedding      vector({dimension}) NOT NULL,
                source_hash    TEXT NOT NULL,
                updated_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
                CHECK ((catalog_id IS NULL) <> (agenda_item_id IS NULL))
            )"
        );
        sqlx::query(&create)
            .execute(pool)
            .await
            .map_err(|e| Error::store(format!("Failed to create embeddings table: {e}")))?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS persisted_embeddings_catalog_model
             ON persisted_embeddings (catalog_id, model_name) WHERE catalog_id IS NOT NULL",
        )
        .execute(pool)
        .await
        .map_err(|e| Error::store(format!("Failed to create catalog index: {e}")))?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS persisted_embeddings_item_model
             ON persisted_embeddings (agenda_item_id, model_name) WHERE agenda_item_id IS NOT NULL",
        )
        .execute(pool)
        .await
        .map_err(|e| Error::store(format!("Failed to create agenda item index: {e}")))?;

        Ok(())
    }

    /// Stored source hashes per catalog id for the configured model.
    ///
    /// A missing table reads as an empty store: nothing was ever built.
    async fn stored_hashes(&self, pool: &PgPool) -> HashMap<i64, String> {
        let rows = sqlx::query(
            "SELECT catalog_id, source_hash FROM persisted_embeddings
             WHERE model_name = $1 AND catalog_id IS NOT NULL",
        )
        .bind(self.configured_model_name())
        .fetch_all(pool)
        .await;

        match rows {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| {
                    let id: Option<i64> = row.try_get("catalog_id").ok()?;
                    let hash: String = row.try_get("source_hash").ok()?;
                    Some((id?, hash))
                })
                .collect(),
            Err(e) => {
                log::debug!("no stored embeddings readable ({e}); treating store as empty");
                HashMap::new()
            }
        }
    }
}

/// The document rows the relational backend maintains: one summary row per
/// eligible parent document.
fn eligible_summary_rows(rows: Vec<CorpusRow>) -> Vec<CorpusRow> {
    rows.into_iter()
        .filter(|r| r.row.source_kind == SourceKind::Summary)
        .collect()
}

#[async_trait]
impl SemanticBackend for RelationalBackend {
    fn engine(&self) -> EngineKind {
        EngineKind::Relational
    }

    fn supports_bare_query(&self) -> bool {
        false
    }

    async fn build_index(&self, source: &dyn CorpusSource) -> Result<BuildReport> {
        guard::preflight(&self.config)?;
        let started = Instant::now();

        let records = source.fetch_catalog().await?;
        let rows = eligible_summary_rows(corpus::collect_corpus(&records, &self.config));
        if rows.is_empty() {
            return Err(Error::config(
                "corpus produced no documents with a derived summary; nothing to build",
            ));
        }

        let pool = self.pool().await?;
        let stored = self.stored_hashes(pool).await;

        // Skip-if-hash-matches: only documents whose summary text changed
        // (or never got a vector) are re-embedded.
        let to_embed: Vec<(&CorpusRow, String)> = rows
            .iter()
            .filter_map(|entry| {
                let catalog_id = entry.row.catalog_id?;
                let hash = corpus::text_hash(&entry.text);
                match stored.get(&catalog_id) {
                    Some(existing) if *existing == hash => None,
                    _ => Some((entry, hash)),
                }
            })
            .collect();

        let model_name = self.configured_model_name().to_string();
        let mut metadata = BuildMetadata {
            model_name: model_name.clone(),
            built_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            row_count: rows.len(),
            catalog_count: corpus::catalog_count(&rows),
            corpus_hash: corpus::corpus_hash(&rows),
            source_counts: corpus::source_counts(&rows),
            engine: EngineKind::Relational,
            embedding_dim: 0,
        };

        if to_embed.is_empty() {
            log::info!(
                "all {} document vectors current; skipping relational rebuild",
                rows.len()
            );
            metadata.embedding_dim = self.config.dimension;
            return Ok(BuildReport {
                metadata,
                from_cache: true,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        let provider = self.embedder.get().await?;
        self.ensure_schema(pool, provider.dimension()).await?;
        metadata.embedding_dim = provider.dimension();

        log::info!(
            "relational build: {} of {} documents need embedding, model {}",
            to_embed.len(),
            rows.len(),
            provider.name()
        );

        for batch in to_embed.chunks(self.config.batch_size.max(1)) {
            let texts: Vec<&str> = batch.iter().map(|(entry, _)| entry.text.as_str()).collect();
            let vectors = provider.embed_batch(&texts).await?;

            for ((entry, hash), vector) in batch.iter().zip(vectors) {
                sqlx::query(
                    "INSERT INTO persisted_embeddings
                       (catalog_id, model_name, embedding_dim, embedding, source_hash)
                     VALUES ($1, $2, $3, $4, $5)
                     ON CONFLICT (catalog_id, model_name) WHERE catalog_id IS NOT NULL
                     DO UPDATE SET
                       embedding = EXCLUDED.embedding,
                       embedding_dim = EXCLUDED.embedding_dim,
                       source_hash = EXCLUDED.source_hash,
                       updated_at = now()",
                )
                .bind(entry.row.catalog_id)
                .bind(&model_name)
                .bind(provider.dimension() as i64)
                .bind(pgvector::Vector::from(vector))
                .bind(hash)
                .execute(pool)
                .await
                .map_err(|e| {
                    Error::store(format!(
                        "Failed to upsert embedding for catalog {:?}: {e}",
                        entry.row.catalog_id
                    ))
                })?;
            }
        }

        Ok(BuildReport {
            metadata,
            from_cache: false,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn query(&self, _query: &str, _limit: usize) -> Result<Vec<SemanticCandidate>> {
        Err(Error::config(
            "The relational backend only reranks lexical candidates; \
             open-corpus queries require the local backend",
        ))
    }

    async fn rerank(
        &self,
        query: &str,
        candidates: &[LexicalCandidate],
    ) -> Result<Vec<RerankedDocument>> {
        guard::preflight(&self.config)?;
        let wanted = eligible_catalog_ids(candidates, self.config.rerank_candidate_cap);
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let pool = self.pool().await?;
        let provider = self.embedder.get().await?;
        let query_vec = pgvector::Vector::from(provider.embed(query).await?);

        // `<=>` is pgvector cosine distance; one bulk query over exactly the
        // offered candidate set, ties resolved by catalog id.
        let pg_rows = sqlx::query(
            "SELECT catalog_id, 1 - (embedding <=> $1) AS score
             FROM persisted_embeddings
             WHERE model_name = $2 AND catalog_id = ANY($3)
             ORDER BY embedding <=> $1, catalog_id",
        )
        .bind(&query_vec)
        .bind(self.configured_model_name())
        .bind(&wanted)
        .fetch_all(pool)
        .await
        .map_err(|e| Error::store(format!("Rerank query failed: {e}")))?;

        let mut reranked = Vec::with_capacity(pg_rows.len());
        for pg_row in &pg_rows {
            let catalog_id: i64 = pg_row
                .try_get("catalog_id")
                .map_err(|e| Error::store(format!("Bad rerank row: {e}")))?;
            let score: f64 = pg_row
                .try_get("score")
                .map_err(|e| Error::store(format!("Bad rerank row: {e}")))?;
            reranked.push(RerankedDocument {
                catalog_id,
                score: score as f32,
            });
        }
        Ok(reranked)
    }

    async fn health(&self) -> Result<IndexHealth> {
        let pool = match self.pool().await {
            Ok(pool) => pool,
            Err(e) => {
                log::warn!("relational health probe could not connect: {e}");
                return Ok(IndexHealth::absent());
            }
        };

        let row = sqlx::query(
            "SELECT count(*) AS n, max(updated_at) AS latest
             FROM persisted_embeddings WHERE model_name = $1",
        )
        .bind(self.configured_model_name())
        .fetch_one(pool)
        .await;

        // A missing table means nothing was ever built.
        let Ok(row) = row else {
            return Ok(IndexHealth::absent());
        };

        let count: i64 = row
            .try_get("n")
            .map_err(|e| Error::store(format!("Bad health row: {e}")))?;
        if count == 0 {
            return Ok(IndexHealth::absent());
        }
        let latest: Option<DateTime<Utc>> = row
            .try_get("latest")
            .map_err(|e| Error::store(format!("Bad health row: {e}")))?;

        Ok(IndexHealth {
            artifacts_present: true,
            consistent: true,
            row_count: Some(count as usize),
            model_name: Some(self.configured_model_name().to_string()),
            built_at: latest.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
            engine: Some(EngineKind::Relational),
        })
    }
}

impl std::fmt::Debug for RelationalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalBackend")
            .field("model", &self.configured_model_name())
            .field("connected", &self.pool.initialized())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
