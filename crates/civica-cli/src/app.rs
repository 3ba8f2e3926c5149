//! Civica CLI application.
//!
//! Wires configuration, logging, and the retrieval crate together and
//! dispatches the subcommands: build-index, query, status, version.

use civica_core::{Error, Result};
use civica_retrieval::{
    create_backend, service_status, CatalogRecord, CorpusSource, DocumentHydrator,
    JsonCorpusSource, Orchestrator, SearchFilters, SearchHit, SemanticCandidate, SharedEmbedder,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::cli::{CliArgs, Command};
use crate::config::CivicaConfig;

// ============================================================================
// CivicaApp
// ============================================================================

/// The CLI application: loaded configuration plus command dispatch.
pub struct CivicaApp {
    config: CivicaConfig,
    version: String,
}

impl CivicaApp {
    /// Create from CLI args, loading config from file/env.
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let config = CivicaConfig::load(args.config.as_deref())?;
        Ok(Self {
            config,
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &CivicaConfig {
        &self.config
    }

    /// Initialise tracing-based logging.
    ///
    /// Uses `RUST_LOG` env var if set, otherwise defaults based on verbosity flags.
    pub fn init_logging(&self, verbose: bool, quiet: bool) {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else if quiet {
            EnvFilter::new("warn")
        } else if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        };

        // Ignore error if a subscriber is already set (e.g. in tests).
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }

    /// Run the CLI with the given arguments.
    pub async fn run(&self, args: CliArgs) -> Result<()> {
        self.init_logging(args.verbose, args.quiet);

        match args.command {
            Some(Command::BuildIndex { snapshot }) => {
                self.handle_build_index(snapshot.as_deref()).await
            }
            Some(Command::Query {
                query,
                limit,
                city,
                organization,
                category,
                date_from,
                date_to,
                json,
            }) => {
                let filters = SearchFilters {
                    city,
                    organization,
                    meeting_category: category,
                    date_from,
                    date_to,
                };
                self.handle_query(&query, limit, &filters, json).await
            }
            Some(Command::Status { json }) => self.handle_status(json).await,
            Some(Command::Version) => {
                println!("civica {}", self.version);
                Ok(())
            }
            None => {
                println!("civica {} — use --help for usage", self.version);
                Ok(())
            }
        }
    }

    /// Resolve the corpus snapshot path from the flag or the config file.
    fn snapshot_path(&self, flag: Option<&str>) -> Result<String> {
        flag.map(str::to_string)
            .or_else(|| self.config.corpus_path.clone())
            .ok_or_else(|| {
                Error::config("no corpus snapshot: pass --snapshot or set corpus_path in config")
            })
    }

    async fn handle_build_index(&self, snapshot: Option<&str>) -> Result<()> {
        let path = self.snapshot_path(snapshot)?;
        let semantic = self.config.semantic.clone();
        let embedder = SharedEmbedder::new(semantic.clone());
        let backend = create_backend(&semantic, embedder)?;

        let source = JsonCorpusSource::new(&path);
        let report = backend.build_index(&source).await?;

        if report.from_cache {
            println!(
                "Index unchanged: {} rows (corpus fingerprint matched, nothing re-embedded)",
                report.metadata.row_count
            );
        } else {
            println!(
                "Index built: {} rows, dim {}, model {}, engine {} ({} ms)",
                report.metadata.row_count,
                report.metadata.embedding_dim,
                report.metadata.model_name,
                report.metadata.engine,
                report.duration_ms
            );
        }
        Ok(())
    }

    async fn handle_query(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
        json: bool,
    ) -> Result<()> {
        let semantic = self.config.semantic.clone();
        let embedder = SharedEmbedder::new(semantic.clone());
        let backend = create_backend(&semantic, embedder)?;

        let snapshot = self.snapshot_path(None)?;
        let hydrator = Arc::new(SnapshotHydrator::load(&snapshot).await?);
        let orchestrator = Orchestrator::new(semantic, backend, hydrator);

        let response = orchestrator.search(query, limit, filters).await?;

        if json {
            println!("{}", serde_json::to_string_pretty(&response)?);
            return Ok(());
        }

        if response.hits.is_empty() {
            println!("No results.");
        }
        for (rank, hit) in response.hits.iter().enumerate() {
            println!(
                "{:2}. [{:.3}] {}  ({}, {}, {})",
                rank + 1,
                hit.semantic_score,
                hit.title,
                hit.city,
                hit.organization,
                hit.date.as_deref().unwrap_or("undated"),
            );
            if !hit.snippet.is_empty() {
                println!("      {}", hit.snippet);
            }
        }
        println!(
            "{} of {} matches ({}, pool {}, {} expansions)",
            response.hits.len(),
            response.estimated_total_hits,
            response.diagnostics.engine,
            response.diagnostics.pool_size,
            response.diagnostics.expansion_steps,
        );
        Ok(())
    }

    async fn handle_status(&self, json: bool) -> Result<()> {
        let semantic = self.config.semantic.clone();
        let embedder = SharedEmbedder::new(semantic.clone());
        let backend = create_backend(&semantic, embedder)?;

        let status = service_status(&semantic, backend.as_ref()).await?;

        if json {
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }
        println!("{}", status.describe());
        Ok(())
    }
}

// ============================================================================
// SnapshotHydrator
// ============================================================================

/// Hydrator backed by the same JSON corpus snapshot the index was built
/// from.
///
/// The snapshot stands in for the document store: titles, snippets, and the
/// authoritative filter metadata all come from it, and candidates whose
/// entity is missing from the snapshot are dropped.
pub struct SnapshotHydrator {
    catalogs: HashMap<i64, CatalogRecord>,
    // agenda item id -> (owning catalog id, item index)
    agenda_items: HashMap<i64, (i64, usize)>,
}

/// Maximum snippet length in characters.
const SNIPPET_MAX_CHARS: usize = 240;

impl SnapshotHydrator {
    /// Load and index a snapshot file.
    pub async fn load(path: &str) -> Result<Self> {
        let records = JsonCorpusSource::new(path).fetch_catalog().await?;
        Ok(Self::from_records(records))
    }

    /// Build the lookup maps from in-memory records.
    pub fn from_records(records: Vec<CatalogRecord>) -> Self {
        let mut catalogs = HashMap::new();
        let mut agenda_items = HashMap::new();
        for record in records {
            for (idx, item) in record.agenda_items.iter().enumerate() {
                agenda_items.insert(item.id, (record.catalog_id, idx));
            }
            catalogs.insert(record.catalog_id, record);
        }
        Self {
            catalogs,
            agenda_items,
        }
    }

    fn meeting_hit(&self, candidate: &SemanticCandidate) -> Option<SearchHit> {
        let catalog_id = candidate.row.catalog_id?;
        let record = self.catalogs.get(&catalog_id)?;
        Some(SearchHit {
            result_kind: candidate.row.result_kind,
            source_db_id: candidate.row.source_db_id,
            event_id: record.event_id,
            catalog_id: Some(catalog_id),
            agenda_item_id: None,
            title: meeting_title(record),
            snippet: meeting_snippet(record),
            city: record.city.clone(),
            organization: record.organization.clone(),
            meeting_category: record.meeting_category.clone(),
            date: record.date.clone(),
            semantic_score: candidate.score,
        })
    }

    fn agenda_item_hit(&self, candidate: &SemanticCandidate) -> Option<SearchHit> {
        let item_id = candidate.row.agenda_item_id?;
        let (catalog_id, idx) = *self.agenda_items.get(&item_id)?;
        let record = self.catalogs.get(&catalog_id)?;
        let item = record.agenda_items.get(idx)?;
        Some(SearchHit {
            result_kind: candidate.row.result_kind,
            source_db_id: candidate.row.source_db_id,
            event_id: record.event_id,
            catalog_id: Some(catalog_id),
            agenda_item_id: Some(item_id),
            title: item.title.clone(),
            snippet: truncate_chars(item.text.as_deref().unwrap_or(""), SNIPPET_MAX_CHARS),
            city: record.city.clone(),
            organization: record.organization.clone(),
            meeting_category: record.meeting_category.clone(),
            date: record.date.clone(),
            semantic_score: candidate.score,
        })
    }
}

#[async_trait]
impl DocumentHydrator for SnapshotHydrator {
    async fn hydrate(&self, candidates: &[SemanticCandidate]) -> Result<Vec<SearchHit>> {
        Ok(candidates
            .iter()
            .filter_map(|candidate| match candidate.row.result_kind {
                civica_retrieval::ResultKind::Meeting => self.meeting_hit(candidate),
                civica_retrieval::ResultKind::AgendaItem => self.agenda_item_hit(candidate),
            })
            .collect())
    }
}

/// Display title for a meeting document. Catalog records carry no title of
/// their own, so one is synthesized from organization and date.
fn meeting_title(record: &CatalogRecord) -> String {
    match record.date.as_deref() {
        Some(date) => format!("{} ({date})", record.organization),
        None => record.organization.clone(),
    }
}

/// Snippet for a meeting document: summary, extractive summary, or a
/// content prefix, in that order.
fn meeting_snippet(record: &CatalogRecord) -> String {
    let text = record
        .summary
        .as_deref()
        .or(record.summary_extractive.as_deref())
        .or(record.content.as_deref())
        .unwrap_or("");
    truncate_chars(text, SNIPPET_MAX_CHARS)
}

/// Truncate on a char boundary, appending an ellipsis when cut.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

// ============================================================================
// Tests
// ============================================================================
