//! Query-facing availability contract.
//!
//! An empty result set must never stand in for "broken": callers get an
//! explicit status distinguishing "disabled by configuration" from "never
//! built" from "stale artifacts" from "ready". Derived from the backend
//! health probe only, so checking status never loads the embedding model.

use civica_core::Result;
use serde::Serialize;

use crate::backend::SemanticBackend;
use crate::config::SemanticConfig;
use crate::types::IndexHealth;

/// Availability of the semantic retrieval service.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Semantic search is switched off in configuration.
    Disabled,
    /// No index was ever built; an operator must run a build.
    NotBuilt,
    /// Artifacts exist but are mutually inconsistent; a rebuild is required.
    Stale,
    /// The index is present and consistent.
    Ready {
        /// Health details of the serving backend.
        health: IndexHealth,
    },
}

impl ServiceStatus {
    /// Whether queries can be served.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Operator-facing one-line description.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Disabled => "semantic search is disabled by configuration",
            Self::NotBuilt => "semantic index has never been built; run a build",
            Self::Stale => "semantic index artifacts are stale; rebuild required",
            Self::Ready { .. } => "semantic index is ready",
        }
    }
}

/// Derive the service status from configuration and backend health.
pub async fn service_status(
    config: &SemanticConfig,
    backend: &dyn SemanticBackend,
) -> Result<ServiceStatus> {
    if !config.enabled {
        return Ok(ServiceStatus::Disabled);
    }
    let health = backend.health().await?;
    if !health.artifacts_present {
        return Ok(ServiceStatus::NotBuilt);
    }
    if !health.consistent {
        return Ok(ServiceStatus::Stale);
    }
    Ok(ServiceStatus::Ready { health })
}

// ============================================================================
// Tests
// ============================================================================
