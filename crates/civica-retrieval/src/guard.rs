//! Runtime safety guard.
//!
//! Two preflight checks run before any model load or index touch:
//!
//! 1. **Process topology**: the resident index and model are large and
//!    process-local. A deployment declaring more than one worker process
//!    must set the explicit multi-process override, otherwise the guard
//!    fails before the model loader is ever invoked. The worker count is
//!    read from injected configuration, never inferred from process-name
//!    heuristics: supervisory wrappers can look multi-process while being
//!    single-worker.
//! 2. **ANN availability**: when `require_ann` is set, a build without the
//!    native ANN engine compiled in is a configuration error instead of a
//!    silent brute-force downgrade.

use civica_core::{Error, Result};

use crate::config::SemanticConfig;

/// Whether the native ANN engine was compiled into this binary.
pub fn ann_engine_available() -> bool {
    cfg!(feature = "vector-lancedb")
}

/// Run both guard checks. Must be called before resource acquisition.
pub fn preflight(config: &SemanticConfig) -> Result<()> {
    check_topology(config)?;
    check_ann_requirement(config)?;
    Ok(())
}

/// Reject multi-process deployments without the explicit override.
fn check_topology(config: &SemanticConfig) -> Result<()> {
    if config.worker_processes > 1 && !config.allow_multi_process {
        return Err(Error::config(format!(
            "Deployment declares {} worker processes; loading a resident index in every \
             worker multiplies memory use. Set allow_multi_process to acknowledge this",
            config.worker_processes
        )));
    }
    Ok(())
}

/// Enforce the strict-ANN flag.
fn check_ann_requirement(config: &SemanticConfig) -> Result<()> {
    if config.require_ann && !ann_engine_available() {
        return Err(Error::config(
            "require_ann is set but this binary was built without the 'vector-lancedb' feature",
        ));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
