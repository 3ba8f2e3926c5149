//! Configuration loading for the Civica CLI.
//!
//! Loads from TOML files, environment variables, and defaults using the
//! `confyg` crate.
//!
//! # Loading Priority
//!
//! 1. Explicit `--config <path>` flag
//! 2. `CIVICA_CONFIG` environment variable
//! 3. XDG default: `~/.config/civica/config.toml`
//! 4. Built-in defaults

use civica_core::{Error, Result};
use civica_retrieval::SemanticConfig;
use confyg::{env, Confygery};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CivicaConfig {
    /// Default path to the JSON corpus snapshot.
    pub corpus_path: Option<String>,

    /// Semantic retrieval configuration.
    pub semantic: SemanticConfig,
}

impl CivicaConfig {
    /// Load configuration from file, environment, and defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder =
            Confygery::new().map_err(|e| Error::config(format!("config init: {e}")))?;

        if let Some(path) = Self::resolve_config_path(config_path) {
            if path.exists() {
                builder
                    .add_file(&path.to_string_lossy())
                    .map_err(|e| Error::config(format!("config file: {e}")))?;
            }
        }

        let mut env_opts = env::Options::with_top_level("CIVICA");
        env_opts.add_section("semantic");
        builder
            .add_env(env_opts)
            .map_err(|e| Error::config(format!("config env: {e}")))?;

        let config: Self = builder
            .build()
            .map_err(|e| Error::config(format!("config build: {e}")))?;

        config.semantic.validate()?;
        Ok(config)
    }

    /// Resolve the config file path from explicit flag, env var, or XDG default.
    pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("CIVICA_CONFIG") {
            return Some(PathBuf::from(path));
        }
        Self::default_config_path()
    }

    /// Return the XDG default config path.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("civica").join("config.toml"))
    }

    /// Serialize this config to a pretty-printed TOML string.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = CivicaConfig::default();
        assert!(config.corpus_path.is_none());
        assert_eq!(config.semantic.backend, "local");
        config.semantic.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
                corpus_path = "/var/lib/civica/corpus.json"
                [semantic]
                backend = "local"
                provider = "mock"
                index_path = "/var/lib/civica/index"
            "#,
        )
        .unwrap();

        let config = CivicaConfig::load(path.to_str()).unwrap();
        assert_eq!(
            config.corpus_path.as_deref(),
            Some("/var/lib/civica/corpus.json")
        );
        assert_eq!(config.semantic.provider, "mock");
        assert_eq!(
            config.semantic.index_path.as_deref(),
            Some("/var/lib/civica/index")
        );
        // Unspecified fields keep their defaults.
        assert_eq!(config.semantic.pool_base, 200);
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let config = CivicaConfig::load(Some("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.semantic.backend, "local");
    }

    #[test]
    fn test_load_rejects_invalid_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[semantic]\nbackend = \"faiss\"\n").unwrap();
        let err = CivicaConfig::load(path.to_str()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_to_toml_round_trip() {
        let config = CivicaConfig::default();
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("[semantic]"));
        let back: CivicaConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.semantic.backend, config.semantic.backend);
    }
}
