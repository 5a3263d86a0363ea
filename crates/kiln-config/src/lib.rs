//! Normalized configuration consumed by the transform engine.
//!
//! Loading and validating user configuration happens elsewhere; this crate
//! only describes the already-normalized shape that hosts hand to kiln, plus
//! the logging settings shared by every kiln binary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod logging;

pub use logging::{init_tracing, LoggingConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid json config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid toml config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// One `(pattern, module, options)` entry of the `transform` table.
///
/// Serialized as a three element array so configs stay close to what users
/// write by hand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformPattern(pub String, pub String, pub serde_json::Value);

impl TransformPattern {
    pub fn new(
        pattern: impl Into<String>,
        module: impl Into<String>,
        options: serde_json::Value,
    ) -> Self {
        Self(pattern.into(), module.into(), options)
    }

    /// Regular expression source matched against file paths.
    pub fn pattern(&self) -> &str {
        &self.0
    }

    /// Name the transformer provider resolves the capability from.
    pub fn module(&self) -> &str {
        &self.1
    }

    /// User supplied options handed to the transformer factory.
    pub fn options(&self) -> &serde_json::Value {
        &self.2
    }
}

/// Per-project configuration. Immutable for the lifetime of an engine instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConfig {
    /// Opaque project identifier, used to namespace the transform cache.
    pub id: String,
    pub root_dir: PathBuf,
    /// When `false`, cached transform results are never read (but still written).
    pub cache: bool,
    pub cache_directory: PathBuf,
    /// Ordered list of transformers; the first matching pattern wins.
    pub transform: Vec<TransformPattern>,
    pub transform_ignore_patterns: Vec<String>,
    pub test_regex: Vec<String>,
    pub test_match: Vec<String>,
    pub test_path_ignore_patterns: Vec<String>,
    pub coverage_path_ignore_patterns: Vec<String>,
    pub force_coverage_match: Vec<String>,
    pub setup_files: Vec<PathBuf>,
    pub setup_files_after_env: Vec<PathBuf>,
    pub global_setup: Option<PathBuf>,
    pub global_teardown: Option<PathBuf>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            id: "default".to_owned(),
            root_dir: PathBuf::from("/"),
            cache: true,
            cache_directory: std::env::temp_dir().join("kiln"),
            transform: Vec::new(),
            transform_ignore_patterns: vec![
                "/node_modules/".to_owned(),
                r"\.pnp\.[^\/]+$".to_owned(),
            ],
            test_regex: Vec::new(),
            test_match: vec![
                "**/__tests__/**/*.[jt]s?(x)".to_owned(),
                "**/?(*.)+(spec|test).[jt]s?(x)".to_owned(),
            ],
            test_path_ignore_patterns: vec!["/node_modules/".to_owned()],
            coverage_path_ignore_patterns: vec!["/node_modules/".to_owned()],
            force_coverage_match: Vec::new(),
            setup_files: Vec::new(),
            setup_files_after_env: Vec::new(),
            global_setup: None,
            global_teardown: None,
        }
    }
}

impl ProjectConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Stable serialization of the whole config.
    ///
    /// Object keys are emitted in sorted order (`serde_json::Value` maps are
    /// ordered), so two structurally equal configs always produce the same
    /// string. The result keys both cache entries and the shared per-project
    /// pipeline state.
    pub fn fingerprint(&self) -> String {
        match serde_json::to_value(self).and_then(|value| serde_json::to_string(&value)) {
            Ok(text) => text,
            Err(err) => {
                // Only reachable with non-string map keys, which the config types cannot hold.
                tracing::debug!(
                    target = "kiln.config",
                    error = %err,
                    "failed to serialize project config; falling back to debug fingerprint"
                );
                format!("{self:?}")
            }
        }
    }

    pub fn is_setup_file(&self, path: &Path) -> bool {
        self.setup_files.iter().any(|p| p == path)
            || self.setup_files_after_env.iter().any(|p| p == path)
    }
}

/// Which component is responsible for collecting coverage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CoverageProvider {
    /// kiln instruments the transformed code itself.
    #[default]
    Internal,
    /// The runtime collects coverage from bytecode; kiln never instruments.
    ExternalBytecode,
}

/// Per-invocation options supplied by the module loader.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunOptions {
    pub collect_coverage: bool,
    /// Globs (relative to the project root) selecting files to instrument.
    pub collect_coverage_from: Vec<String>,
    /// Explicit allow-list of files to instrument.
    pub collect_coverage_only_from: Option<BTreeSet<PathBuf>>,
    pub coverage_provider: CoverageProvider,
    pub changed_files: Option<BTreeSet<PathBuf>>,
    pub sources_related_to_tests_in_changed_files: Option<BTreeSet<PathBuf>>,

    pub supports_dynamic_import: bool,
    pub supports_export_namespace_from: bool,
    pub supports_static_esm: bool,
    pub supports_top_level_await: bool,

    /// Set for the runtime's own modules; such files are never transformed.
    pub is_internal_module: bool,
}

impl RunOptions {
    pub fn with_coverage(collect_coverage: bool) -> Self {
        Self {
            collect_coverage,
            ..Self::default()
        }
    }
}
