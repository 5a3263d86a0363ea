use crate::cache_fs::CacheFs;
use crate::error::Result;
use crate::pattern::{compile_ignore_pattern, PatternMatcher};
use crate::script_transformer::TransformResult;
use kiln_config::ProjectConfig;
use kiln_coverage::CoverageMatcher;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Per-project pipeline state shared by every orchestrator built for the same
/// configuration.
pub struct ProjectCache {
    config_string: String,
    ignore_pattern: Option<Regex>,
    patterns: PatternMatcher,
    coverage: CoverageMatcher,
    transformed_files: RwLock<HashMap<String, Arc<TransformResult>>>,
    cache_fs: Arc<CacheFs>,
}

impl fmt::Debug for ProjectCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectCache")
            .field("patterns", &self.patterns.len())
            .field("ignore_pattern", &self.ignore_pattern.as_ref().map(Regex::as_str))
            .field("transformed_files", &self.transformed_files.read().len())
            .field("cache_fs", &self.cache_fs.len())
            .finish()
    }
}

impl ProjectCache {
    pub fn new(config: &ProjectConfig, cache_fs: Arc<CacheFs>) -> Result<Self> {
        Ok(Self {
            config_string: config.fingerprint(),
            ignore_pattern: compile_ignore_pattern(&config.transform_ignore_patterns)?,
            patterns: PatternMatcher::new(&config.transform)?,
            coverage: CoverageMatcher::new(config)?,
            transformed_files: RwLock::new(HashMap::new()),
            cache_fs,
        })
    }

    pub fn config_string(&self) -> &str {
        &self.config_string
    }

    pub fn patterns(&self) -> &PatternMatcher {
        &self.patterns
    }

    pub fn coverage(&self) -> &CoverageMatcher {
        &self.coverage
    }

    pub fn cache_fs(&self) -> &Arc<CacheFs> {
        &self.cache_fs
    }

    /// Whether `filename` is a candidate for user transformers at all.
    pub fn should_transform(&self, filename: &Path) -> bool {
        if self.patterns.is_empty() {
            return false;
        }
        match &self.ignore_pattern {
            Some(ignore) => !ignore.is_match(&filename.to_string_lossy()),
            None => true,
        }
    }

    pub(crate) fn cached_result(&self, script_key: &str) -> Option<Arc<TransformResult>> {
        self.transformed_files.read().get(script_key).cloned()
    }

    /// Stores `result` unless another caller got there first; either way the
    /// stored result is returned.
    pub(crate) fn store_result(&self, script_key: String, result: TransformResult) -> Arc<TransformResult> {
        self.transformed_files
            .write()
            .entry(script_key)
            .or_insert_with(|| Arc::new(result))
            .clone()
    }

    pub fn cached_result_count(&self) -> usize {
        self.transformed_files.read().len()
    }
}

/// Project caches keyed by configuration fingerprint.
///
/// Tests build their own registry; hosts usually share [`ProjectCacheRegistry::global`].
#[derive(Default)]
pub struct ProjectCacheRegistry {
    projects: Mutex<HashMap<String, Arc<ProjectCache>>>,
}

impl fmt::Debug for ProjectCacheRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectCacheRegistry")
            .field("projects", &self.projects.lock().len())
            .finish()
    }
}

impl ProjectCacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry.
    pub fn global() -> &'static ProjectCacheRegistry {
        static GLOBAL: OnceLock<ProjectCacheRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ProjectCacheRegistry::new)
    }

    /// Returns the cache for `config`, creating it on first use.
    ///
    /// `cache_fs` seeds the content cache of a newly created project and is
    /// ignored when the project already exists.
    pub fn get_or_create(
        &self,
        config: &ProjectConfig,
        cache_fs: Option<Arc<CacheFs>>,
    ) -> Result<Arc<ProjectCache>> {
        let fingerprint = config.fingerprint();
        let mut projects = self.projects.lock();
        if let Some(existing) = projects.get(&fingerprint) {
            return Ok(Arc::clone(existing));
        }

        let cache = Arc::new(ProjectCache::new(config, cache_fs.unwrap_or_default())?);
        tracing::debug!(
            target = "kiln.transform",
            project = %config.id,
            patterns = cache.patterns.len(),
            "created project cache"
        );
        projects.insert(fingerprint, Arc::clone(&cache));
        Ok(cache)
    }

    pub fn len(&self) -> usize {
        self.projects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.lock().is_empty()
    }
}
