//! The transform pipeline: resolves transformers, consults the caches,
//! applies coverage instrumentation and persists the results.

use crate::cache_fs::CacheFs;
use crate::error::{BoxError, Result, TransformError};
use crate::instrument::{BootstrapInstrumenter, InstrumentRequest, Instrumenter};
use crate::mode::{Blocking, ExecMode, Suspending};
use crate::project_cache::{ProjectCache, ProjectCacheRegistry};
use crate::source_map::SourceMap;
use crate::transformer::{
    SourceMapInput, TransformOptions, TransformedSource, Transformer, TransformerModule,
    TransformerProvider,
};
use futures::executor::block_on;
use kiln_cache::{CacheKey, DiskCache};
use kiln_config::{CoverageProvider, ProjectConfig, RunOptions};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Final output for one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransformResult {
    pub code: String,
    /// Source the code was produced from, after shebang stripping.
    pub original_code: String,
    /// Map file describing `code`; `None` when no trustworthy map exists.
    pub source_map_path: Option<PathBuf>,
}

/// A loaded transformer together with the `transform` entry that selected it.
#[derive(Debug)]
pub struct TransformerBinding {
    pattern: String,
    module: String,
    transformer: Transformer,
    transformer_config: serde_json::Value,
}

impl TransformerBinding {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn transformer(&self) -> &Transformer {
        &self.transformer
    }

    pub fn transformer_config(&self) -> &serde_json::Value {
        &self.transformer_config
    }
}

type BindingKey = (String, String);

/// Transforms files of one project for execution.
///
/// [`ScriptTransformer::load_transformers`] must complete before any other
/// operation; until then every transform fails with
/// [`TransformError::NotLoaded`].
pub struct ScriptTransformer {
    config: Arc<ProjectConfig>,
    cache: Arc<ProjectCache>,
    cache_fs: Arc<CacheFs>,
    disk: DiskCache,
    provider: Arc<dyn TransformerProvider>,
    instrumenter: Arc<dyn Instrumenter>,
    bindings: RwLock<HashMap<BindingKey, Arc<TransformerBinding>>>,
    loaded: AtomicBool,
}

impl fmt::Debug for ScriptTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptTransformer")
            .field("project", &self.config.id)
            .field("cache_root", &self.disk.root())
            .field("bindings", &self.bindings.read().keys().collect::<Vec<_>>())
            .field("loaded", &self.loaded.load(Ordering::Acquire))
            .finish()
    }
}

impl ScriptTransformer {
    pub fn new(
        config: impl Into<Arc<ProjectConfig>>,
        registry: &ProjectCacheRegistry,
        provider: Arc<dyn TransformerProvider>,
    ) -> Result<Self> {
        Self::build(config.into(), registry, provider, None)
    }

    /// Like [`ScriptTransformer::new`], seeding the project's content cache
    /// with `cache_fs` if this is the first orchestrator for the project.
    pub fn with_cache_fs(
        config: impl Into<Arc<ProjectConfig>>,
        registry: &ProjectCacheRegistry,
        provider: Arc<dyn TransformerProvider>,
        cache_fs: Arc<CacheFs>,
    ) -> Result<Self> {
        Self::build(config.into(), registry, provider, Some(cache_fs))
    }

    fn build(
        config: Arc<ProjectConfig>,
        registry: &ProjectCacheRegistry,
        provider: Arc<dyn TransformerProvider>,
        cache_fs: Option<Arc<CacheFs>>,
    ) -> Result<Self> {
        let cache = registry.get_or_create(&config, cache_fs)?;
        let disk = DiskCache::new(&config.cache_directory, &config.id).with_reads_enabled(config.cache);
        Ok(Self {
            cache_fs: Arc::clone(cache.cache_fs()),
            cache,
            disk,
            provider,
            instrumenter: Arc::new(BootstrapInstrumenter::new()),
            bindings: RwLock::new(HashMap::new()),
            loaded: AtomicBool::new(false),
            config,
        })
    }

    /// Replaces the built-in coverage instrumenter.
    pub fn with_instrumenter(mut self, instrumenter: Arc<dyn Instrumenter>) -> Self {
        self.instrumenter = instrumenter;
        self
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn project_cache(&self) -> &Arc<ProjectCache> {
        &self.cache
    }

    pub fn cache_fs(&self) -> &Arc<CacheFs> {
        &self.cache_fs
    }

    pub fn disk_cache(&self) -> &DiskCache {
        &self.disk
    }

    /// Resolves every configured transformer.
    ///
    /// Factories are invoked with their entry's options. A module that ends
    /// up without any `process` hook is rejected here rather than on first
    /// use.
    pub async fn load_transformers(&self) -> Result<()> {
        for entry in self.cache.patterns().iter() {
            let key: BindingKey = (entry.pattern().to_owned(), entry.module().to_owned());
            let already_loaded = self.bindings.read().contains_key(&key);
            if already_loaded {
                continue;
            }

            let load_error = |err: BoxError| TransformError::Load {
                module: entry.module().to_owned(),
                message: err.to_string(),
            };
            let transformer = match self.provider.load(entry.module()).await.map_err(load_error)? {
                TransformerModule::Transformer(transformer) => transformer,
                TransformerModule::Factory(factory) => factory
                    .create_transformer(entry.options())
                    .await
                    .map_err(load_error)?,
            };
            if !transformer.has_process() {
                return Err(TransformError::MissingProcess {
                    module: entry.module().to_owned(),
                });
            }

            tracing::debug!(
                target = "kiln.transform",
                pattern = entry.pattern(),
                module = entry.module(),
                can_instrument = transformer.can_instrument(),
                "resolved transformer"
            );
            let binding = TransformerBinding {
                pattern: key.0.clone(),
                module: key.1.clone(),
                transformer,
                transformer_config: entry.options().clone(),
            };
            self.bindings
                .write()
                .entry(key)
                .or_insert_with(|| Arc::new(binding));
        }

        self.loaded.store(true, Ordering::Release);
        Ok(())
    }

    /// Number of resolved transformer bindings.
    pub fn transformer_count(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn should_transform(&self, filename: &Path) -> bool {
        self.cache.should_transform(filename)
    }

    /// Binding of the first `transform` entry matching `filename`.
    pub fn transformer_for(&self, filename: &Path) -> Result<Option<Arc<TransformerBinding>>> {
        self.ensure_loaded()?;
        let Some(entry) = self.cache.patterns().find(filename) else {
            return Ok(None);
        };
        let key: BindingKey = (entry.pattern().to_owned(), entry.module().to_owned());
        let binding = self.bindings.read().get(&key).cloned();
        binding.map(Some).ok_or_else(|| TransformError::MissingBinding {
            filename: filename.to_path_buf(),
        })
    }

    pub fn cache_key(
        &self,
        content: &str,
        filename: &Path,
        instrument: bool,
        run: &RunOptions,
    ) -> Result<CacheKey> {
        let binding = self.transformer_for(filename)?;
        block_on(self.cache_key_with(&Blocking, binding.as_deref(), content, filename, instrument, run))
    }

    pub async fn cache_key_async(
        &self,
        content: &str,
        filename: &Path,
        instrument: bool,
        run: &RunOptions,
    ) -> Result<CacheKey> {
        let binding = self.transformer_for(filename)?;
        self.cache_key_with(&Suspending, binding.as_deref(), content, filename, instrument, run)
            .await
    }

    /// Transforms `content` as the source of `filepath`, bypassing the
    /// in-memory result cache.
    pub fn transform_source(
        &self,
        filepath: &Path,
        content: &str,
        run: &RunOptions,
        instrument: bool,
    ) -> Result<TransformResult> {
        block_on(self.transform_source_with(&Blocking, filepath, content, run, instrument))
    }

    pub async fn transform_source_async(
        &self,
        filepath: &Path,
        content: &str,
        run: &RunOptions,
        instrument: bool,
    ) -> Result<TransformResult> {
        self.transform_source_with(&Suspending, filepath, content, run, instrument)
            .await
    }

    /// Transforms `filename` for execution.
    ///
    /// `file_source` overrides the file's content; otherwise it comes from
    /// the content cache or disk. Results are memoized per file, modification
    /// time and instrumentation flag.
    pub fn transform(
        &self,
        filename: &Path,
        run: &RunOptions,
        file_source: Option<&str>,
    ) -> Result<Arc<TransformResult>> {
        block_on(self.transform_with(&Blocking, filename, run, file_source))
    }

    pub async fn transform_async(
        &self,
        filename: &Path,
        run: &RunOptions,
        file_source: Option<&str>,
    ) -> Result<Arc<TransformResult>> {
        self.transform_with(&Suspending, filename, run, file_source)
            .await
    }

    /// Transforms a JSON module. Never instrumented.
    pub fn transform_json(&self, filename: &Path, run: &RunOptions, file_source: &str) -> Result<String> {
        self.ensure_loaded()?;
        if run.is_internal_module || !self.should_transform(filename) {
            return Ok(file_source.to_owned());
        }
        Ok(self.transform_source(filename, file_source, run, false)?.code)
    }

    /// Transforms a configuration module (setup file, resolver, reporter)
    /// with instrumentation off and hands the result to `evaluate`.
    pub fn require_and_transpile_module<T>(
        &self,
        module_path: &Path,
        run: &RunOptions,
        evaluate: impl FnOnce(TransformResult) -> std::result::Result<T, BoxError>,
    ) -> Result<T> {
        let result = block_on(self.transform_and_build_script(&Blocking, module_path, run, false, None))?;
        evaluate(result).map_err(|source| TransformError::Evaluate {
            filename: module_path.to_path_buf(),
            source,
        })
    }

    pub async fn require_and_transpile_module_async<T, F, Fut>(
        &self,
        module_path: &Path,
        run: &RunOptions,
        evaluate: F,
    ) -> Result<T>
    where
        F: FnOnce(TransformResult) -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        let result = self
            .transform_and_build_script(&Suspending, module_path, run, false, None)
            .await?;
        evaluate(result).await.map_err(|source| TransformError::Evaluate {
            filename: module_path.to_path_buf(),
            source,
        })
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.loaded.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(TransformError::NotLoaded)
        }
    }

    fn transform_options<'a>(
        &'a self,
        binding: &'a TransformerBinding,
        instrument: bool,
        run: &'a RunOptions,
    ) -> TransformOptions<'a> {
        TransformOptions {
            config: &self.config,
            config_string: self.cache.config_string(),
            transformer_config: &binding.transformer_config,
            instrument,
            cache_fs: &self.cache_fs,
            run,
        }
    }

    async fn cache_key_with<M: ExecMode>(
        &self,
        mode: &M,
        binding: Option<&TransformerBinding>,
        content: &str,
        filename: &Path,
        instrument: bool,
        run: &RunOptions,
    ) -> Result<CacheKey> {
        if let Some(binding) = binding {
            let options = self.transform_options(binding, instrument, run);
            if let Some(key) = mode
                .cache_key(&binding.transformer, content, filename, &options)
                .await
            {
                return Ok(CacheKey::from_transformer_key(&key));
            }
        }
        Ok(CacheKey::from_inputs(
            content,
            self.cache.config_string(),
            instrument,
            filename,
        ))
    }

    async fn transform_source_with<M: ExecMode>(
        &self,
        mode: &M,
        filepath: &Path,
        content: &str,
        run: &RunOptions,
        instrument: bool,
    ) -> Result<TransformResult> {
        self.ensure_loaded()?;
        let filename = std::fs::canonicalize(filepath).unwrap_or_else(|_| filepath.to_path_buf());
        let binding = self.transformer_for(&filename)?;

        let key = self
            .cache_key_with(mode, binding.as_deref(), content, &filename, instrument, run)
            .await?;
        let paths = self.disk.entry_paths(&filename, &key);

        if let Some(code) = self.disk.read_code(&paths.code)? {
            let source_map_path = paths.map.is_file().then(|| paths.map.clone());
            return Ok(TransformResult {
                code,
                original_code: content.to_owned(),
                source_map_path,
            });
        }

        let called = match &binding {
            Some(binding) if self.should_transform(&filename) => Some(binding),
            _ => None,
        };
        let transformed = match called {
            Some(binding) => {
                let options = self.transform_options(binding, instrument, run);
                mode.process(&binding.transformer, &binding.module, content, &filename, &options)
                    .await?
            }
            None => TransformedSource::new(content),
        };
        let producer = called.map(|binding| binding.module.as_str());

        let TransformedSource { mut code, mut map } = transformed;
        if map.is_none() {
            match SourceMap::from_inline_comment(&code) {
                Ok(inline) => map = inline.map(SourceMapInput::Raw),
                Err(err) => warn_invalid_source_map(&filename, producer, &err),
            }
        }

        let transform_will_instrument =
            called.is_some_and(|binding| binding.transformer.can_instrument());
        if instrument && !transform_will_instrument {
            let input_map = match map.as_ref().map(SourceMapInput::to_source_map) {
                Some(Ok(parsed)) => Some(parsed),
                Some(Err(err)) => {
                    warn_invalid_source_map(&filename, producer, &err);
                    None
                }
                None => None,
            };
            // Only claim a mapping to the original file when the transformer
            // left the code untouched or described its changes.
            let emit_source_map = called.is_none() || input_map.is_some() || code == content;
            let instrumented = self
                .instrumenter
                .instrument(InstrumentRequest {
                    filename: &filename,
                    root_dir: &self.config.root_dir,
                    code: &code,
                    input_map: input_map.as_ref(),
                    emit_source_map,
                    run,
                })
                .map_err(|source| TransformError::Instrument {
                    filename: filename.clone(),
                    source,
                })?;
            code = instrumented.code;
            map = instrumented.map.map(SourceMapInput::Raw);
        }

        let source_map_path = match &map {
            Some(map) => {
                self.disk.write_map(&paths.map, &map.to_json_string()?)?;
                Some(paths.map.clone())
            }
            None => None,
        };
        self.disk.write_code(&paths.code, &code)?;

        Ok(TransformResult {
            code,
            original_code: content.to_owned(),
            source_map_path,
        })
    }

    async fn transform_and_build_script<M: ExecMode>(
        &self,
        mode: &M,
        filename: &Path,
        run: &RunOptions,
        instrument: bool,
        file_source: Option<&str>,
    ) -> Result<TransformResult> {
        self.ensure_loaded()?;
        let file_content: Arc<str> = match file_source {
            Some(source) => Arc::from(source),
            None => match self.cache_fs.get(filename) {
                Some(cached) => cached,
                None => {
                    let text = std::fs::read_to_string(filename).map_err(|source| TransformError::Io {
                        path: filename.to_path_buf(),
                        source,
                    })?;
                    self.cache_fs.insert(filename, text)
                }
            },
        };
        let content = strip_shebang(&file_content);

        let will_transform = !run.is_internal_module && (instrument || self.should_transform(filename));
        if !will_transform {
            return Ok(TransformResult {
                code: content.to_owned(),
                original_code: content.to_owned(),
                source_map_path: None,
            });
        }

        self.transform_source_with(mode, filename, content, run, instrument)
            .await
    }

    async fn transform_with<M: ExecMode>(
        &self,
        mode: &M,
        filename: &Path,
        run: &RunOptions,
        file_source: Option<&str>,
    ) -> Result<Arc<TransformResult>> {
        self.ensure_loaded()?;
        let instrument = run.coverage_provider == CoverageProvider::Internal
            && self.cache.coverage().should_instrument(filename, run, None)?;

        let script_key = script_cache_key(filename, instrument);
        if let Some(hit) = script_key.as_deref().and_then(|key| self.cache.cached_result(key)) {
            return Ok(hit);
        }

        let result = self
            .transform_and_build_script(mode, filename, run, instrument, file_source)
            .await?;
        Ok(match script_key {
            Some(key) => self.cache.store_result(key, result),
            None => Arc::new(result),
        })
    }
}

/// Builds an orchestrator and loads its transformers.
pub async fn create_script_transformer(
    config: impl Into<Arc<ProjectConfig>>,
    registry: &ProjectCacheRegistry,
    provider: Arc<dyn TransformerProvider>,
) -> Result<ScriptTransformer> {
    let transformer = ScriptTransformer::new(config, registry, provider)?;
    transformer.load_transformers().await?;
    Ok(transformer)
}

/// `None` when the file cannot be stat'ed, which disables memoization for
/// that call.
fn script_cache_key(filename: &Path, instrument: bool) -> Option<String> {
    let modified = match std::fs::metadata(filename).and_then(|meta| meta.modified()) {
        Ok(modified) => modified,
        Err(err) => {
            tracing::debug!(
                target = "kiln.transform",
                path = %filename.display(),
                error = %err,
                "cannot stat file; skipping in-memory result cache"
            );
            return None;
        }
    };
    let mtime = modified
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_nanos())
        .unwrap_or_default();
    let suffix = if instrument { "_instrumented" } else { "" };
    Some(format!("{}_{mtime}{suffix}", filename.display()))
}

/// Blanks a leading `#!` line, keeping its line break so line numbers hold.
fn strip_shebang(content: &str) -> &str {
    if !content.starts_with("#!") {
        return content;
    }
    let end = content.find(['\n', '\r']).unwrap_or(content.len());
    &content[end..]
}

fn warn_invalid_source_map(filename: &Path, producer: Option<&str>, error: &dyn fmt::Display) {
    let producer = producer.unwrap_or("an inline sourceMappingURL comment");
    // Fall back to stderr for hosts that never install a subscriber.
    if tracing::enabled!(tracing::Level::WARN) {
        tracing::warn!(
            target: "kiln.transform",
            path = %filename.display(),
            producer,
            error = %error,
            "invalid source map; proceeding without source mapping for this file"
        );
    } else {
        eprintln!(
            "The source map produced for the file {} by {producer} was invalid. Proceeding \
             without source mapping for that file.",
            filename.display()
        );
    }
}
