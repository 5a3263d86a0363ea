#![allow(dead_code)]

use async_trait::async_trait;
use kiln_transform::{
    create_script_transformer, AsyncTransformer, BoxError, ProjectCacheRegistry, ProjectConfig,
    ScriptTransformer, StaticTransformerProvider, SyncTransformer, TransformOptions,
    TransformPattern, TransformedSource, Transformer, TransformerFactory,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// A project root and cache directory inside a temporary directory.
pub struct Fixture {
    _dir: TempDir,
    pub root: PathBuf,
    pub cache_directory: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let base = std::fs::canonicalize(dir.path()).expect("canonicalize temp dir");
        let root = base.join("project");
        std::fs::create_dir_all(root.join("src")).expect("create src dir");
        Self {
            _dir: dir,
            cache_directory: base.join("cache"),
            root,
        }
    }

    pub fn config(&self, transform: Vec<TransformPattern>) -> ProjectConfig {
        ProjectConfig {
            id: "fixture".to_owned(),
            root_dir: self.root.clone(),
            cache_directory: self.cache_directory.clone(),
            transform,
            ..ProjectConfig::default()
        }
    }

    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dir");
        }
        std::fs::write(&path, content).expect("write fixture file");
        path
    }
}

pub fn pattern(pattern: &str, module: &str) -> TransformPattern {
    TransformPattern::new(pattern, module, Value::Null)
}

pub fn loaded(config: ProjectConfig, provider: StaticTransformerProvider) -> ScriptTransformer {
    futures::executor::block_on(create_script_transformer(
        config,
        &ProjectCacheRegistry::new(),
        Arc::new(provider),
    ))
    .expect("load transformers")
}

/// Returns its input unchanged, without a map.
#[derive(Default)]
pub struct Identity {
    pub calls: AtomicUsize,
}

impl Identity {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SyncTransformer for Identity {
    fn process(
        &self,
        source: &str,
        _filename: &Path,
        _options: &TransformOptions<'_>,
    ) -> Result<TransformedSource, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TransformedSource::new(source))
    }
}

/// Appends a comment naming itself, without a map.
pub struct Suffix {
    pub tag: String,
    pub calls: AtomicUsize,
}

impl Suffix {
    pub fn new(tag: &str) -> Arc<Self> {
        Arc::new(Self {
            tag: tag.to_owned(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SyncTransformer for Suffix {
    fn process(
        &self,
        source: &str,
        _filename: &Path,
        _options: &TransformOptions<'_>,
    ) -> Result<TransformedSource, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TransformedSource::new(format!("{source}\n// {}", self.tag)))
    }
}

/// Upper-cases its input; asynchronous only.
#[derive(Default)]
pub struct AsyncUpper {
    pub calls: AtomicUsize,
}

#[async_trait]
impl AsyncTransformer for AsyncUpper {
    async fn process_async(
        &self,
        source: &str,
        _filename: &Path,
        _options: &TransformOptions<'_>,
    ) -> Result<TransformedSource, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TransformedSource::new(source.to_uppercase()))
    }
}

/// Echoes what it was configured with and the options it was called with.
pub struct Tagged {
    tag: String,
}

impl SyncTransformer for Tagged {
    fn process(
        &self,
        source: &str,
        _filename: &Path,
        options: &TransformOptions<'_>,
    ) -> Result<TransformedSource, BoxError> {
        Ok(TransformedSource::new(format!(
            "{source}\n// tag={} config={} instrument={}",
            self.tag, options.transformer_config, options.instrument
        )))
    }
}

/// Builds a [`Tagged`] transformer from `{"tag": ...}` options.
pub struct TaggedFactory;

#[async_trait]
impl TransformerFactory for TaggedFactory {
    async fn create_transformer(&self, options: &Value) -> Result<Transformer, BoxError> {
        let tag = options
            .get("tag")
            .and_then(Value::as_str)
            .ok_or("missing `tag` option")?;
        Ok(Transformer::from_sync(Tagged {
            tag: tag.to_owned(),
        }))
    }
}

pub struct Func<F>(F);

impl<F> SyncTransformer for Func<F>
where
    F: Fn(&str) -> Result<TransformedSource, BoxError> + Send + Sync,
{
    fn process(
        &self,
        source: &str,
        _filename: &Path,
        _options: &TransformOptions<'_>,
    ) -> Result<TransformedSource, BoxError> {
        (self.0)(source)
    }
}

/// Transformer backed by a closure.
pub fn func(
    f: impl Fn(&str) -> Result<TransformedSource, BoxError> + Send + Sync + 'static,
) -> Transformer {
    Transformer::from_sync(Func(f))
}
