//! The contract transformer plugins implement, and how hosts hand them to kiln.

use crate::cache_fs::CacheFs;
use crate::error::BoxError;
use crate::source_map::SourceMap;
use async_trait::async_trait;
use kiln_config::{ProjectConfig, RunOptions};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// A source map as handed back by a transformer.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceMapInput {
    Raw(SourceMap),
    /// Already serialized JSON.
    Serialized(String),
}

impl SourceMapInput {
    pub fn to_source_map(&self) -> Result<SourceMap, serde_json::Error> {
        match self {
            SourceMapInput::Raw(map) => Ok(map.clone()),
            SourceMapInput::Serialized(text) => serde_json::from_str(text),
        }
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        match self {
            SourceMapInput::Raw(map) => serde_json::to_string(map),
            SourceMapInput::Serialized(text) => Ok(text.clone()),
        }
    }
}

impl From<SourceMap> for SourceMapInput {
    fn from(map: SourceMap) -> Self {
        SourceMapInput::Raw(map)
    }
}

/// Output of one transformer `process` call.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformedSource {
    pub code: String,
    pub map: Option<SourceMapInput>,
}

impl TransformedSource {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            map: None,
        }
    }

    pub fn with_map(mut self, map: impl Into<SourceMapInput>) -> Self {
        self.map = Some(map.into());
        self
    }
}

impl From<String> for TransformedSource {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}

/// Returned by [`TransformedSource::try_from`] when a dynamically produced
/// value has no `code` string.
///
/// Transformers bridging untyped plugin output should return this error from
/// `process`; kiln reports it as an invalid return value of the transformer.
#[derive(Debug, thiserror::Error)]
#[error("transform output must be an object with a `code` string")]
pub struct InvalidTransformOutput;

impl TryFrom<serde_json::Value> for TransformedSource {
    type Error = InvalidTransformOutput;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        let serde_json::Value::Object(mut object) = value else {
            return Err(InvalidTransformOutput);
        };
        let Some(serde_json::Value::String(code)) = object.remove("code") else {
            return Err(InvalidTransformOutput);
        };
        let map = match object.remove("map") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(text)) => Some(SourceMapInput::Serialized(text)),
            Some(raw) => Some(SourceMapInput::Raw(
                serde_json::from_value(raw).map_err(|_| InvalidTransformOutput)?,
            )),
        };
        Ok(Self { code, map })
    }
}

/// Everything a transformer sees besides the source text and its path.
#[derive(Clone, Copy, Debug)]
pub struct TransformOptions<'a> {
    pub config: &'a ProjectConfig,
    /// Stable serialization of `config`.
    pub config_string: &'a str,
    /// User options from the matching `transform` entry.
    pub transformer_config: &'a serde_json::Value,
    /// Whether the output is going to be instrumented for coverage.
    pub instrument: bool,
    pub cache_fs: &'a CacheFs,
    /// Coverage options and caller capability flags of this run.
    pub run: &'a RunOptions,
}

/// Blocking half of the transformer contract.
pub trait SyncTransformer: Send + Sync {
    fn process(
        &self,
        source: &str,
        filename: &Path,
        options: &TransformOptions<'_>,
    ) -> Result<TransformedSource, BoxError>;

    /// A key covering every input that influences `process` output. `None`
    /// lets kiln derive one from the source, path and config.
    fn cache_key(&self, _source: &str, _filename: &Path, _options: &TransformOptions<'_>) -> Option<String> {
        None
    }
}

/// Non-blocking half of the transformer contract.
#[async_trait]
pub trait AsyncTransformer: Send + Sync {
    async fn process_async(
        &self,
        source: &str,
        filename: &Path,
        options: &TransformOptions<'_>,
    ) -> Result<TransformedSource, BoxError>;

    async fn cache_key_async(
        &self,
        _source: &str,
        _filename: &Path,
        _options: &TransformOptions<'_>,
    ) -> Option<String> {
        None
    }
}

/// A resolved transformer capability.
///
/// At least one of the blocking or non-blocking halves must be present for
/// the transformer to be usable; [`crate::ScriptTransformer::load_transformers`]
/// rejects empty ones.
#[derive(Clone, Default)]
pub struct Transformer {
    can_instrument: bool,
    sync: Option<Arc<dyn SyncTransformer>>,
    asynchronous: Option<Arc<dyn AsyncTransformer>>,
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("can_instrument", &self.can_instrument)
            .field("sync", &self.sync.is_some())
            .field("async", &self.asynchronous.is_some())
            .finish()
    }
}

impl Transformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sync(transformer: impl SyncTransformer + 'static) -> Self {
        Self::new().with_sync(Arc::new(transformer))
    }

    pub fn from_async(transformer: impl AsyncTransformer + 'static) -> Self {
        Self::new().with_async(Arc::new(transformer))
    }

    pub fn with_sync(mut self, transformer: Arc<dyn SyncTransformer>) -> Self {
        self.sync = Some(transformer);
        self
    }

    pub fn with_async(mut self, transformer: Arc<dyn AsyncTransformer>) -> Self {
        self.asynchronous = Some(transformer);
        self
    }

    /// Marks the transformer as instrumenting its own output, which turns
    /// off kiln's instrumentation for files it processes.
    pub fn with_can_instrument(mut self, can_instrument: bool) -> Self {
        self.can_instrument = can_instrument;
        self
    }

    pub fn can_instrument(&self) -> bool {
        self.can_instrument
    }

    pub fn sync(&self) -> Option<&Arc<dyn SyncTransformer>> {
        self.sync.as_ref()
    }

    pub fn asynchronous(&self) -> Option<&Arc<dyn AsyncTransformer>> {
        self.asynchronous.as_ref()
    }

    pub fn has_process(&self) -> bool {
        self.sync.is_some() || self.asynchronous.is_some()
    }
}

/// Builds a configured [`Transformer`] from the user options of a
/// `transform` entry.
#[async_trait]
pub trait TransformerFactory: Send + Sync {
    async fn create_transformer(&self, options: &serde_json::Value) -> Result<Transformer, BoxError>;
}

/// What a provider resolves a module name to.
#[derive(Clone)]
pub enum TransformerModule {
    Transformer(Transformer),
    Factory(Arc<dyn TransformerFactory>),
}

impl fmt::Debug for TransformerModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformerModule::Transformer(transformer) => {
                f.debug_tuple("Transformer").field(transformer).finish()
            }
            TransformerModule::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

impl From<Transformer> for TransformerModule {
    fn from(transformer: Transformer) -> Self {
        TransformerModule::Transformer(transformer)
    }
}

/// Host hook that turns the module name of a `transform` entry into a
/// transformer. kiln never loads code by itself.
#[async_trait]
pub trait TransformerProvider: Send + Sync {
    async fn load(&self, module: &str) -> Result<TransformerModule, BoxError>;
}

#[derive(Debug, thiserror::Error)]
#[error("no transformer registered under `{0}`")]
pub struct UnknownTransformer(pub String);

/// In-memory provider keyed by module name.
#[derive(Clone, Default)]
pub struct StaticTransformerProvider {
    modules: BTreeMap<String, TransformerModule>,
}

impl fmt::Debug for StaticTransformerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTransformerProvider")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StaticTransformerProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: impl Into<String>, entry: impl Into<TransformerModule>) -> &mut Self {
        self.modules.insert(module.into(), entry.into());
        self
    }

    pub fn register_factory(
        &mut self,
        module: impl Into<String>,
        factory: Arc<dyn TransformerFactory>,
    ) -> &mut Self {
        self.modules
            .insert(module.into(), TransformerModule::Factory(factory));
        self
    }

    pub fn with(mut self, module: impl Into<String>, entry: impl Into<TransformerModule>) -> Self {
        self.register(module, entry);
        self
    }

    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }
}

#[async_trait]
impl TransformerProvider for StaticTransformerProvider {
    async fn load(&self, module: &str) -> Result<TransformerModule, BoxError> {
        self.modules
            .get(module)
            .cloned()
            .ok_or_else(|| Box::new(UnknownTransformer(module.to_owned())) as BoxError)
    }
}
