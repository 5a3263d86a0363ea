//! Pluggable source transformation with content-addressed caching and
//! coverage instrumentation.
//!
//! Hosts register transformers through a [`TransformerProvider`], build a
//! [`ScriptTransformer`] per project and ask it for the code to execute:
//!
//! ```no_run
//! # async fn run() -> Result<(), kiln_transform::TransformError> {
//! use kiln_config::{ProjectConfig, RunOptions};
//! use kiln_transform::{create_script_transformer, ProjectCacheRegistry, StaticTransformerProvider};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let provider = Arc::new(StaticTransformerProvider::new());
//! let transformer =
//!     create_script_transformer(ProjectConfig::default(), ProjectCacheRegistry::global(), provider)
//!         .await?;
//! let result = transformer
//!     .transform_async(Path::new("/project/src/index.js"), &RunOptions::default(), None)
//!     .await?;
//! println!("{}", result.code);
//! # Ok(())
//! # }
//! ```

mod cache_fs;
mod error;
mod instrument;
mod mode;
mod pattern;
mod project_cache;
mod script_transformer;
pub mod source_map;
mod syntax_error;
mod transformer;

pub use cache_fs::CacheFs;
pub use error::{BoxError, Result, TransformError};
pub use instrument::{BootstrapInstrumenter, InstrumentRequest, Instrumented, Instrumenter, COVERAGE_VARIABLE};
pub use pattern::PatternMatcher;
pub use project_cache::{ProjectCache, ProjectCacheRegistry};
pub use script_transformer::{create_script_transformer, ScriptTransformer, TransformResult, TransformerBinding};
pub use source_map::{SourceMap, SourceMapError};
pub use syntax_error::TransformerSyntaxError;
pub use transformer::{
    AsyncTransformer, InvalidTransformOutput, SourceMapInput, StaticTransformerProvider, SyncTransformer,
    TransformOptions, TransformedSource, Transformer, TransformerFactory, TransformerModule,
    TransformerProvider, UnknownTransformer,
};

pub use kiln_cache::CacheKey;
pub use kiln_config::{CoverageProvider, ProjectConfig, RunOptions, TransformPattern};
