use std::path::PathBuf;

/// Error type transformer plugins report failures with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, TransformError>;

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error(
        "transformers have not been loaded yet; call `load_transformers` and wait for it to \
         complete before transforming files"
    )]
    NotLoaded,

    #[error("failed to load transformer `{module}`: {message}")]
    Load { module: String, message: String },

    #[error(
        "transformer `{module}` is invalid: it must provide `process` or `process_async`"
    )]
    MissingProcess { module: String },

    #[error("synchronous transformer `{module}` must provide `process`")]
    SyncProcessUnavailable { module: String },

    #[error(
        "invalid return value from transformer `{module}`: `process` and `process_async` must \
         produce an object with a `code` string"
    )]
    InvalidReturnValue { module: String },

    #[error("transformer `{module}` failed on {}: {source}", filename.display())]
    Process {
        module: String,
        filename: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("{message}")]
    SyntaxError { filename: PathBuf, message: String },

    #[error("no transformer was resolved for {}, although one is configured", filename.display())]
    MissingBinding { filename: PathBuf },

    #[error(transparent)]
    Cache(#[from] kiln_cache::CacheError),

    #[error(transparent)]
    Coverage(#[from] kiln_coverage::CoverageError),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid transform pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to serialize source map: {0}")]
    SourceMap(#[from] serde_json::Error),

    #[error("instrumenting {} failed: {source}", filename.display())]
    Instrument {
        filename: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("evaluating {} failed: {source}", filename.display())]
    Evaluate {
        filename: PathBuf,
        #[source]
        source: BoxError,
    },
}
