#[derive(Debug, thiserror::Error)]
pub enum GlobError {
    #[error("glob {glob:?} uses unsupported syntax `{construct}`")]
    Unsupported { glob: String, construct: &'static str },

    #[error("glob {glob:?} has an unclosed group")]
    Unclosed { glob: String },

    #[error("glob {glob:?} compiled to an invalid regex: {source}")]
    Regex {
        glob: String,
        #[source]
        source: regex::Error,
    },
}

/// Invalid coverage-related patterns in a project configuration.
#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    #[error(transparent)]
    Glob(#[from] GlobError),

    #[error("invalid regular expression {pattern:?}: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
