//! Blocking and suspending execution of transformer hooks.
//!
//! The orchestrator runs one pipeline for both public call styles; only the
//! way transformer hooks are invoked differs, and that lives here.

use crate::error::{BoxError, TransformError};
use crate::syntax_error::{enhance_unexpected_token_message, TransformerSyntaxError};
use crate::transformer::{InvalidTransformOutput, TransformOptions, TransformedSource, Transformer};
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub(crate) trait ExecMode: Send + Sync {
    async fn cache_key(
        &self,
        transformer: &Transformer,
        source: &str,
        filename: &Path,
        options: &TransformOptions<'_>,
    ) -> Option<String>;

    async fn process(
        &self,
        transformer: &Transformer,
        module: &str,
        source: &str,
        filename: &Path,
        options: &TransformOptions<'_>,
    ) -> Result<TransformedSource, TransformError>;
}

/// Only synchronous hooks; never suspends.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Blocking;

/// Prefers asynchronous hooks and falls back to synchronous ones.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Suspending;

#[async_trait]
impl ExecMode for Blocking {
    async fn cache_key(
        &self,
        transformer: &Transformer,
        source: &str,
        filename: &Path,
        options: &TransformOptions<'_>,
    ) -> Option<String> {
        transformer
            .sync()
            .and_then(|sync| sync.cache_key(source, filename, options))
    }

    async fn process(
        &self,
        transformer: &Transformer,
        module: &str,
        source: &str,
        filename: &Path,
        options: &TransformOptions<'_>,
    ) -> Result<TransformedSource, TransformError> {
        let Some(sync) = transformer.sync() else {
            return Err(TransformError::SyncProcessUnavailable {
                module: module.to_owned(),
            });
        };
        sync.process(source, filename, options)
            .map_err(|err| classify_process_error(module, filename, err))
    }
}

#[async_trait]
impl ExecMode for Suspending {
    async fn cache_key(
        &self,
        transformer: &Transformer,
        source: &str,
        filename: &Path,
        options: &TransformOptions<'_>,
    ) -> Option<String> {
        if let Some(asynchronous) = transformer.asynchronous() {
            if let Some(key) = asynchronous.cache_key_async(source, filename, options).await {
                return Some(key);
            }
        }
        transformer
            .sync()
            .and_then(|sync| sync.cache_key(source, filename, options))
    }

    async fn process(
        &self,
        transformer: &Transformer,
        module: &str,
        source: &str,
        filename: &Path,
        options: &TransformOptions<'_>,
    ) -> Result<TransformedSource, TransformError> {
        let result = match (transformer.asynchronous(), transformer.sync()) {
            (Some(asynchronous), _) => asynchronous.process_async(source, filename, options).await,
            (None, Some(sync)) => sync.process(source, filename, options),
            (None, None) => {
                return Err(TransformError::MissingProcess {
                    module: module.to_owned(),
                })
            }
        };
        result.map_err(|err| classify_process_error(module, filename, err))
    }
}

/// Attributes a transformer failure to `module` and `filename`, turning
/// unexpected-token syntax errors into a guided message.
pub(crate) fn classify_process_error(module: &str, filename: &Path, err: BoxError) -> TransformError {
    if let Some(syntax) = err.downcast_ref::<TransformerSyntaxError>() {
        if syntax.is_unexpected_token() {
            return TransformError::SyntaxError {
                filename: filename.to_path_buf(),
                message: enhance_unexpected_token_message(filename, syntax),
            };
        }
    }
    if err.is::<InvalidTransformOutput>() {
        return TransformError::InvalidReturnValue {
            module: module.to_owned(),
        };
    }
    TransformError::Process {
        module: module.to_owned(),
        filename: filename.to_path_buf(),
        source: err,
    }
}
