use std::fmt;
use std::path::Path;

/// A parse failure reported by a transformer.
///
/// Transformers that fail to parse their input should return this type from
/// `process` so kiln can recognise unexpected-token failures and explain the
/// usual causes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransformerSyntaxError {
    pub message: String,
    /// Excerpt of the offending source, if the transformer produced one.
    pub code_frame: Option<String>,
}

impl TransformerSyntaxError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code_frame: None,
        }
    }

    pub fn with_code_frame(mut self, code_frame: impl Into<String>) -> Self {
        self.code_frame = Some(code_frame.into());
        self
    }

    /// Whether this looks like the runtime choking on syntax it cannot parse
    /// (ESM, JSX, type annotations) rather than a plain typo.
    pub fn is_unexpected_token(&self) -> bool {
        (self.message.contains("Unexpected token") || self.message.contains("Cannot use import"))
            && !self.message.contains(" expected")
    }
}

impl fmt::Display for TransformerSyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(frame) = &self.code_frame {
            write!(f, "\n\n{frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TransformerSyntaxError {}

const BOLD: &str = "\u{1b}[1m";
const RESET: &str = "\u{1b}[22m";

pub(crate) fn enhance_unexpected_token_message(filename: &Path, error: &TransformerSyntaxError) -> String {
    let mut message = format!(
        "{BOLD}kiln encountered an unexpected token{RESET}\n\n\
         The file {} contains syntax that the module loader cannot parse. Usually this \
         means the file is not plain JavaScript and no transformer handled it.\n\n\
         By default files matching \"transformIgnorePatterns\" (including everything under \
         node_modules) are left untransformed.\n\n\
         {BOLD}Here's what you can do:{RESET}\n \
         • If the file uses ECMAScript modules, make sure the host loads it with ESM support enabled.\n \
         • If a dependency ships untranspiled code, narrow \"transformIgnorePatterns\" so it is transformed.\n \
         • If the file needs a custom transformation, add a matching entry to \"transform\".\n\n\
         {BOLD}Details:{RESET}\n\n{}",
        filename.display(),
        error.message,
    );
    if let Some(frame) = &error.code_frame {
        message.push_str("\n\n");
        message.push_str(frame);
    }
    message
}
