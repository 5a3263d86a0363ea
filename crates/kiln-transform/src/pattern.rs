use crate::error::{Result, TransformError};
use kiln_config::TransformPattern;
use regex::Regex;
use std::path::Path;

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| TransformError::InvalidPattern {
        pattern: pattern.to_owned(),
        source,
    })
}

/// The `transform` entries of a project, compiled once.
///
/// Patterns are unanchored: a pattern matches when it occurs anywhere in
/// the path.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    entries: Vec<(Regex, TransformPattern)>,
}

impl PatternMatcher {
    pub fn new(patterns: &[TransformPattern]) -> Result<Self> {
        let entries = patterns
            .iter()
            .map(|entry| Ok((compile(entry.pattern())?, entry.clone())))
            .collect::<Result<_>>()?;
        Ok(Self { entries })
    }

    /// First entry, in declaration order, whose pattern matches `filename`.
    pub fn find(&self, filename: &Path) -> Option<&TransformPattern> {
        let filename = filename.to_string_lossy();
        self.entries
            .iter()
            .find(|(regex, _)| regex.is_match(&filename))
            .map(|(_, entry)| entry)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransformPattern> {
        self.entries.iter().map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Union of the `transform_ignore_patterns`; `None` when there are none.
pub(crate) fn compile_ignore_pattern(patterns: &[String]) -> Result<Option<Regex>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    compile(&patterns.join("|")).map(Some)
}
