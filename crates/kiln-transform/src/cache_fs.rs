use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source text of files already read during this process, keyed by path.
///
/// Shared by every [`crate::ScriptTransformer`] of a project and handed to
/// transformers. Append-only: an entry, once present, is never replaced, so
/// concurrent readers always agree on a file's content.
#[derive(Debug, Default)]
pub struct CacheFs {
    files: RwLock<HashMap<PathBuf, Arc<str>>>,
}

impl CacheFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<Arc<str>> {
        self.files.read().get(path).cloned()
    }

    /// Records `content` for `path` unless an entry already exists, and
    /// returns the entry that is stored afterwards.
    pub fn insert(&self, path: impl Into<PathBuf>, content: impl Into<Arc<str>>) -> Arc<str> {
        self.files
            .write()
            .entry(path.into())
            .or_insert_with(|| content.into())
            .clone()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl<P: Into<PathBuf>, C: Into<Arc<str>>> FromIterator<(P, C)> for CacheFs {
    fn from_iter<I: IntoIterator<Item = (P, C)>>(iter: I) -> Self {
        let files = iter
            .into_iter()
            .map(|(path, content)| (path.into(), content.into()))
            .collect();
        Self {
            files: RwLock::new(files),
        }
    }
}
