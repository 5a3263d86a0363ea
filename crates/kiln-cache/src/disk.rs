use crate::error::{CacheError, Result};
use crate::key::{digest, CacheKey, DIGEST_LEN};
use crate::util::{atomic_write, read_cache_file, remove_file_best_effort};
use std::path::{Path, PathBuf};

/// Code and source map locations of one cache entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheEntryPaths {
    pub code: PathBuf,
    pub map: PathBuf,
}

/// Per-project transform cache rooted at
/// `<cache_directory>/jest-transform-cache-<project id>-<version>`.
///
/// Entries are sharded by the first two characters of their key:
/// `<root>/<shard>/<file stem>_<key>` for code, plus a `.map` sibling.
#[derive(Clone, Debug)]
pub struct DiskCache {
    root: PathBuf,
    reads_enabled: bool,
}

impl DiskCache {
    pub fn new(cache_directory: &Path, project_id: &str) -> Self {
        let dir_name = format!(
            "jest-transform-cache-{}-{}",
            kiln_core::sanitize_cache_segment(project_id),
            kiln_core::KILN_VERSION
        );
        Self::at(cache_directory.join(dir_name))
    }

    /// Cache rooted directly at `root`.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            reads_enabled: true,
        }
    }

    /// With reads disabled every lookup is a miss; writes still happen so a
    /// later run with reads enabled starts warm.
    pub fn with_reads_enabled(mut self, enabled: bool) -> Self {
        self.reads_enabled = enabled;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn reads_enabled(&self) -> bool {
        self.reads_enabled
    }

    pub fn entry_paths(&self, filename: &Path, key: &CacheKey) -> CacheEntryPaths {
        let stem = kiln_core::sanitize_file_stem(filename);
        let code = self
            .root
            .join(key.shard())
            .join(format!("{stem}_{}", key.as_str()));
        let mut map = code.clone().into_os_string();
        map.push(".map");
        CacheEntryPaths {
            code,
            map: PathBuf::from(map),
        }
    }

    /// Returns the cached code stored at `path`.
    ///
    /// A missing file, a checksum mismatch or undecodable content is a miss;
    /// damaged entries are deleted so the next write replaces them.
    pub fn read_code(&self, path: &Path) -> Result<Option<String>> {
        if !self.reads_enabled {
            return Ok(None);
        }

        let bytes = match read_cache_file(path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!(target = "kiln.cache", path = %path.display(), "cache miss");
                return Ok(None);
            }
            Err(source) => {
                remove_file_best_effort(path, "read_code.read_failed");
                return Err(CacheError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        match decode_code_file(bytes) {
            Some(code) => Ok(Some(code)),
            None => {
                tracing::debug!(
                    target = "kiln.cache",
                    path = %path.display(),
                    "discarding corrupt cache entry"
                );
                remove_file_best_effort(path, "read_code.corrupt");
                Ok(None)
            }
        }
    }

    /// Persists `code` behind a checksum header.
    pub fn write_code(&self, path: &Path, code: &str) -> Result<()> {
        let checksum = digest([code]);
        let mut contents = String::with_capacity(checksum.len() + 1 + code.len());
        contents.push_str(&checksum);
        contents.push('\n');
        contents.push_str(code);
        write_entry(path, contents.as_bytes())
    }

    /// Persists a serialized source map. Maps carry no checksum.
    pub fn write_map(&self, path: &Path, map: &str) -> Result<()> {
        write_entry(path, map.as_bytes())
    }
}

fn write_entry(path: &Path, bytes: &[u8]) -> Result<()> {
    atomic_write(path, bytes).map_err(|source| {
        tracing::debug!(
            target = "kiln.cache",
            path = %path.display(),
            error = %source,
            "failed to write cache file"
        );
        CacheError::Write {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn decode_code_file(bytes: Vec<u8>) -> Option<String> {
    let content = String::from_utf8(bytes).ok()?;
    let header = content.get(..DIGEST_LEN)?;
    if content.as_bytes().get(DIGEST_LEN) != Some(&b'\n') {
        return None;
    }
    let code = &content[DIGEST_LEN + 1..];
    if digest([code]) != header {
        return None;
    }
    Some(code.to_owned())
}
