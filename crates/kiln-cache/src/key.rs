use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Bumped whenever the on-disk entry format changes; every key derived before
/// the bump stops matching.
pub const CACHE_VERSION: &str = "1";

/// Number of hex characters kept from the SHA-256 digest.
pub const DIGEST_LEN: usize = 32;

/// Hex digest of the concatenation of `parts`, truncated to [`DIGEST_LEN`].
pub fn digest<I, B>(parts: I) -> String
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref());
    }
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(DIGEST_LEN);
    hex
}

/// Identifier of one transform output.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key derived from a transformer-supplied cache key.
    ///
    /// The transformer is trusted to fold everything that influences its
    /// output (content, path, its own options) into `transformer_key`.
    pub fn from_transformer_key(transformer_key: &str) -> Self {
        Self(digest([transformer_key, CACHE_VERSION]))
    }

    /// Key derived from everything the engine itself can observe.
    pub fn from_inputs(content: &str, config_string: &str, instrument: bool, filename: &Path) -> Self {
        let filename = filename.to_string_lossy();
        Self(digest([
            content,
            config_string,
            if instrument { "instrument" } else { "" },
            &*filename,
            CACHE_VERSION,
        ]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First two characters, used as the shard directory name.
    pub fn shard(&self) -> &str {
        self.0.get(..2).unwrap_or(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
