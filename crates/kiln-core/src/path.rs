use std::path::{Component, Path, PathBuf};

/// Normalizes Windows separators so a path can be matched against `/`-based globs.
pub fn replace_path_sep_for_glob(path: &str) -> String {
    path.replace('\\', "/")
}

/// Returns `path` relative to `root`.
///
/// Relative inputs are assumed to already be root-relative and are returned
/// unchanged. Absolute paths outside of `root` are expressed with `..`
/// components.
pub fn relative_to_root(root: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        return path.to_path_buf();
    }
    if let Ok(stripped) = path.strip_prefix(root) {
        return stripped.to_path_buf();
    }

    let root_components: Vec<Component<'_>> = root.components().collect();
    let path_components: Vec<Component<'_>> = path.components().collect();
    let common = root_components
        .iter()
        .zip(&path_components)
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..root_components.len() {
        out.push("..");
    }
    for component in &path_components[common..] {
        out.push(component.as_os_str());
    }
    out
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// File stem of `path` with every non-word character removed.
///
/// Used as the human-readable prefix of cache file names; characters such as
/// `:` are not portable across file systems.
pub fn sanitize_file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().chars().filter(|ch| is_word_char(*ch)).collect())
        .unwrap_or_default()
}

/// Replaces every non-word character with `-` so the value is safe as a single
/// directory name.
pub fn sanitize_cache_segment(value: &str) -> String {
    value
        .chars()
        .map(|ch| if is_word_char(ch) { ch } else { '-' })
        .collect()
}
