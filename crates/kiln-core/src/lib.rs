//! Core shared helpers for kiln.
//!
//! This crate is intentionally small and dependency-free.

mod path;

pub use path::{relative_to_root, replace_path_sep_for_glob, sanitize_cache_segment, sanitize_file_stem};

/// Single source of truth for the engine version.
///
/// The version is baked into the on-disk transform cache directory name, so a
/// release never reads artifacts written by another release.
pub const KILN_VERSION: &str = env!("CARGO_PKG_VERSION");
