use std::fs;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Reads the raw bytes of a cache file.
///
/// Returns `Ok(None)` for missing files. Symlinks and non-regular files are
/// removed and reported as missing so a cache entry can never point outside
/// the cache directory.
pub(crate) fn read_cache_file(path: &Path) -> io::Result<Option<Vec<u8>>> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    if meta.file_type().is_symlink() || !meta.is_file() {
        remove_file_best_effort(path, "read_cache_file.invalid_type");
        return Ok(None);
    }

    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

pub(crate) fn remove_file_best_effort(path: &Path, reason: &'static str) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            tracing::debug!(
                target = "kiln.cache",
                path = %path.display(),
                reason,
                error = %err,
                "failed to remove cache file"
            );
            false
        }
    }
}

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Writes `bytes` to `path` via a uniquely named sibling temp file and a rename.
///
/// Readers never observe a partially written file. Concurrent writers racing
/// on the same path end with one complete copy in place.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Err(io::Error::other("path has no parent"));
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };

    fs::create_dir_all(parent)?;

    let (tmp_path, mut file) = open_unique_tmp_file(path, parent)?;
    let write_result = (|| -> io::Result<()> {
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    })();
    drop(file);
    if let Err(err) = write_result {
        remove_tmp_best_effort(&tmp_path, "write_failed");
        return Err(err);
    }

    match fs::rename(&tmp_path, path) {
        Ok(()) => {
            sync_dir_best_effort(parent, "atomic_write.sync_parent_dir");
            Ok(())
        }
        Err(err) if is_concurrent_writer_race(&err, path) => {
            // Same cache path means same content; another process already won.
            tracing::debug!(
                target = "kiln.cache",
                path = %path.display(),
                error = %err,
                "cache file already written by a concurrent writer"
            );
            remove_tmp_best_effort(&tmp_path, "lost_race");
            Ok(())
        }
        Err(err) => {
            remove_tmp_best_effort(&tmp_path, "rename_failed");
            Err(err)
        }
    }
}

/// On Windows a rename onto a file another process holds open fails with
/// `PermissionDenied`; when the target exists the other writer produced it.
fn is_concurrent_writer_race(err: &io::Error, path: &Path) -> bool {
    cfg!(windows) && err.kind() == io::ErrorKind::PermissionDenied && path.exists()
}

fn remove_tmp_best_effort(tmp_path: &Path, reason: &'static str) {
    if let Err(remove_err) = fs::remove_file(tmp_path) {
        if remove_err.kind() != io::ErrorKind::NotFound {
            tracing::debug!(
                target = "kiln.cache",
                path = %tmp_path.display(),
                reason,
                error = %remove_err,
                "failed to remove temporary cache file"
            );
        }
    }
}

#[track_caller]
fn sync_dir_best_effort(dir: &Path, reason: &'static str) {
    #[cfg(unix)]
    static SYNC_DIR_ERROR_LOGGED: OnceLock<()> = OnceLock::new();

    #[cfg(unix)]
    {
        match fs::File::open(dir).and_then(|dir| dir.sync_all()) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                if SYNC_DIR_ERROR_LOGGED.set(()).is_ok() {
                    let loc = std::panic::Location::caller();
                    tracing::debug!(
                        target = "kiln.cache",
                        dir = %dir.display(),
                        reason,
                        file = loc.file(),
                        line = loc.line(),
                        error = %err,
                        "failed to sync directory (best effort)"
                    );
                }
            }
        }
    }

    #[cfg(not(unix))]
    let _ = (dir, reason);
}

fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!(".tmp.{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}
