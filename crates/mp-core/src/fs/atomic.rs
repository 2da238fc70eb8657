use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum AtomicWriteError {
    #[error("Failed to persist temp file: {0}")]
    TempFile(#[from] tempfile::PersistError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Parent directory does not exist: {0}")]
    NoParentDir(PathBuf),
}

/// Replace `path` with `content` so readers see either the old or the new file.
///
/// The temp file is created next to the target (same filesystem), synced, given
/// `mode`, then renamed over the target.
pub fn atomic_write(path: &Path, content: &[u8], mode: u32) -> Result<(), AtomicWriteError> {
    let parent = match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Path::new("."),
        Some(p) => p,
        None => return Err(AtomicWriteError::NoParentDir(path.to_path_buf())),
    };

    if !parent.is_dir() {
        return Err(AtomicWriteError::NoParentDir(parent.to_path_buf()));
    }

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    fs::set_permissions(temp.path(), fs::Permissions::from_mode(mode))?;

    debug!(path = %path.display(), "Persisting settings file");
    temp.persist(path)?;

    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}

/// Atomic write with mode 0600, for files holding key material.
pub fn atomic_write_secret(path: &Path, content: &str) -> Result<(), AtomicWriteError> {
    atomic_write(path, content.as_bytes(), 0o600)
}
