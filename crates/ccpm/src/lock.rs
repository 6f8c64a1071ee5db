use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use ccpm_types::{CcpmError, Result};
use fs4::fs_std::FileExt;

/// An OS-level advisory lock on a sentinel file under `$DATA/`, per §5:
/// "enforcement is by file-locking a sentinel in `$DATA/` at the start of
/// any mutating operation and releasing it on exit (including crash via
/// OS-level advisory lock)".
pub struct EngineLock {
    file: File,
    path: PathBuf,
}

impl EngineLock {
    /// Acquires the exclusive lock, blocking until it is available.
    pub fn acquire(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;

        file.lock_exclusive().map_err(|e| {
            CcpmError::fatal(format!(
                "failed to acquire lock on {}: {e}",
                path.display()
            ))
        })?;

        Ok(Self { file, path })
    }
}

impl Drop for EngineLock {
    fn drop(&mut self) {
        // The OS releases the lock on process exit regardless (including
        // crash), but we also release explicitly on a clean drop.
        let _ = FileExt::unlock(&self.file);
    }
}
