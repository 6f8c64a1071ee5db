use std::io::Write;
use std::path::{Path, PathBuf};

use ccpm_types::Result;
use serde::{de::DeserializeOwned, Serialize};

use crate::events::{Event, EventSink};

/// A single JSON-on-disk value with an in-memory cache, per §4.3.
///
/// Every mutation rewrites the whole file via `tmp + rename`, so a crash
/// mid-write never leaves a half-written file in the live location. A load
/// that fails to parse moves the bad file aside to `<file>.bakN` (smallest
/// unused `N`) and resets the cache to `T::default()`.
pub struct JsonStore<T> {
    path: PathBuf,
    cache: T,
}

impl<T> JsonStore<T>
where
    T: Default + Serialize + DeserializeOwned + Clone,
{
    /// Loads `path` into memory, backing up and resetting on a parse
    /// failure. `path`'s parent directory must already exist.
    pub fn load(path: PathBuf, events: &dyn EventSink) -> Result<Self> {
        let cache = if path.exists() {
            let bytes = fs_err::read(&path)?;
            match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "store file is corrupt, backing up and resetting");
                    let backup = backup_path(&path)?;
                    fs_err::rename(&path, &backup)?;
                    events.emit(Event::Backup {
                        original: path.clone(),
                        backup,
                    });
                    T::default()
                }
            }
        } else {
            T::default()
        };

        Ok(Self { path, cache })
    }

    /// Returns a clone of the cached value. Callers must never be handed a
    /// reference to the live cache: §4.3 requires every returned collection
    /// to be a copy so aliasing can't mutate the store behind its back.
    pub fn get(&self) -> T {
        self.cache.clone()
    }

    /// Replaces the cached value and persists it atomically.
    pub fn set(&mut self, value: T) -> Result<()> {
        self.persist(&value)?;
        self.cache = value;
        Ok(())
    }

    fn persist(&self, value: &T) -> Result<()> {
        let parent = self
            .path
            .parent()
            .expect("store path must have a parent directory");
        let json = serde_json::to_vec_pretty(value)?;

        let mut tmp = tempfile::Builder::new().tempfile_in(parent)?;
        tmp.write_all(&json)?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|e| ccpm_types::CcpmError::fatal(format!("failed to persist {}: {e}", self.path.display())))?;
        Ok(())
    }
}

/// Finds the smallest unused `<path>.bakN` suffix, per §4.3.
fn backup_path(path: &Path) -> Result<PathBuf> {
    for n in 0.. {
        let candidate = path.with_extension(format!(
            "{}.bak{n}",
            path.extension().and_then(|e| e.to_str()).unwrap_or("json")
        ));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    unreachable!("backup_path: exhausted an infinite range")
}
