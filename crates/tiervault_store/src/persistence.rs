//! # Atomic File Persistence
//!
//! **Write-new-then-replace with a `.bak` sibling**
//!
//! Every save is a full rewrite:
//!
//! 1. The document is written to a fresh temp file in the target directory
//!    and synced to disk.
//! 2. The current primary (if any) is copied to `<name>.bak` the same way.
//! 3. The temp file is renamed over the primary.
//!
//! If step 3 fails because the platform cannot replace an existing file,
//! the primary is moved to `<name>.bak` (dropping the older backup) and the
//! temp file is renamed into place. Either way the backup is retained.
//!
//! ## Recovery
//!
//! Loading tries the primary, then the backup. A good backup is copied back
//! over the primary (best-effort). If neither decodes, the caller starts
//! from defaults. Load never fails.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{StoreError, StoreResult};

/// Suffix of the backup sibling.
pub const BACKUP_SUFFIX: &str = ".bak";

/// Suffix of in-flight temp files.
const TEMP_SUFFIX: &str = ".tmp";

/// Distinguishes temp files created within the same nanosecond.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Where a loaded document came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadSource {
    /// The primary file decoded cleanly.
    Primary,
    /// The primary was missing or corrupt; the backup was used.
    Backup,
    /// Nothing usable on disk.
    Fresh,
}

/// Result of [`AtomicFile::load_with`].
#[derive(Debug)]
pub struct Recovered<T> {
    /// The decoded document, `None` when starting fresh.
    pub value: Option<T>,
    /// Which file it came from.
    pub source: LoadSource,
}

/// A file replaced atomically on every write, with a backup sibling.
#[derive(Clone, Debug)]
pub struct AtomicFile {
    path: PathBuf,
    backup: PathBuf,
}

impl AtomicFile {
    /// Targets `path`; the backup is `path` + `.bak`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut backup = path.clone().into_os_string();
        backup.push(BACKUP_SUFFIX);
        Self {
            path,
            backup: PathBuf::from(backup),
        }
    }

    /// Primary file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Backup file path.
    #[must_use]
    pub fn backup_path(&self) -> &Path {
        &self.backup
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn temp_prefix(&self) -> String {
        format!(".{}.", self.file_name())
    }

    /// Creates a brand-new temp file next to the primary.
    fn create_temp(&self) -> StoreResult<(PathBuf, File)> {
        let dir = self.dir();
        loop {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
            let name = format!(
                "{}{}.{nanos}.{seq}{TEMP_SUFFIX}",
                self.temp_prefix(),
                std::process::id()
            );
            let path = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StoreError::io("create temp file", path, e)),
            }
        }
    }

    /// Writes `bytes` to a synced temp file and returns its path.
    ///
    /// The temp file is removed if anything fails.
    fn write_temp(&self, bytes: &[u8]) -> StoreResult<PathBuf> {
        let (temp, mut file) = self.create_temp()?;
        let written = file
            .write_all(bytes)
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_all());
        drop(file);
        if let Err(e) = written {
            remove_quietly(&temp);
            return Err(StoreError::io("write temp file", temp, e));
        }
        Ok(temp)
    }

    /// Copies the current primary over the backup, atomically.
    fn refresh_backup(&self) -> StoreResult<()> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StoreError::io("read primary", self.path.clone(), e)),
        };
        let temp = self.write_temp(&bytes)?;
        if let Err(e) = fs::rename(&temp, &self.backup) {
            remove_quietly(&temp);
            return Err(StoreError::io("replace backup", self.backup.clone(), e));
        }
        Ok(())
    }

    /// Replaces the primary with `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if the temp file cannot be written or cannot be
    /// moved into place. The primary is left as it was and no temp file
    /// is left behind.
    pub fn write(&self, bytes: &[u8]) -> StoreResult<()> {
        let temp = self.write_temp(bytes)?;

        if let Err(e) = self.refresh_backup() {
            // The new document is still installed; only the backup is stale.
            tracing::warn!(path = %self.backup.display(), error = %e, "Backup refresh failed");
        }

        match fs::rename(&temp, &self.path) {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::debug!(
                    path = %self.path.display(),
                    error = %first,
                    "Replace-over-existing failed, falling back to backup shuffle"
                );
                let result = self.replace_via_backup(&temp);
                if result.is_err() {
                    remove_quietly(&temp);
                }
                result
            }
        }
    }

    /// Fallback for platforms that cannot rename over an existing file.
    fn replace_via_backup(&self, temp: &Path) -> StoreResult<()> {
        if self.path.exists() {
            match fs::remove_file(&self.backup) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StoreError::Persist {
                        path: self.path.clone(),
                        reason: format!("cannot remove old backup: {e}"),
                    })
                }
            }
            fs::rename(&self.path, &self.backup).map_err(|e| StoreError::Persist {
                path: self.path.clone(),
                reason: format!("cannot move primary to backup: {e}"),
            })?;
        }
        fs::rename(temp, &self.path).map_err(|e| StoreError::Persist {
            path: self.path.clone(),
            reason: format!("cannot move new document into place: {e}"),
        })
    }

    /// Loads the document, falling back to the backup.
    ///
    /// `decode` turns raw bytes into a document; any error it returns is
    /// treated as corruption of that file.
    pub fn load_with<T, F>(&self, decode: F) -> Recovered<T>
    where
        F: Fn(&Path, &[u8]) -> StoreResult<T>,
    {
        match self.read_and_decode(&self.path, &decode) {
            Ok(Some(value)) => {
                return Recovered {
                    value: Some(value),
                    source: LoadSource::Primary,
                }
            }
            Ok(None) => {
                tracing::info!(path = %self.path.display(), "Primary file missing, trying backup");
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Primary file unreadable, trying backup");
            }
        }

        match self.read_and_decode(&self.backup, &decode) {
            Ok(Some(value)) => {
                tracing::warn!(path = %self.backup.display(), "Recovered from backup");
                if let Err(e) = self.restore_primary_from_backup() {
                    tracing::error!(path = %self.path.display(), error = %e, "Could not repair primary from backup");
                }
                Recovered {
                    value: Some(value),
                    source: LoadSource::Backup,
                }
            }
            Ok(None) => {
                tracing::warn!(path = %self.path.display(), "No usable file or backup, starting from defaults");
                Recovered {
                    value: None,
                    source: LoadSource::Fresh,
                }
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.backup.display(),
                    error = %e,
                    "Backup unreadable too, starting from defaults"
                );
                Recovered {
                    value: None,
                    source: LoadSource::Fresh,
                }
            }
        }
    }

    /// `Ok(None)` means the file does not exist.
    fn read_and_decode<T, F>(&self, path: &Path, decode: &F) -> StoreResult<Option<T>>
    where
        F: Fn(&Path, &[u8]) -> StoreResult<T>,
    {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io("read", path.to_path_buf(), e)),
        };
        decode(path, &bytes).map(Some)
    }

    fn restore_primary_from_backup(&self) -> StoreResult<()> {
        let bytes =
            fs::read(&self.backup).map_err(|e| StoreError::io("read backup", self.backup.clone(), e))?;
        let temp = self.write_temp(&bytes)?;
        fs::rename(&temp, &self.path).map_err(|e| {
            remove_quietly(&temp);
            StoreError::io("restore primary", self.path.clone(), e)
        })?;
        tracing::info!(path = %self.path.display(), "Primary repaired from backup");
        Ok(())
    }

    /// Removes temp files left behind by an interrupted writer.
    ///
    /// Returns how many were removed.
    pub fn sweep_stale_temps(&self) -> usize {
        let prefix = self.temp_prefix();
        let Ok(entries) = fs::read_dir(self.dir()) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix)
                && name.ends_with(TEMP_SUFFIX)
                && fs::remove_file(entry.path()).is_ok()
            {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(count = removed, path = %self.path.display(), "Removed stale temp files");
        }
        removed
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Could not remove temp file");
        }
    }
}
