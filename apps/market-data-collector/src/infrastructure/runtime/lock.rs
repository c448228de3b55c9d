//! Collector Lock
//!
//! Exclusive advisory lock on `<data_dir>/.mdc.lock`. The OS drops the
//! lock when the holder dies, so a stale file never blocks a new
//! collector. The holder writes `"<pid> <instance id>"` into the file and
//! removes it on release.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Attempts when the file is replaced between open and lock.
const MAX_OPEN_ATTEMPTS: usize = 3;

/// Lock file errors. Contention is not an error.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Lock directory or file could not be prepared.
    #[error("Lock file '{path}': {source}")]
    Io {
        /// Lock path.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
}

impl LockError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A held collector lock. Released on drop.
#[derive(Debug)]
pub struct LockToken {
    file: Option<File>,
    path: PathBuf,
    instance_id: Uuid,
}

impl LockToken {
    /// Try to take the lock at `path` without blocking.
    ///
    /// Returns `Ok(None)` when another holder owns it.
    ///
    /// # Errors
    ///
    /// Returns `LockError` when the lock file cannot be created or written.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, LockError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| LockError::io(path, e))?;
        }

        for _ in 0..MAX_OPEN_ATTEMPTS {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .map_err(|e| LockError::io(path, e))?;

            match file.try_lock() {
                Ok(()) => {}
                Err(TryLockError::WouldBlock) => return Ok(None),
                Err(TryLockError::Error(e)) => return Err(LockError::io(path, e)),
            }

            // A releasing holder may have unlinked the file we opened.
            if !still_at_path(&file, path) {
                let _ = file.unlock();
                continue;
            }

            let instance_id = Uuid::new_v4();
            write_holder(&file, instance_id).map_err(|e| LockError::io(path, e))?;
            tracing::debug!(path = %path.display(), %instance_id, "Collector lock acquired");
            return Ok(Some(Self {
                file: Some(file),
                path: path.to_path_buf(),
                instance_id,
            }));
        }

        Ok(None)
    }

    /// Lock file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identifier written into the lock file.
    #[must_use]
    pub const fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Remove the lock file and drop the lock.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        // Unlink while still holding the lock so no waiter locks a doomed inode.
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove lock file");
            }
            _ => {}
        }
        if let Err(e) = file.unlock() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to unlock");
        }
        tracing::debug!(path = %self.path.display(), "Collector lock released");
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Holder recorded in a lock file: `(pid, instance id)`.
#[must_use]
pub fn read_holder(path: &Path) -> Option<(u32, String)> {
    let content = fs::read_to_string(path).ok()?;
    let mut parts = content.split_whitespace();
    let pid = parts.next()?.parse().ok()?;
    let instance = parts.next()?.to_string();
    Some((pid, instance))
}

fn write_holder(mut file: &File, instance_id: Uuid) -> io::Result<()> {
    file.set_len(0)?;
    writeln!(file, "{} {}", std::process::id(), instance_id)?;
    file.sync_all()
}

#[cfg(unix)]
fn still_at_path(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_at_path(_file: &File, path: &Path) -> bool {
    path.exists()
}
