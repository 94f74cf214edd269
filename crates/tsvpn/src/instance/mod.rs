//! Cross-process single instance guard.
//!
//! An OS advisory lock on a fixed file decides whether another instance is
//! running. The lock, not the file's existence, is authoritative: a stale file
//! left behind by a crashed process is harmless because the OS drops the lock
//! with the process. Platform code lives in the `unix` and `win32` submodules.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::VpnError;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use self::unix as platform;

#[cfg(windows)]
mod win32;
#[cfg(windows)]
use self::win32 as platform;

/// Result of [`SingleInstanceGuard::acquire`].
#[derive(Debug)]
pub enum AcquireOutcome {
    Acquired,
    /// Another process holds the lock.
    HeldByOther,
    Error(VpnError),
}

/// Why the platform lock call failed.
pub(crate) enum LockFailure {
    Contended,
    Other(std::io::Error),
}

pub struct SingleInstanceGuard {
    path: PathBuf,
    held: Option<platform::HeldLock>,
}

impl SingleInstanceGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            held: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Takes a non-blocking exclusive lock on the lock file, creating it (and
    /// its parent directory) if needed.
    pub fn acquire(&mut self) -> AcquireOutcome {
        if self.held.is_some() {
            return AcquireOutcome::Acquired;
        }

        let file = match open_lock_file(&self.path) {
            Ok(f) => f,
            Err(e) => {
                log::error!("Could not create/open lock file {:?}: {}", self.path, e);
                return AcquireOutcome::Error(VpnError::LockAcquisition {
                    message: format!("{:?}: {}", self.path, e),
                });
            }
        };

        match platform::lock_exclusive_nonblocking(file) {
            Ok(held) => {
                log::info!("Instance lock acquired: {:?}", self.path);
                self.held = Some(held);
                AcquireOutcome::Acquired
            }
            Err(LockFailure::Contended) => {
                log::info!("Instance lock: another instance detected.");
                AcquireOutcome::HeldByOther
            }
            Err(LockFailure::Other(e)) => {
                log::error!("Instance lock error: {}", e);
                AcquireOutcome::Error(VpnError::LockAcquisition {
                    message: e.to_string(),
                })
            }
        }
    }

    /// Unlocks, closes the descriptor and deletes the lock file. No-op when
    /// the lock is not held.
    pub fn release(&mut self) {
        let Some(held) = self.held.take() else {
            return;
        };
        if let Err(e) = platform::unlock(held) {
            log::error!("Error releasing lock: {}", e);
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::info!("Lock released and file deleted."),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::error!("Error deleting lock file {:?}: {}", self.path, e),
        }
    }
}

impl Drop for SingleInstanceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

fn open_lock_file(path: &Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_descriptor_sees_the_lock_held() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.lock");

        let mut first = SingleInstanceGuard::new(&path);
        let mut second = SingleInstanceGuard::new(&path);

        assert!(matches!(first.acquire(), AcquireOutcome::Acquired));
        assert!(matches!(second.acquire(), AcquireOutcome::HeldByOther));
        assert!(!second.is_held());
    }

    #[test]
    fn release_deletes_the_file_and_frees_the_lock() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("app.lock");

        let mut first = SingleInstanceGuard::new(&path);
        assert!(matches!(first.acquire(), AcquireOutcome::Acquired));
        assert!(path.exists());

        first.release();
        assert!(!path.exists());

        let mut second = SingleInstanceGuard::new(&path);
        assert!(matches!(second.acquire(), AcquireOutcome::Acquired));
    }

    #[test]
    fn stale_file_does_not_block_acquisition() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.lock");
        std::fs::write(&path, b"").unwrap();

        let mut guard = SingleInstanceGuard::new(&path);
        assert!(matches!(guard.acquire(), AcquireOutcome::Acquired));
    }

    #[test]
    fn unusable_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        // A regular file cannot be used as a parent directory.
        let mut guard = SingleInstanceGuard::new(blocker.join("app.lock"));
        assert!(matches!(guard.acquire(), AcquireOutcome::Error(_)));
    }
}
