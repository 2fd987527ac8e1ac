//! Cross-process install lock.
//!
//! Two application instances sharing one sandbox directory must not run
//! `nrfutil install` into it at the same time. The lock is an exclusive
//! advisory lock on `<home>/.install.lock`, polled until a deadline so the
//! async runtime is never blocked.

use crate::error::{Result, SandboxError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Name of the lock file inside a sandbox home.
pub const LOCK_FILE: &str = ".install.lock";

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Held install lock, released on drop.
#[derive(Debug)]
pub struct InstallLock {
    file: File,
    path: PathBuf,
}

impl InstallLock {
    /// Acquire the lock for `home`, waiting at most `timeout`.
    pub async fn acquire(home: &Path, timeout: Duration) -> Result<Self> {
        let path = home.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        let start = Instant::now();
        let mut logged = false;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    tracing::debug!(
                        path = %path.display(),
                        waited_ms = start.elapsed().as_millis() as u64,
                        "Install lock acquired"
                    );
                    return Ok(Self { file, path });
                }
                Err(e) if is_contended(&e) => {
                    let waited = start.elapsed();
                    if waited >= timeout {
                        return Err(SandboxError::InstallLocked { path, waited });
                    }
                    if !logged {
                        tracing::info!(
                            path = %path.display(),
                            "Another process is installing into this sandbox, waiting"
                        );
                        logged = true;
                    }
                    tokio::time::sleep(POLL_INTERVAL.min(timeout - waited)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release install lock");
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();

        let lock = InstallLock::acquire(dir.path(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(lock.path().exists());
        drop(lock);

        InstallLock::acquire(dir.path(), Duration::from_secs(1))
            .await
            .expect("lock should be free again");
    }

    #[tokio::test]
    async fn test_contended_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();

        // A separate handle on the same file stands in for another process.
        let other = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(dir.path().join(LOCK_FILE))
            .unwrap();
        other.try_lock_exclusive().unwrap();

        let err = InstallLock::acquire(dir.path(), Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::InstallLocked { .. }));

        FileExt::unlock(&other).unwrap();
    }
}
