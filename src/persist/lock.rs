//! Output directory locking
//!
//! Two runs writing into the same output directory would interleave their
//! artifacts and state file. Writers take an advisory lock on
//! `<output_dir>/.recon.lock` first; the lock waits up to a timeout and
//! reports contention through `tracing`.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Errors from lock operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("timed out after {timeout:?} waiting for lock {path}")]
    Timeout { path: PathBuf, timeout: Duration },

    #[error("I/O error on lock {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held lock on an output directory; released on drop
#[derive(Debug)]
pub struct OutputLock {
    path: PathBuf,
    file: File,
}

impl OutputLock {
    pub const FILE_NAME: &'static str = ".recon.lock";

    const POLL_INTERVAL: Duration = Duration::from_millis(50);
    const WARN_AFTER: Duration = Duration::from_millis(500);

    /// Lock `output_dir`, creating it if needed
    pub fn acquire(output_dir: &Path, timeout: Duration) -> Result<Self, LockError> {
        let path = output_dir.join(Self::FILE_NAME);
        fs::create_dir_all(output_dir).map_err(|source| LockError::Io {
            path: path.clone(),
            source,
        })?;

        let start = Instant::now();
        let mut warned = false;
        loop {
            match try_lock(&path) {
                Ok(file) => {
                    if warned {
                        tracing::info!(
                            lock = %path.display(),
                            waited_secs = start.elapsed().as_secs_f64(),
                            "acquired output lock after contention"
                        );
                    }
                    return Ok(Self { path, file });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !warned && start.elapsed() > Self::WARN_AFTER {
                        tracing::warn!(lock = %path.display(), "output directory is locked by another run, waiting");
                        warned = true;
                    }
                }
                Err(source) => return Err(LockError::Io { path, source }),
            }

            if start.elapsed() >= timeout {
                return Err(LockError::Timeout { path, timeout });
            }
            std::thread::sleep(Self::POLL_INTERVAL);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn try_lock(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o644)
        .open(path)?;

    // SAFETY: fd is owned by `file`, which outlives the call
    let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(file);
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn try_lock(path: &Path) -> io::Result<File> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "lock held"))
        }
        Err(e) => Err(e),
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            // SAFETY: fd is still owned by self.file
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        // Exclusive-create locks are only released by removing the file
        #[cfg(not(unix))]
        {
            let _ = fs::remove_file(&self.path);
        }
    }
}
