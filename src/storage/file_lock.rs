use std::fs::File;
use std::path::Path;
use crate::core::error::{Error, ErrorKind, Result};

/// Single writer guarantee.
///
/// Writers hold a non-blocking exclusive advisory lock on the data file for
/// the lifetime of the handle. Readers never lock, so they can attach while a
/// writer is active.
pub struct FileLock {
    pub file: File,
}

impl FileLock {
    pub fn acquire_writer(path: &Path) -> Result<Self> {
        let file = File::open(path)?;

        // Platform-specific locking
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{flock, LOCK_EX, LOCK_NB};

            let fd = file.as_raw_fd();
            let rc = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                return Err(match err.raw_os_error() {
                    Some(code) if code == libc::EWOULDBLOCK => Error::new(
                        ErrorKind::LockContention,
                        format!("{} is already opened by another writer", path.display()),
                    ),
                    _ => Error::new(ErrorKind::Io, format!("failed to lock {}: {}", path.display(), err)),
                });
            }
        }

        Ok(FileLock { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            use libc::{flock, LOCK_UN};

            let fd = self.file.as_raw_fd();
            unsafe {
                flock(fd, LOCK_UN);
            }
        }
    }
}
