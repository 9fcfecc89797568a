//! Advisory locking of the store file for the length of a session.
//!
//! Appending sessions take an exclusive lock, reading sessions a shared
//! one, so a reader never replays a log that is half way through a write.
//!
//! # Safety
//! - Lock is released when `FileLock` is dropped
//! - Non-blocking lock attempt with clear error on failure

use std::fs::File;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};

/// Lock flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many readers may hold it at once.
    Shared,
    /// A single writer holds it.
    Exclusive,
}

/// Advisory lock held on an open store file.
///
/// The lock is held for the lifetime of this struct and automatically
/// released when dropped.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    mode: LockMode,
}

impl FileLock {
    /// Attempt to lock an open file without blocking.
    ///
    /// # Errors
    /// - `ErrorKind::WouldBlock` if another process holds a conflicting lock
    /// - any error from duplicating the file handle
    pub fn acquire(file: &File, mode: LockMode) -> IoResult<Self> {
        let file = file.try_clone()?;
        Self::try_lock(&file, mode)?;
        Ok(Self { _file: file, mode })
    }

    /// Returns the mode the lock was taken in.
    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    #[cfg(unix)]
    fn try_lock(file: &File, mode: LockMode) -> IoResult<()> {
        use std::os::unix::io::AsRawFd;

        let op = match mode {
            LockMode::Shared => libc::LOCK_SH,
            LockMode::Exclusive => libc::LOCK_EX,
        };

        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, op | libc::LOCK_NB) };

        if result != 0 {
            let errno = std::io::Error::last_os_error();
            if errno.raw_os_error() == Some(libc::EWOULDBLOCK) {
                return Err(IoError::new(
                    ErrorKind::WouldBlock,
                    "store file is locked by another process",
                ));
            }
            return Err(errno);
        }

        Ok(())
    }

    #[cfg(windows)]
    fn try_lock(file: &File, mode: LockMode) -> IoResult<()> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
        };

        let flags = match mode {
            LockMode::Shared => LOCKFILE_FAIL_IMMEDIATELY,
            LockMode::Exclusive => LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
        };

        let handle = file.as_raw_handle() as HANDLE;
        let result = unsafe {
            let mut overlapped = std::mem::zeroed::<windows_sys::Win32::System::IO::OVERLAPPED>();
            LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
        };

        if result == 0 {
            let err = std::io::Error::last_os_error();
            return Err(IoError::new(
                ErrorKind::WouldBlock,
                format!("store file is locked by another process: {err}"),
            ));
        }

        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    fn try_lock(_file: &File, _mode: LockMode) -> IoResult<()> {
        Err(IoError::new(
            ErrorKind::Unsupported,
            "file locking not supported on this platform",
        ))
    }
}
