//! Whole-file locks scoped to one read-modify-write cycle, or to one read.
//!
//! Uses `flock(2)` through `nix::fcntl::Flock`. The lock belongs to the open
//! file description, so two independent `open()` calls conflict even inside
//! one process, and the kernel drops it when the holder dies. The guard
//! releases it on every exit path of the critical section.

#![allow(missing_docs)]

use std::fs::File;
use std::path::Path;

use crate::core::errors::{MresError, Result};

/// Run `critical_section` while holding an exclusive lock on `file`.
///
/// Blocks without a timeout until the lock is granted. The lock is released
/// before this returns, whether the critical section succeeded or not.
pub fn with_exclusive_lock<T, F>(file: File, path: &Path, critical_section: F) -> Result<T>
where
    F: FnOnce(&mut File) -> Result<T>,
{
    with_lock(file, path, Mode::Exclusive, critical_section)
}

/// Like [`with_exclusive_lock`] but other readers may hold it at the same
/// time. Only needs `file` open for reading, which NFS requires of a shared
/// lock as it requires write access for an exclusive one.
pub fn with_shared_lock<T, F>(file: File, path: &Path, critical_section: F) -> Result<T>
where
    F: FnOnce(&mut File) -> Result<T>,
{
    with_lock(file, path, Mode::Shared, critical_section)
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Exclusive,
    Shared,
}

#[cfg(unix)]
fn with_lock<T, F>(file: File, path: &Path, mode: Mode, critical_section: F) -> Result<T>
where
    F: FnOnce(&mut File) -> Result<T>,
{
    use nix::errno::Errno;
    use nix::fcntl::{Flock, FlockArg};

    let arg = match mode {
        Mode::Exclusive => FlockArg::LockExclusive,
        Mode::Shared => FlockArg::LockShared,
    };
    let mut file = file;
    let mut guard = loop {
        match Flock::lock(file, arg) {
            Ok(guard) => break guard,
            Err((returned, Errno::EINTR)) => file = returned,
            Err((_file, errno)) => {
                return Err(MresError::Lock {
                    path: path.to_path_buf(),
                    details: errno.to_string(),
                });
            }
        }
    };

    let outcome = critical_section(&mut guard);
    drop(guard);
    outcome
}

#[cfg(not(unix))]
fn with_lock<T, F>(_file: File, _path: &Path, _mode: Mode, _critical_section: F) -> Result<T>
where
    F: FnOnce(&mut File) -> Result<T>,
{
    Err(MresError::UnsupportedPlatform {
        details: "whole-file locking requires flock(2)".to_string(),
    })
}
