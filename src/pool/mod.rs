//! A resource file as a pool of keys: allocation, lifecycle and inventory.
//!
//! [`ResourceFile`] is a handle, not a cache. Every operation opens the file,
//! takes the whole-file lock for one read-modify-write cycle, and re-reads the
//! authoritative on-disk state; nothing is remembered between operations.

pub mod allocator;
pub mod inventory;
pub mod lifecycle;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::core::config::{Config, DEFAULT_MAX_KEY_LEN};
use crate::core::errors::{MresError, Result};
use crate::logger::Logger;
use crate::store::record::Status;

/// Handle on one resource file.
#[derive(Debug, Clone)]
pub struct ResourceFile {
    path: PathBuf,
    max_key_len: usize,
    logger: Logger,
}

impl ResourceFile {
    /// Handle with default limits and no logging.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_key_len: DEFAULT_MAX_KEY_LEN,
            logger: Logger::silent(),
        }
    }

    /// Handle using the key bound and logging settings of `config`.
    pub fn with_config(path: impl Into<PathBuf>, config: &Config) -> Self {
        Self {
            path: path.into(),
            max_key_len: config.max_key_len,
            logger: Logger::from_config(config),
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    #[must_use]
    pub const fn with_max_key_len(mut self, max_key_len: usize) -> Self {
        self.max_key_len = max_key_len;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn max_key_len(&self) -> usize {
        self.max_key_len
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Succeeds when the file exists and can be opened for read and write.
    pub fn check_openable(&self) -> Result<()> {
        self.open_rw().map(drop)
    }

    fn open_rw(&self) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| MresError::not_open(&self.path, e))
    }

    fn open_read(&self) -> Result<File> {
        File::open(&self.path).map_err(|e| MresError::not_open(&self.path, e))
    }

    /// Whole file contents, read from the start.
    fn read_all(&self, file: &mut File) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_end(&mut buf))
            .map_err(|e| MresError::io(&self.path, e))?;
        Ok(buf)
    }

    /// Overwrite the single status byte at `offset`.
    fn write_flag(&self, file: &mut File, offset: u64, status: Status) -> Result<()> {
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(&[status.flag()]))
            .map_err(|e| MresError::io(&self.path, e))
    }
}
