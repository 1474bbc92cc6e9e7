//! Creating a resource file and growing a live one.

#![allow(missing_docs)]

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use crate::core::errors::{MresError, Result};
use crate::logger::jsonl::{EventType, LogEntry, Severity};
use crate::pool::ResourceFile;
use crate::store::lock::with_exclusive_lock;
use crate::store::record::{TERMINATOR, free_records, validate_keys};

impl ResourceFile {
    /// Truncate or create the file and write one free record per key, in order.
    ///
    /// Not locked: creation is assumed to happen before anyone else uses the
    /// file. Anything previously in the file is discarded.
    pub fn create(&self, keys: &[String]) -> Result<()> {
        validate_keys(keys, self.max_key_len())?;
        self.logger()
            .info(format_args!("Creating resource key file '{}'.", self.path().display()));

        let mut file = File::create(self.path()).map_err(|e| MresError::not_open(self.path(), e))?;
        file.write_all(&free_records(keys))
            .and_then(|()| file.sync_data())
            .map_err(|e| MresError::io(self.path(), e))?;

        self.logger().event(
            &LogEntry::new(EventType::FileCreated, Severity::Info)
                .file(self.path())
                .keys(keys)
                .ok(true),
        );
        Ok(())
    }

    /// Append one free record per key to a file that may be in use.
    ///
    /// Creates the file if it does not exist. The records go out in a single
    /// write under the lock; existing bytes are never rewritten. A last line
    /// missing its terminator gets one first, so it stays a record of its own.
    pub fn append(&self, keys: &[String]) -> Result<()> {
        validate_keys(keys, self.max_key_len())?;
        self.logger()
            .info(format_args!("Appending keys to file '{}'.", self.path().display()));

        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(self.path())
            .map_err(|e| MresError::not_open(self.path(), e))?;
        let records = free_records(keys);
        with_exclusive_lock(file, self.path(), |f| {
            let mut out = Vec::with_capacity(records.len() + 1);
            if self.ends_mid_line(f)? {
                out.push(TERMINATOR);
            }
            out.extend_from_slice(&records);
            f.write_all(&out).map_err(|e| MresError::io(self.path(), e))
        })?;

        self.logger().event(
            &LogEntry::new(EventType::KeysAppended, Severity::Info)
                .file(self.path())
                .keys(keys)
                .ok(true),
        );
        Ok(())
    }
}

impl ResourceFile {
    /// True when the file is non-empty and its last byte is not a terminator.
    fn ends_mid_line(&self, file: &mut File) -> Result<bool> {
        let len = file
            .metadata()
            .map_err(|e| MresError::io(self.path(), e))?
            .len();
        if len == 0 {
            return Ok(false);
        }
        let mut last = [0_u8; 1];
        file.seek(SeekFrom::End(-1))
            .and_then(|_| file.read_exact(&mut last))
            .map_err(|e| MresError::io(self.path(), e))?;
        Ok(last[0] != TERMINATOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::allocator::PollPolicy;
    use std::fs;
    use std::time::Duration;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn create_writes_free_records_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ResourceFile::new(dir.path().join("ports"));
        pool.create(&keys(&["8001", "8000", "8002"])).unwrap();
        assert_eq!(fs::read(pool.path()).unwrap(), b" 8001\n 8000\n 8002\n");
    }

    #[test]
    fn create_twice_overwrites_completely() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ResourceFile::new(dir.path().join("ports"));
        pool.create(&keys(&["a", "b", "c", "d"])).unwrap();
        pool.create(&keys(&["x"])).unwrap();
        assert_eq!(fs::read(pool.path()).unwrap(), b" x\n");
    }

    #[test]
    fn create_in_missing_directory_is_file_not_open() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ResourceFile::new(dir.path().join("no").join("such").join("pool"));
        let err = pool.create(&keys(&["a"])).unwrap_err();
        assert!(matches!(err, MresError::FileNotOpen { .. }));
    }

    #[test]
    fn invalid_keys_leave_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ResourceFile::new(dir.path().join("pool")).with_max_key_len(4);
        pool.create(&keys(&["ok"])).unwrap();

        let err = pool.create(&keys(&["toolong"])).unwrap_err();
        assert!(matches!(err, MresError::InvalidArgument { .. }));
        let err = pool.append(&keys(&["line\nbreak"])).unwrap_err();
        assert!(matches!(err, MresError::InvalidArgument { .. }));

        assert_eq!(fs::read(pool.path()).unwrap(), b" ok\n");
    }

    #[test]
    fn append_preserves_existing_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool");
        fs::write(&path, b"!a\n b\n").unwrap();
        let pool = ResourceFile::new(&path);

        pool.append(&keys(&["c", "d"])).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"!a\n b\n c\n d\n");
    }

    #[test]
    fn append_after_unterminated_last_line_keeps_it_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool");
        fs::write(&path, b"!a\n!b").unwrap();
        let pool = ResourceFile::new(&path);

        pool.append(&keys(&["c"])).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"!a\n!b\n c\n");

        let inv = pool.inventory().unwrap();
        assert_eq!((inv.free, inv.reserved, inv.malformed), (1, 2, 0));

        let report = pool.release_now(&keys(&["b"])).unwrap();
        assert!(report.is_complete());
        let policy = PollPolicy::new(Duration::from_millis(10), Some(Duration::ZERO)).unwrap();
        assert_eq!(pool.obtain_one(&policy).unwrap().key, "b");
        assert_eq!(pool.obtain_one(&policy).unwrap().key, "c");
    }

    #[test]
    fn append_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ResourceFile::new(dir.path().join("fresh"));
        pool.append(&keys(&["only"])).unwrap();
        assert_eq!(fs::read(pool.path()).unwrap(), b" only\n");
    }

    #[test]
    fn appended_keys_become_obtainable() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ResourceFile::new(dir.path().join("pool"));
        pool.create(&keys(&["a"])).unwrap();
        let policy = PollPolicy::new(Duration::from_millis(10), Some(Duration::ZERO)).unwrap();

        assert_eq!(pool.obtain_one(&policy).unwrap().key, "a");
        assert!(pool.obtain_one(&policy).is_err());

        pool.append(&keys(&["b"])).unwrap();
        assert_eq!(pool.obtain_one(&policy).unwrap().key, "b");
    }
}
