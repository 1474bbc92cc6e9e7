//! Line-record format of a resource file.
//!
//! Every line is one record: a single status byte followed by the key and a
//! `'\n'` terminator.
//!
//! ```text
//!  gpu0        <- free
//! !gpu1        <- reserved
//! ```
//!
//! The status flag is exactly one byte wide for both states, so flipping a
//! record never moves any other byte of the file. Nothing in this module
//! touches the filesystem.

#![allow(missing_docs)]

use std::fmt;

use memchr::memchr;

use crate::core::errors::{MresError, Result};

/// Status byte of a free record.
pub const FREE_FLAG: u8 = b' ';
/// Status byte of a reserved record.
pub const RESERVED_FLAG: u8 = b'!';
/// Record terminator.
pub const TERMINATOR: u8 = b'\n';

// ──────────────────── status ────────────────────

/// Allocation state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Free,
    Reserved,
}

impl Status {
    /// The on-disk flag byte.
    #[must_use]
    pub const fn flag(self) -> u8 {
        match self {
            Self::Free => FREE_FLAG,
            Self::Reserved => RESERVED_FLAG,
        }
    }

    /// Decode a flag byte; anything else is corruption.
    #[must_use]
    pub const fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            FREE_FLAG => Some(Self::Free),
            RESERVED_FLAG => Some(Self::Reserved),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Reserved => "reserved",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ──────────────────── record ────────────────────

/// One line of the resource file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub status: Status,
    pub key: String,
}

/// Why a line could not be read as a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    /// Zero-length line.
    Empty,
    /// Leading byte is neither `' '` nor `'!'`.
    UnknownFlag(u8),
    /// Status byte with nothing after it.
    MissingKey,
    /// Key bytes are not UTF-8.
    NotUtf8,
    /// Line longer than the configured bound.
    TooLong(usize),
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("empty line"),
            Self::UnknownFlag(b) => write!(f, "unknown status flag 0x{b:02x}"),
            Self::MissingKey => f.write_str("status flag without a key"),
            Self::NotUtf8 => f.write_str("key is not valid UTF-8"),
            Self::TooLong(len) => write!(f, "line of {len} bytes exceeds the key length bound"),
        }
    }
}

impl Record {
    #[must_use]
    pub fn free(key: impl Into<String>) -> Self {
        Self {
            status: Status::Free,
            key: key.into(),
        }
    }

    #[must_use]
    pub fn reserved(key: impl Into<String>) -> Self {
        Self {
            status: Status::Reserved,
            key: key.into(),
        }
    }

    /// Decode one line. A trailing terminator, if present, is not part of the key.
    pub fn parse(line: &[u8]) -> std::result::Result<Self, Malformed> {
        let line = line.strip_suffix(&[TERMINATOR]).unwrap_or(line);
        let (&flag, key) = line.split_first().ok_or(Malformed::Empty)?;
        let status = Status::from_flag(flag).ok_or(Malformed::UnknownFlag(flag))?;
        if key.is_empty() {
            return Err(Malformed::MissingKey);
        }
        let key = std::str::from_utf8(key).map_err(|_| Malformed::NotUtf8)?;
        Ok(Self {
            status,
            key: key.to_string(),
        })
    }

    /// Encode as exactly one status byte, the key, and the terminator.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(self.key.len() + 2);
        self.write_to(&mut line);
        line
    }

    /// Append the encoded line to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.status.flag());
        buf.extend_from_slice(self.key.as_bytes());
        buf.push(TERMINATOR);
    }
}

/// Encode a batch of keys as free records, in order.
#[must_use]
pub fn free_records(keys: &[String]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(keys.iter().map(|k| k.len() + 2).sum());
    for key in keys {
        Record::free(key.as_str()).write_to(&mut buf);
    }
    buf
}

// ──────────────────── key validation ────────────────────

/// Check caller-supplied keys before any file is touched.
pub fn validate_keys(keys: &[String], max_key_len: usize) -> Result<()> {
    if keys.is_empty() {
        return Err(MresError::invalid("at least one key is required"));
    }
    for key in keys {
        if key.is_empty() {
            return Err(MresError::invalid("keys must not be empty"));
        }
        if key.bytes().any(|b| b == b'\n' || b == b'\r') {
            return Err(MresError::invalid(format!(
                "key {key:?} contains a line break"
            )));
        }
        if key.len() > max_key_len {
            return Err(MresError::invalid(format!(
                "key of {} bytes exceeds the {max_key_len}-byte limit",
                key.len()
            )));
        }
    }
    Ok(())
}

// ──────────────────── scanning ────────────────────

/// One line of a buffer together with the offset of its status byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedLine {
    /// Byte offset of the status flag within the buffer.
    pub offset: u64,
    /// 1-based line number.
    pub line_no: usize,
    pub record: std::result::Result<Record, Malformed>,
}

/// Iterates the lines of a resource file buffer in file order.
///
/// A final line without a terminator is still yielded.
pub struct RecordScanner<'a> {
    buf: &'a [u8],
    pos: usize,
    line_no: usize,
    max_line_len: usize,
}

impl<'a> RecordScanner<'a> {
    /// Scan `buf`, treating lines longer than `max_key_len + 1` bytes
    /// (terminator excluded) as malformed.
    #[must_use]
    pub fn new(buf: &'a [u8], max_key_len: usize) -> Self {
        Self {
            buf,
            pos: 0,
            line_no: 0,
            max_line_len: max_key_len.saturating_add(1),
        }
    }
}

impl Iterator for RecordScanner<'_> {
    type Item = ScannedLine;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let start = self.pos;
        let rest = &self.buf[start..];
        let end = memchr(TERMINATOR, rest).map_or(rest.len(), |i| i + 1);
        self.pos = start + end;
        self.line_no += 1;

        let line = &rest[..end];
        let content_len = line.strip_suffix(&[TERMINATOR]).unwrap_or(line).len();
        let record = if content_len > self.max_line_len {
            Err(Malformed::TooLong(content_len))
        } else {
            Record::parse(line)
        };

        Some(ScannedLine {
            offset: start as u64,
            line_no: self.line_no,
            record,
        })
    }
}

/// Offset of the first record in `buf` with the given status (and key, if any).
#[must_use]
pub fn find_first(buf: &[u8], max_key_len: usize, status: Status, key: Option<&str>) -> Option<(u64, String)> {
    RecordScanner::new(buf, max_key_len).find_map(|line| match line.record {
        Ok(record) if record.status == status && key.is_none_or(|k| k == record.key) => {
            Some((line.offset, record.key))
        }
        _ => None,
    })
}
