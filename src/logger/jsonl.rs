//! JSONL activity log: append-only line-delimited JSON, shared by every
//! process that touches a resource file.
//!
//! Each line is a self-contained JSON object, assembled in memory and handed
//! to the kernel with a single `write_all` on an `O_APPEND` descriptor, so
//! lines from concurrent processes (including detached release workers) never
//! interleave. The file is opened per entry; no process keeps it open.
//!
//! Three-level fallback chain:
//! 1. Log file path
//! 2. stderr with `[MRES-LOG]` prefix
//! 3. Silent discard (logging never fails an operation)

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::MresError;

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Log event types matching the allocator's operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    KeyObtained,
    ObtainTimedOut,
    KeysReleased,
    ReleaseMissing,
    ReleaseScheduled,
    DeferredRelease,
    FileCreated,
    KeysAppended,
}

/// A single JSONL log entry. Only `ts`, `event`, `severity` and `pid` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    /// Event type identifier.
    pub event: EventType,
    /// Severity level.
    pub severity: Severity,
    /// Process that performed the action.
    pub pid: u32,
    /// Resource file involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Keys involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
    /// Obtain attempts spent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Delay before a deferred release, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    /// Whether the action succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// MRES error code if the action failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Human-readable error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time and process id.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            pid: std::process::id(),
            file: None,
            keys: None,
            attempts: None,
            delay_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
        }
    }

    #[must_use]
    pub fn file(mut self, path: &Path) -> Self {
        self.file = Some(path.display().to_string());
        self
    }

    #[must_use]
    pub fn keys<S: AsRef<str>>(mut self, keys: &[S]) -> Self {
        self.keys = Some(keys.iter().map(|k| k.as_ref().to_string()).collect());
        self
    }

    #[must_use]
    pub const fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    #[must_use]
    pub const fn delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    #[must_use]
    pub const fn ok(mut self, ok: bool) -> Self {
        self.ok = Some(ok);
        self
    }

    /// Attach an error's code and message, marking the entry as failed.
    #[must_use]
    pub fn error(mut self, err: &MresError) -> Self {
        self.ok = Some(false);
        self.error_code = Some(err.code().to_string());
        self.error_message = Some(err.to_string());
        self
    }
}

/// Append-only activity log writer with stderr/discard fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a single log entry as one atomic JSONL line.
    pub fn write_entry(&self, entry: &LogEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                // Serialization failure is a programming error; log to stderr and bail.
                let _ = writeln!(io::stderr(), "[MRES-LOG] serialize error: {e}");
                return;
            }
        };

        if let Err(e) = append_line(&self.path, line.as_bytes()) {
            // stderr may be the null device in a detached worker; that is the discard level.
            let _ = writeln!(
                io::stderr(),
                "[MRES-LOG] {} unwritable ({e}), entry follows",
                self.path.display()
            );
            let _ = write!(io::stderr(), "[MRES-LOG] {line}");
        }
    }
}

// ──────────────────────── helpers ────────────────────────

fn append_line(path: &Path, line: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line)
}

/// Format current UTC time as ISO 8601.
fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ──────────────────────── tests ────────────────────────
