//! MRES-prefixed error types with structured error codes and the exit-code contract.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, MresError>;

// ──────────────────── exit contract ────────────────────

/// Process exit statuses. Codes and messages are stable: scripts branch on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExitReason {
    Success = 0,
    FileNotOpen = 1,
    NotFound = 2,
    ArgumentError = 3,
    TimeOut = 4,
    DetachFailed = 5,
}

impl ExitReason {
    /// Numeric process exit code.
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Human-readable message printed next to a non-zero exit.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Success => "",
            Self::FileNotOpen => "Could not open file",
            Self::NotFound => "Could not find key",
            Self::ArgumentError => "Argument error",
            Self::TimeOut => "Time-out",
            Self::DetachFailed => "Could not detach",
        }
    }

    /// All reasons, in code order.
    pub const ALL: [Self; 6] = [
        Self::Success,
        Self::FileNotOpen,
        Self::NotFound,
        Self::ArgumentError,
        Self::TimeOut,
        Self::DetachFailed,
    ];
}

// ──────────────────── error ────────────────────

/// Top-level error type for mresource.
#[derive(Debug, Error)]
pub enum MresError {
    #[error("[MRES-1001] cannot open {path}: {source}")]
    FileNotOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[MRES-1002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[MRES-1003] failed to lock {path}: {details}")]
    Lock { path: PathBuf, details: String },

    #[error("[MRES-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[MRES-2001] no reserved record in {path} for key(s): {}", keys.join(" "))]
    NotFound { path: PathBuf, keys: Vec<String> },

    #[error("[MRES-3001] invalid argument: {details}")]
    InvalidArgument { details: String },

    #[error("[MRES-3002] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error(
        "[MRES-4001] no free key in {path} after {attempts} attempt(s) over {:.1}s",
        waited.as_secs_f64()
    )]
    TimedOut {
        path: PathBuf,
        attempts: u32,
        waited: Duration,
    },

    #[error("[MRES-5001] deferred release could not be detached: {details}")]
    Detach { details: String },
}

impl MresError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::FileNotOpen { .. } => "MRES-1001",
            Self::Io { .. } => "MRES-1002",
            Self::Lock { .. } => "MRES-1003",
            Self::UnsupportedPlatform { .. } => "MRES-1101",
            Self::NotFound { .. } => "MRES-2001",
            Self::InvalidArgument { .. } => "MRES-3001",
            Self::ConfigParse { .. } => "MRES-3002",
            Self::TimedOut { .. } => "MRES-4001",
            Self::Detach { .. } => "MRES-5001",
        }
    }

    /// Exit status this error maps onto.
    ///
    /// Read/write/lock failures after a successful open still mean the path is
    /// unusable, so they share the file-not-open status.
    #[must_use]
    pub const fn reason(&self) -> ExitReason {
        match self {
            Self::FileNotOpen { .. }
            | Self::Io { .. }
            | Self::Lock { .. }
            | Self::UnsupportedPlatform { .. } => ExitReason::FileNotOpen,
            Self::NotFound { .. } => ExitReason::NotFound,
            Self::InvalidArgument { .. } | Self::ConfigParse { .. } => ExitReason::ArgumentError,
            Self::TimedOut { .. } => ExitReason::TimeOut,
            Self::Detach { .. } => ExitReason::DetachFailed,
        }
    }

    /// Convenience constructor for open failures.
    #[must_use]
    pub fn not_open(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::FileNotOpen {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for caller mistakes.
    #[must_use]
    pub fn invalid(details: impl Into<String>) -> Self {
        Self::InvalidArgument {
            details: details.into(),
        }
    }
}
