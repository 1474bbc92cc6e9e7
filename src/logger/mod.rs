//! Operator diagnostics: verbose `Info:` lines on stderr plus the optional
//! JSONL activity log.

pub mod jsonl;

use std::fmt::Display;

use crate::core::config::Config;
use jsonl::{ActivityLog, LogEntry};

/// Sink for everything the allocator reports about itself.
#[derive(Debug, Clone, Default)]
pub struct Logger {
    verbose: bool,
    activity: Option<ActivityLog>,
}

impl Logger {
    /// A logger that drops everything.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn new(verbose: bool, activity: Option<ActivityLog>) -> Self {
        Self { verbose, activity }
    }

    /// Build from the resolved configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.verbose, config.activity_log.clone().map(ActivityLog::new))
    }

    pub const fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn activity_log(&self) -> Option<&ActivityLog> {
        self.activity.as_ref()
    }

    /// Emit an `Info:` diagnostic when verbose.
    pub fn info(&self, message: impl Display) {
        if self.verbose {
            eprintln!("mresource: Info: {message}");
        }
    }

    /// Emit a `Warning:` diagnostic when verbose.
    pub fn warn(&self, message: impl Display) {
        if self.verbose {
            eprintln!("mresource: Warning: {message}");
        }
    }

    /// Append an entry to the activity log, if one is configured.
    pub fn event(&self, entry: &LogEntry) {
        if let Some(log) = &self.activity {
            log.write_entry(entry);
        }
    }
}
