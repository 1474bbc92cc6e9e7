//! Configuration: smart defaults + env var overrides. There is no config file;
//! command-line flags are applied on top by the CLI.

#![allow(missing_docs)]

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::errors::{MresError, Result};

/// Seconds between obtain attempts when nothing else is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Longest key a record may carry, in bytes.
pub const DEFAULT_MAX_KEY_LEN: usize = 1023;

const MAX_KEY_LEN_CEILING: usize = 65_535;

/// Full mresource configuration model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Sleep between obtain attempts.
    pub poll_interval: Duration,
    /// Obtain budget per key; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Upper bound on key length in bytes (status flag and terminator excluded).
    pub max_key_len: usize,
    /// Optional JSONL activity log.
    pub activity_log: Option<PathBuf>,
    /// Emit `Info:` diagnostics on stderr.
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            max_key_len: DEFAULT_MAX_KEY_LEN,
            activity_log: None,
            verbose: false,
        }
    }
}

impl Config {
    /// Defaults, then process environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `MRESOURCE_*` overrides read through `lookup`.
    pub fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("MRESOURCE_POLL_INTERVAL") {
            self.poll_interval =
                Duration::from_secs(parse_env_u64("MRESOURCE_POLL_INTERVAL", &raw)?);
        }

        if let Some(raw) = lookup("MRESOURCE_TIMEOUT") {
            self.timeout = Some(Duration::from_secs(parse_env_u64(
                "MRESOURCE_TIMEOUT",
                &raw,
            )?));
        }

        if let Some(raw) = lookup("MRESOURCE_MAX_KEY_LEN") {
            self.max_key_len = parse_env_usize("MRESOURCE_MAX_KEY_LEN", &raw)?;
        }

        if let Some(raw) = lookup("MRESOURCE_LOG") {
            self.activity_log = Some(PathBuf::from(raw));
        }

        if let Some(raw) = lookup("MRESOURCE_VERBOSE") {
            self.verbose = parse_env_bool("MRESOURCE_VERBOSE", &raw)?;
        }

        Ok(())
    }

    /// Reject values the allocator cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(MresError::invalid("poll interval must be non-zero"));
        }
        if !(1..=MAX_KEY_LEN_CEILING).contains(&self.max_key_len) {
            return Err(MresError::invalid(format!(
                "max_key_len must be in [1, {MAX_KEY_LEN_CEILING}], got {}",
                self.max_key_len
            )));
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|error| MresError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_usize(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|error| MresError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(MresError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: expected a boolean"),
        }),
    }
}
