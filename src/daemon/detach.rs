//! Deferred release: run a release after a delay in a process that outlives
//! the invoking command.
//!
//! The invoker cannot fork in safe Rust, so the binary re-executes itself in
//! two hidden stages:
//!
//! 1. **relay** (`relay-release`): spawned by the invoker in a process group
//!    of its own, so signals aimed at the invoker's group (Ctrl-C in a shell,
//!    a job runner tearing down a step) never reach it or the worker. The
//!    invoker waits for it. It spawns the worker and exits at once, so the
//!    invoker is never the parent of a long-lived process and leaves no
//!    zombie behind.
//! 2. **worker** (`deferred-release`): starts a new session, runs from `/`
//!    with every standard stream on the null device, sleeps out the delay and
//!    performs the locked release.
//!
//! Once the relay has exited successfully nothing flows back to the invoker.
//! A worker that finds the file gone or the key missing can only say so in
//! the activity log, if one is configured.

#![allow(missing_docs)]

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use crate::core::errors::{MresError, Result};
use crate::logger::jsonl::{EventType, LogEntry, Severity};
use crate::pool::ResourceFile;
use crate::pool::allocator::ReleaseReport;

/// Hidden subcommand run by the short-lived relay process.
pub const RELAY_SUBCOMMAND: &str = "relay-release";
/// Hidden subcommand run by the detached worker.
pub const WORKER_SUBCOMMAND: &str = "deferred-release";

// ──────────────────── job ────────────────────

/// A release to perform later, independent of the caller's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredRelease {
    /// Absolute path of the resource file.
    pub file: PathBuf,
    pub keys: Vec<String>,
    pub delay: Duration,
}

impl DeferredRelease {
    /// The path is made absolute so the worker can run from `/`.
    ///
    /// The delay travels to the worker in whole milliseconds, so it must fit
    /// in a `u64` of them.
    pub fn new(file: &Path, keys: Vec<String>, delay: Duration) -> Result<Self> {
        if u64::try_from(delay.as_millis()).is_err() {
            return Err(MresError::invalid(format!(
                "delay of {} s is too large",
                delay.as_secs()
            )));
        }
        let file = std::path::absolute(file).map_err(|e| MresError::io(file, e))?;
        Ok(Self { file, keys, delay })
    }

    /// Stage arguments after the subcommand: `FILE --delay-ms N -- KEY...`.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args = Vec::with_capacity(self.keys.len() + 4);
        args.push(self.file.clone().into_os_string());
        args.push("--delay-ms".into());
        args.push(self.delay.as_millis().to_string().into());
        args.push("--".into());
        args.extend(self.keys.iter().map(OsString::from));
        args
    }

    pub fn delay_ms(&self) -> u64 {
        u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX)
    }
}

// ──────────────────── scheduling ────────────────────

/// Hands a deferred release to something that will run it later.
pub trait ReleaseScheduler {
    /// Returns once the job is out of the caller's hands.
    fn schedule(&self, job: &DeferredRelease) -> Result<()>;
}

/// Schedules deferred releases by re-executing `program` as relay and worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessLauncher {
    program: PathBuf,
    activity_log: Option<PathBuf>,
    max_key_len: Option<usize>,
}

impl ProcessLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            activity_log: None,
            max_key_len: None,
        }
    }

    /// Launcher for the running executable.
    pub fn current() -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| MresError::Detach {
            details: format!("cannot locate own executable: {e}"),
        })?;
        Ok(Self::new(program))
    }

    /// Activity log the worker should report to. Made absolute for the worker.
    #[must_use]
    pub fn with_activity_log(mut self, path: Option<&Path>) -> Self {
        self.activity_log = path.map(|p| std::path::absolute(p).unwrap_or_else(|_| p.to_path_buf()));
        self
    }

    /// Key bound the worker should apply, if not the default.
    #[must_use]
    pub const fn with_max_key_len(mut self, max_key_len: usize) -> Self {
        self.max_key_len = Some(max_key_len);
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Command line for one stage, with the worker's environment pinned down.
    pub fn command(&self, stage: &str, job: &DeferredRelease) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(stage).args(job.to_args());
        cmd.env_remove("MRESOURCE_VERBOSE");
        match &self.activity_log {
            Some(path) => cmd.env("MRESOURCE_LOG", path),
            None => cmd.env_remove("MRESOURCE_LOG"),
        };
        if let Some(max_key_len) = self.max_key_len {
            cmd.env("MRESOURCE_MAX_KEY_LEN", max_key_len.to_string());
        }
        cmd
    }

    /// Relay stage: start the detached worker and return without waiting.
    #[allow(clippy::zombie_processes)]
    pub fn relay(&self, job: &DeferredRelease) -> Result<()> {
        let mut cmd = self.command(WORKER_SUBCOMMAND, job);
        cmd.current_dir("/")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // The child handle is dropped without waiting; the worker is reparented
        // once the relay exits.
        cmd.spawn().map(drop).map_err(|e| MresError::Detach {
            details: format!("cannot spawn worker {}: {e}", self.program.display()),
        })
    }
}

impl ReleaseScheduler for ProcessLauncher {
    fn schedule(&self, job: &DeferredRelease) -> Result<()> {
        let mut cmd = self.command(RELAY_SUBCOMMAND, job);
        cmd.stdin(Stdio::null()).stdout(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let status = cmd
            .status()
            .map_err(|e| MresError::Detach {
                details: format!("cannot spawn relay {}: {e}", self.program.display()),
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(MresError::Detach {
                details: format!("relay exited with {status}"),
            })
        }
    }
}

// ──────────────────── worker ────────────────────

/// Worker stage entry point: leave the invoker's session, then [`run_worker`].
///
/// Failing to start a session is logged and the release goes ahead anyway;
/// the relay's process group already keeps the invoker's signals away.
pub fn run_detached_worker(job: &DeferredRelease, pool: &ResourceFile) -> Result<ReleaseReport> {
    if let Err(err) = start_session() {
        pool.logger().event(
            &LogEntry::new(EventType::DeferredRelease, Severity::Warning)
                .file(&job.file)
                .keys(&job.keys)
                .delay_ms(job.delay_ms())
                .error(&err),
        );
    }
    run_worker(job, pool)
}

/// Wait out the delay, then release.
///
/// The outcome goes to the activity log only; the caller of the original
/// release has already been told it succeeded.
pub fn run_worker(job: &DeferredRelease, pool: &ResourceFile) -> Result<ReleaseReport> {
    thread::sleep(job.delay);

    let outcome = pool.release_now(&job.keys);
    let entry = LogEntry::new(EventType::DeferredRelease, Severity::Info)
        .file(&job.file)
        .keys(&job.keys)
        .delay_ms(job.delay_ms());
    let entry = match &outcome {
        Ok(report) if report.is_complete() => entry.ok(true),
        Ok(report) => entry.error(&MresError::NotFound {
            path: job.file.clone(),
            keys: report.missing.clone(),
        }),
        Err(err) => entry.error(err),
    };
    let entry = if entry.ok == Some(false) {
        LogEntry {
            severity: Severity::Error,
            ..entry
        }
    } else {
        entry
    };
    pool.logger().event(&entry);
    outcome
}

/// Make the calling process the leader of a new session with no
/// controlling terminal. Fails if it already leads a process group.
#[cfg(unix)]
pub fn start_session() -> Result<()> {
    nix::unistd::setsid().map(drop).map_err(|errno| MresError::Detach {
        details: format!("cannot start a new session: {errno}"),
    })
}

#[cfg(not(unix))]
pub fn start_session() -> Result<()> {
    Ok(())
}
