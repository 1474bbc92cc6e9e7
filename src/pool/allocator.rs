//! Obtain and release: the first-fit polling allocator.
//!
//! Obtain scans the file from the top under the lock and reserves the first
//! free record. When none is free it drops the lock, sleeps one poll interval
//! and tries again, until the attempt budget derived from the timeout runs
//! out. Several keys are obtained one after another, each with its own
//! budget; a failure part-way leaves the earlier keys reserved.
//!
//! Release flips the first reserved record carrying each key back to free,
//! all keys under one lock acquisition. A delayed release is handed to a
//! [`ReleaseScheduler`] and its outcome is never seen by the caller.

#![allow(missing_docs)]

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::config::Config;
use crate::core::errors::{MresError, Result};
use crate::daemon::detach::{DeferredRelease, ReleaseScheduler};
use crate::logger::jsonl::{EventType, LogEntry, Severity};
use crate::pool::ResourceFile;
use crate::store::lock::with_exclusive_lock;
use crate::store::record::{Status, find_first, validate_keys};

// ──────────────────── poll policy ────────────────────

/// How long and how often obtain polls for a free record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    interval: Duration,
    timeout: Option<Duration>,
}

impl PollPolicy {
    /// `timeout = None` polls until a key turns up.
    pub fn new(interval: Duration, timeout: Option<Duration>) -> Result<Self> {
        if interval.is_zero() {
            return Err(MresError::invalid("poll interval must be non-zero"));
        }
        Ok(Self { interval, timeout })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.poll_interval, config.timeout)
    }

    pub const fn interval(&self) -> Duration {
        self.interval
    }

    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// `ceil(timeout / interval)`, at least one; `None` when unbounded.
    pub fn max_attempts(&self) -> Option<u32> {
        let timeout = self.timeout?.as_nanos();
        let interval = self.interval.as_nanos();
        let attempts = timeout.div_ceil(interval).max(1);
        Some(u32::try_from(attempts).unwrap_or(u32::MAX))
    }

    fn describe_timeout(&self) -> String {
        self.timeout.map_or_else(
            || "no timeout".to_string(),
            |t| format!("a timeout of {} s", t.as_secs_f64()),
        )
    }
}

// ──────────────────── reports ────────────────────

/// One reserved key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Obtained {
    pub key: String,
    /// Attempts spent, including the successful one.
    pub attempts: u32,
}

/// Result of a multi-key obtain. Keys reserved before a failure stay reserved.
#[derive(Debug)]
pub struct ObtainReport {
    pub keys: Vec<String>,
    /// Attempts spent across all keys.
    pub attempts: u32,
    pub error: Option<MresError>,
}

impl ObtainReport {
    pub const fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    /// The keys when every requested key was obtained, else the failure.
    pub fn into_result(self) -> Result<Vec<String>> {
        match self.error {
            None => Ok(self.keys),
            Some(err) => Err(err),
        }
    }
}

/// Per-key outcome of an immediate release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub path: PathBuf,
    pub released: Vec<String>,
    pub missing: Vec<String>,
}

impl ReleaseReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// `NotFound` naming every missing key if any key had no reserved record.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.missing.is_empty() {
            Ok(self.released)
        } else {
            Err(MresError::NotFound {
                path: self.path,
                keys: self.missing,
            })
        }
    }
}

/// What a release call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Every key was flipped back to free.
    Released(Vec<String>),
    /// A detached worker will release after the delay.
    Scheduled { delay: Duration },
}

// ──────────────────── obtain ────────────────────

impl ResourceFile {
    /// One locked first-fit scan. `Ok(None)` when no record is free.
    pub fn try_reserve(&self) -> Result<Option<String>> {
        let file = self.open_rw()?;
        with_exclusive_lock(file, self.path(), |f| {
            let buf = self.read_all(f)?;
            match find_first(&buf, self.max_key_len(), Status::Free, None) {
                Some((offset, key)) => {
                    self.write_flag(f, offset, Status::Reserved)?;
                    Ok(Some(key))
                }
                None => Ok(None),
            }
        })
    }

    /// Reserve one key, polling per `policy`.
    pub fn obtain_one(&self, policy: &PollPolicy) -> Result<Obtained> {
        self.logger().info(format_args!(
            "Obtaining a resource key from file '{}' with {}.",
            self.path().display(),
            policy.describe_timeout()
        ));

        let max_attempts = policy.max_attempts();
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);
            if let Some(key) = self.try_reserve()? {
                self.logger().info(format_args!(
                    "Resource key obtained from file '{}': {key}",
                    self.path().display()
                ));
                self.logger().event(
                    &LogEntry::new(EventType::KeyObtained, Severity::Info)
                        .file(self.path())
                        .keys(&[key.as_str()])
                        .attempts(attempts)
                        .ok(true),
                );
                return Ok(Obtained { key, attempts });
            }

            if max_attempts.is_some_and(|max| attempts >= max) {
                // Report the time-out no earlier than the budget allows.
                if let Some(rest) = policy
                    .timeout()
                    .and_then(|t| t.checked_sub(started.elapsed()))
                {
                    thread::sleep(rest);
                }
                let err = MresError::TimedOut {
                    path: self.path().to_path_buf(),
                    attempts,
                    waited: started.elapsed(),
                };
                self.logger().event(
                    &LogEntry::new(EventType::ObtainTimedOut, Severity::Warning)
                        .file(self.path())
                        .attempts(attempts)
                        .error(&err),
                );
                return Err(err);
            }

            thread::sleep(policy.interval());
        }
    }

    /// Reserve `count` keys one after another.
    ///
    /// `on_key` sees each key as soon as it is reserved. There is no rollback:
    /// when key *i* fails, keys before it remain reserved and are listed in
    /// the report next to the error. When `on_key` breaks, no further key is
    /// reserved; the report then holds fewer than `count` keys and no error,
    /// and the reason is the caller's to report.
    pub fn obtain<F>(&self, count: usize, policy: &PollPolicy, mut on_key: F) -> ObtainReport
    where
        F: FnMut(&str) -> ControlFlow<()>,
    {
        let mut report = ObtainReport {
            keys: Vec::new(),
            attempts: 0,
            error: None,
        };

        if count == 0 {
            report.error = Some(MresError::invalid("number of keys must be at least 1"));
            return report;
        }

        for _ in 0..count {
            match self.obtain_one(policy) {
                Ok(obtained) => {
                    report.attempts = report.attempts.saturating_add(obtained.attempts);
                    let flow = on_key(&obtained.key);
                    report.keys.push(obtained.key);
                    if flow.is_break() {
                        break;
                    }
                }
                Err(err) => {
                    if let MresError::TimedOut { attempts, .. } = &err {
                        report.attempts = report.attempts.saturating_add(*attempts);
                    }
                    report.error = Some(err);
                    break;
                }
            }
        }
        report
    }

    // ──────────────────── release ────────────────────

    /// Flip each key's first reserved record back to free, under one lock.
    ///
    /// Missing keys do not stop the others; they are listed in the report.
    /// Naming a key twice releases two reserved records with that key.
    pub fn release_now(&self, keys: &[String]) -> Result<ReleaseReport> {
        validate_keys(keys, self.max_key_len())?;
        self.logger().info(format_args!(
            "Releasing the following resource key(s) from file '{}': {}",
            self.path().display(),
            keys.join(" ")
        ));

        let file = self.open_rw()?;
        let report = with_exclusive_lock(file, self.path(), |f| {
            let mut buf = self.read_all(f)?;
            let mut report = ReleaseReport {
                path: self.path().to_path_buf(),
                ..ReleaseReport::default()
            };

            for key in keys {
                match find_first(&buf, self.max_key_len(), Status::Reserved, Some(key)) {
                    Some((offset, _)) => {
                        self.write_flag(f, offset, Status::Free)?;
                        if let Some(flag) = usize::try_from(offset).ok().and_then(|i| buf.get_mut(i)) {
                            *flag = Status::Free.flag();
                        }
                        report.released.push(key.clone());
                    }
                    None => report.missing.push(key.clone()),
                }
            }
            Ok(report)
        })?;

        for key in &report.released {
            self.logger().info(format_args!(
                "Resource key {key} made available again in file '{}'.",
                self.path().display()
            ));
        }
        if !report.released.is_empty() {
            self.logger().event(
                &LogEntry::new(EventType::KeysReleased, Severity::Info)
                    .file(self.path())
                    .keys(&report.released)
                    .ok(true),
            );
        }
        if !report.missing.is_empty() {
            self.logger().warn(format_args!(
                "No reserved record for key(s) {} in file '{}'.",
                report.missing.join(" "),
                self.path().display()
            ));
            self.logger().event(
                &LogEntry::new(EventType::ReleaseMissing, Severity::Warning)
                    .file(self.path())
                    .keys(&report.missing)
                    .ok(false),
            );
        }
        Ok(report)
    }

    /// Release `keys`, immediately or after `delay` in a detached worker.
    ///
    /// The file must be openable before anything else happens, so a bad path
    /// fails fast even when a delay is requested. With a delay, success means
    /// the worker was detached; whatever happens to it later is not reported.
    pub fn release(
        &self,
        keys: &[String],
        delay: Duration,
        scheduler: &dyn ReleaseScheduler,
    ) -> Result<ReleaseOutcome> {
        validate_keys(keys, self.max_key_len())?;
        self.check_openable()?;

        if delay.is_zero() {
            return self.release_now(keys)?.into_result().map(ReleaseOutcome::Released);
        }

        let job = DeferredRelease::new(self.path(), keys.to_vec(), delay)?;
        self.logger().info(format_args!(
            "Releasing the following resource key(s) from file '{}' with a delay of {} s: {}",
            self.path().display(),
            delay.as_secs_f64(),
            keys.join(" ")
        ));
        scheduler.schedule(&job)?;
        self.logger().event(
            &LogEntry::new(EventType::ReleaseScheduled, Severity::Info)
                .file(self.path())
                .keys(keys)
                .delay_ms(job.delay_ms())
                .ok(true),
        );
        Ok(ReleaseOutcome::Scheduled { delay })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;

    fn pool_with(dir: &Path, content: &[u8]) -> ResourceFile {
        let path = dir.join("pool");
        fs::write(&path, content).unwrap();
        ResourceFile::new(path)
    }

    fn no_wait() -> PollPolicy {
        PollPolicy::new(Duration::from_millis(10), Some(Duration::ZERO)).unwrap()
    }

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[derive(Default)]
    struct RecordingScheduler {
        jobs: RefCell<Vec<DeferredRelease>>,
    }

    impl ReleaseScheduler for RecordingScheduler {
        fn schedule(&self, job: &DeferredRelease) -> Result<()> {
            self.jobs.borrow_mut().push(job.clone());
            Ok(())
        }
    }

    #[test]
    fn max_attempts_rounds_up() {
        let secs = Duration::from_secs;
        assert_eq!(PollPolicy::new(secs(2), Some(secs(3))).unwrap().max_attempts(), Some(2));
        assert_eq!(PollPolicy::new(secs(2), Some(secs(4))).unwrap().max_attempts(), Some(2));
        assert_eq!(PollPolicy::new(secs(2), Some(secs(5))).unwrap().max_attempts(), Some(3));
        assert_eq!(PollPolicy::new(secs(2), Some(secs(0))).unwrap().max_attempts(), Some(1));
        assert_eq!(PollPolicy::new(secs(2), None).unwrap().max_attempts(), None);
        assert!(PollPolicy::new(Duration::ZERO, None).is_err());
    }

    #[test]
    fn obtain_takes_first_free_record_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), b"!k1\n k2\n!k3\n!k4\n k5\n");

        let got = pool.obtain_one(&no_wait()).unwrap();
        assert_eq!(got.key, "k2");
        assert_eq!(got.attempts, 1);
        assert_eq!(fs::read(pool.path()).unwrap(), b"!k1\n!k2\n!k3\n!k4\n k5\n");

        assert_eq!(pool.obtain_one(&no_wait()).unwrap().key, "k5");
    }

    #[test]
    fn obtain_and_release_round_trip_restores_content() {
        let dir = tempfile::tempdir().unwrap();
        let original = b" alpha\n beta\n gamma\n";
        let pool = pool_with(dir.path(), original);

        for _ in 0..5 {
            let key = pool.obtain_one(&no_wait()).unwrap().key;
            assert_eq!(key, "alpha");
            let report = pool.release_now(&[key]).unwrap();
            assert!(report.is_complete());
            assert_eq!(fs::read(pool.path()).unwrap(), original);
        }
    }

    #[test]
    fn last_line_without_terminator_is_obtainable() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), b"!a\n b");
        assert_eq!(pool.obtain_one(&no_wait()).unwrap().key, "b");
        assert_eq!(fs::read(pool.path()).unwrap(), b"!a\n!b");
    }

    #[test]
    fn corrupt_lines_never_match() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), b"?weird\n\n!taken\n");
        let err = pool.obtain_one(&no_wait()).unwrap_err();
        assert!(matches!(err, MresError::TimedOut { attempts: 1, .. }));
        assert_eq!(fs::read(pool.path()).unwrap(), b"?weird\n\n!taken\n");
    }

    #[test]
    fn missing_file_fails_without_polling() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ResourceFile::new(dir.path().join("absent"));
        let policy = PollPolicy::new(Duration::from_secs(5), None).unwrap();

        let started = Instant::now();
        let err = pool.obtain_one(&policy).unwrap_err();
        assert!(matches!(err, MresError::FileNotOpen { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn timeout_boundary_makes_exact_attempt_count() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), b"!busy\n");
        let policy =
            PollPolicy::new(Duration::from_millis(200), Some(Duration::from_millis(300))).unwrap();

        let started = Instant::now();
        let err = pool.obtain_one(&policy).unwrap_err();
        let elapsed = started.elapsed();

        match err {
            MresError::TimedOut { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("unexpected error: {other}"),
        }
        assert!(elapsed >= Duration::from_millis(300), "gave up early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1500), "overran: {elapsed:?}");
    }

    #[test]
    fn polling_picks_up_a_key_released_meanwhile() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), b"!late\n");
        let releaser = pool.clone();

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            releaser.release_now(&keys(&["late"])).unwrap();
        });

        let policy =
            PollPolicy::new(Duration::from_millis(50), Some(Duration::from_secs(5))).unwrap();
        let got = pool.obtain_one(&policy).unwrap();
        handle.join().unwrap();

        assert_eq!(got.key, "late");
        assert!(got.attempts > 1);
    }

    #[test]
    fn partial_multi_key_obtain_keeps_reserved_keys() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), b"!a\n b\n!c\n");

        let mut seen = Vec::new();
        let report = pool.obtain(3, &no_wait(), |k| {
            seen.push(k.to_string());
            ControlFlow::Continue(())
        });

        assert_eq!(report.keys, vec!["b".to_string()]);
        assert_eq!(seen, report.keys);
        assert!(matches!(report.error, Some(MresError::TimedOut { .. })));
        assert_eq!(fs::read(pool.path()).unwrap(), b"!a\n!b\n!c\n");
    }

    #[test]
    fn multi_key_obtain_returns_distinct_keys() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), b" a\n b\n c\n");
        let got = pool.obtain(2, &no_wait(), |_| ControlFlow::Continue(())).into_result().unwrap();
        assert_eq!(got, keys(&["a", "b"]));
    }

    #[test]
    fn huge_count_obtains_what_is_free_then_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), b" only\n");
        let report = pool.obtain(usize::MAX, &no_wait(), |_| ControlFlow::Continue(()));
        assert_eq!(report.keys, keys(&["only"]));
        assert!(matches!(report.error, Some(MresError::TimedOut { .. })));
    }

    #[test]
    fn breaking_callback_stops_further_reservations() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), b" a\n b\n c\n");
        let report = pool.obtain(3, &no_wait(), |_| ControlFlow::Break(()));
        assert_eq!(report.keys, keys(&["a"]));
        assert!(report.error.is_none());
        assert_eq!(fs::read(pool.path()).unwrap(), b"!a\n b\n c\n");
    }

    #[test]
    fn zero_count_is_an_argument_error() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), b" a\n");
        let report = pool.obtain(0, &no_wait(), |_| ControlFlow::Continue(()));
        assert!(matches!(report.error, Some(MresError::InvalidArgument { .. })));
        assert_eq!(fs::read(pool.path()).unwrap(), b" a\n");
    }

    #[test]
    fn release_continues_past_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), b"!a\n b\n!c\n");

        let report = pool.release_now(&keys(&["a", "b", "zz", "c"])).unwrap();
        assert_eq!(report.released, keys(&["a", "c"]));
        assert_eq!(report.missing, keys(&["b", "zz"]));
        assert_eq!(fs::read(pool.path()).unwrap(), b" a\n b\n c\n");

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, MresError::NotFound { ref keys, .. } if keys.len() == 2));
    }

    #[test]
    fn release_matches_duplicates_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), b" dup\n!dup\n!dup\n");

        pool.release_now(&keys(&["dup"])).unwrap();
        assert_eq!(fs::read(pool.path()).unwrap(), b" dup\n dup\n!dup\n");

        let report = pool.release_now(&keys(&["dup", "dup"])).unwrap();
        assert_eq!(report.released, keys(&["dup"]));
        assert_eq!(report.missing, keys(&["dup"]));
        assert_eq!(fs::read(pool.path()).unwrap(), b" dup\n dup\n dup\n");
    }

    #[test]
    fn release_without_delay_is_immediate() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), b"!a\n");
        let scheduler = RecordingScheduler::default();

        let outcome = pool.release(&keys(&["a"]), Duration::ZERO, &scheduler).unwrap();
        assert_eq!(outcome, ReleaseOutcome::Released(keys(&["a"])));
        assert!(scheduler.jobs.borrow().is_empty());
        assert_eq!(fs::read(pool.path()).unwrap(), b" a\n");
    }

    #[test]
    fn delayed_release_is_handed_to_scheduler() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), b"!a\n");
        let scheduler = RecordingScheduler::default();

        let outcome = pool
            .release(&keys(&["a"]), Duration::from_secs(3), &scheduler)
            .unwrap();
        assert_eq!(outcome, ReleaseOutcome::Scheduled { delay: Duration::from_secs(3) });

        let jobs = scheduler.jobs.borrow();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].keys, keys(&["a"]));
        assert!(jobs[0].file.is_absolute());
        // Nothing released yet.
        assert_eq!(fs::read(pool.path()).unwrap(), b"!a\n");
    }

    #[test]
    fn delayed_release_checks_file_before_scheduling() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ResourceFile::new(dir.path().join("absent"));
        let scheduler = RecordingScheduler::default();

        let err = pool
            .release(&keys(&["a"]), Duration::from_secs(3), &scheduler)
            .unwrap_err();
        assert!(matches!(err, MresError::FileNotOpen { .. }));
        assert!(scheduler.jobs.borrow().is_empty());
    }

    #[test]
    fn delay_too_long_to_hand_over_is_an_argument_error() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_with(dir.path(), b"!a\n");
        let scheduler = RecordingScheduler::default();

        let err = pool
            .release(&keys(&["a"]), Duration::from_secs(u64::MAX), &scheduler)
            .unwrap_err();
        assert!(matches!(err, MresError::InvalidArgument { .. }));
        assert!(scheduler.jobs.borrow().is_empty());
        assert_eq!(fs::read(pool.path()).unwrap(), b"!a\n");
    }
}
