#![forbid(unsafe_code)]

//! mresource: hand out and take back resource keys through a shared text file.
//!
//! A resource file holds one record per line: a status byte (`' '` free,
//! `'!'` reserved) followed by the key. Cooperating processes on one host, or
//! on hosts sharing the file, coordinate through it:
//! 1. **Obtain**: reserve the first free record, polling until one turns up
//! 2. **Release**: mark a reserved key free again, now or after a delay
//! 3. **Lifecycle**: create a fresh file or append keys to a live one
//!
//! Every mutation is a read-modify-write cycle under a whole-file exclusive
//! lock, so two processes never receive the same key.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use mresource::prelude::*;
//! use std::time::Duration;
//!
//! # fn demo() -> mresource::core::errors::Result<()> {
//! let pool = ResourceFile::new("/tmp/ports");
//! pool.create(&["8000".to_string(), "8001".to_string()])?;
//! let policy = PollPolicy::new(Duration::from_secs(2), Some(Duration::from_secs(10)))?;
//! let port = pool.obtain_one(&policy)?.key;
//! pool.release_now(&[port])?.into_result()?;
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod logger;
pub mod pool;
pub mod store;
