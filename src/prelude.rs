//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use mresource::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{ExitReason, MresError, Result};

// Store
pub use crate::store::lock::with_exclusive_lock;
pub use crate::store::record::{Record, Status};

// Pool
pub use crate::pool::ResourceFile;
pub use crate::pool::allocator::{ObtainReport, Obtained, PollPolicy, ReleaseOutcome, ReleaseReport};
pub use crate::pool::inventory::{Inventory, InventoryEntry};

// Deferred release
pub use crate::daemon::detach::{DeferredRelease, ProcessLauncher, ReleaseScheduler};

// Logging
pub use crate::logger::Logger;
pub use crate::logger::jsonl::ActivityLog;
