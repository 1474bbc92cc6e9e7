//! Resource file storage: the record format and the whole-file lock.

pub mod lock;
pub mod record;
