//! Read-only view of a resource file, taken under a shared lock so no record
//! is observed half-flipped.

#![allow(missing_docs)]

use serde::Serialize;

use crate::core::errors::Result;
use crate::pool::ResourceFile;
use crate::store::lock::with_shared_lock;
use crate::store::record::{RecordScanner, Status};

/// One line of the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryEntry {
    pub line: usize,
    /// `None` for a malformed line.
    pub status: Option<&'static str>,
    pub key: Option<String>,
    /// Why the line was not readable as a record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}

/// Snapshot of every line of a resource file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub entries: Vec<InventoryEntry>,
    pub free: usize,
    pub reserved: usize,
    pub malformed: usize,
}

impl ResourceFile {
    /// Consistent snapshot of all records.
    pub fn inventory(&self) -> Result<Inventory> {
        let file = self.open_read()?;
        let buf = with_shared_lock(file, self.path(), |f| self.read_all(f))?;

        let mut inventory = Inventory::default();
        for scanned in RecordScanner::new(&buf, self.max_key_len()) {
            let entry = match scanned.record {
                Ok(record) => {
                    match record.status {
                        Status::Free => inventory.free += 1,
                        Status::Reserved => inventory.reserved += 1,
                    }
                    InventoryEntry {
                        line: scanned.line_no,
                        status: Some(record.status.as_str()),
                        key: Some(record.key),
                        problem: None,
                    }
                }
                Err(problem) => {
                    inventory.malformed += 1;
                    self.logger().warn(format_args!(
                        "line {} of '{}' is not a record: {problem}",
                        scanned.line_no,
                        self.path().display()
                    ));
                    InventoryEntry {
                        line: scanned.line_no,
                        status: None,
                        key: None,
                        problem: Some(problem.to_string()),
                    }
                }
            };
            inventory.entries.push(entry);
        }
        Ok(inventory)
    }
}
