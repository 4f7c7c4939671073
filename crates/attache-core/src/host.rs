//! Host record contract.
//!
//! The attachment layer never talks to a database itself. Anything that can
//! read and write a string column per mounted field can host uploaders; the
//! mount layer calls `write_identifier` after every successful store and
//! `read_identifier` when rehydrating.

use std::collections::HashMap;

/// The two operations the attachment layer needs from a persisted record.
pub trait HostRecord: Send + Sync {
    /// A previously persisted identifier for `column`, if any.
    fn read_identifier(&self, column: &str) -> Option<String>;

    /// Persist (or blank, with `None`) the identifier for `column`.
    fn write_identifier(&mut self, column: &str, identifier: Option<&str>);
}

/// An in-memory host record, for tests and hosts without a database.
#[derive(Debug, Default, Clone)]
pub struct MemoryRecord {
    identifiers: HashMap<String, String>,
}

impl MemoryRecord {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostRecord for MemoryRecord {
    fn read_identifier(&self, column: &str) -> Option<String> {
        self.identifiers.get(column).cloned()
    }

    fn write_identifier(&mut self, column: &str, identifier: Option<&str>) {
        match identifier {
            Some(value) => {
                self.identifiers.insert(column.to_string(), value.to_string());
            }
            None => {
                self.identifiers.remove(column);
            }
        }
    }
}
