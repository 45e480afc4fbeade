//! Passive sinks that receive the table's contents after each change.
//!
//! Observers are for display only. A failing or slow observer must never
//! fail or stall the filesystem call that produced the snapshot.

pub mod socket;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, Level};

use crate::fs::inodes::InodeTable;
use crate::fs::record::Timestamp;

pub use self::socket::SocketObserver;

/// One path of the table as seen by an observer.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotEntry {
    pub path: String,
    pub ino: u64,
    pub mode: u32,
    pub size: u64,
    pub link_count: u32,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
    pub accessed_at: Timestamp,
    /// Content decoded as UTF-8, lossy.
    pub content: String,
}

/// Read-only copy of the full path -> (metadata, content) mapping.
#[derive(Debug, Clone, Serialize)]
pub struct TableSnapshot {
    pub taken_at: String,
    pub entries: Vec<SnapshotEntry>,
}

impl TableSnapshot {
    pub fn capture(table: &InodeTable) -> Self {
        let entries = table
            .paths()
            .filter_map(|path| {
                let id = table.resolve(path).ok()?;
                let rec = table.record(id)?;
                Some(SnapshotEntry {
                    path: path.to_string(),
                    ino: id.0,
                    mode: rec.mode,
                    size: rec.size,
                    link_count: rec.link_count,
                    created_at: rec.created_at,
                    modified_at: rec.modified_at,
                    accessed_at: rec.accessed_at,
                    content: String::from_utf8_lossy(rec.content()).into_owned(),
                })
            })
            .collect();
        Self {
            taken_at: Utc::now().to_rfc3339(),
            entries,
        }
    }

    pub fn entry(&self, path: &str) -> Option<&SnapshotEntry> {
        self.entries.iter().find(|e| e.path == path)
    }
}

pub trait StateObserver: Send + Sync {
    /// Whether a snapshot should be captured at all. Capturing copies every
    /// record, so observers with nothing to do should say no.
    fn wants_snapshot(&self) -> bool {
        true
    }

    /// Receive a snapshot. Must return promptly.
    fn observe(&self, snapshot: TableSnapshot);
}

/// Writes a one-line summary of every snapshot to the debug log.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl StateObserver for TracingObserver {
    fn wants_snapshot(&self) -> bool {
        tracing::enabled!(Level::DEBUG)
    }

    fn observe(&self, snapshot: TableSnapshot) {
        let bytes: u64 = snapshot.entries.iter().map(|e| e.size).sum();
        debug!(
            "table snapshot at {}: {} paths, {} bytes",
            snapshot.taken_at,
            snapshot.entries.len(),
            bytes
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::record::InodeRecord;

    #[test]
    fn capture_lists_paths_in_order_with_content() {
        let mut table = InodeTable::new();
        let mut rec = InodeRecord::node(libc::S_IFREG as u32 | 0o644, 0);
        rec.set_content(b"hi".to_vec());
        let id = table.put("/f", rec);
        table.put("/d", InodeRecord::directory(0o755));
        table.put_link("/g", id).unwrap();

        let snap = TableSnapshot::capture(&table);
        let paths: Vec<&str> = snap.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/f", "/d", "/g"]);
        assert_eq!(snap.entry("/g").unwrap().content, "hi");
        assert_eq!(snap.entry("/g").unwrap().ino, snap.entry("/f").unwrap().ino);
        assert!(chrono::DateTime::parse_from_rfc3339(&snap.taken_at).is_ok());
    }

    #[test]
    fn tracing_observer_declines_without_debug_logging() {
        // No subscriber is installed in unit tests.
        assert!(!TracingObserver.wants_snapshot());
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let mut table = InodeTable::new();
        table.put("/d", InodeRecord::directory(0o700));
        let json = serde_json::to_value(TableSnapshot::capture(&table)).unwrap();
        assert_eq!(json["entries"][0]["path"], "/d");
        assert_eq!(json["entries"][0]["link_count"], 2);
        assert!(json["entries"][0]["created_at"]["secs"].is_i64());
    }
}
