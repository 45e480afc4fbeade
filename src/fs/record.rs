use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// A point in time with independent second and nanosecond parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp { secs: 0, nanos: 0 };

    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    pub fn new(secs: i64, nanos: u32) -> Self {
        Self {
            secs,
            nanos: nanos.min(999_999_999),
        }
    }
}

impl From<SystemTime> for Timestamp {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Timestamp::new(d.as_secs() as i64, d.subsec_nanos()),
            Err(e) => {
                // Before 1970: round towards negative infinity.
                let d = e.duration();
                if d.subsec_nanos() == 0 {
                    Timestamp::new(-(d.as_secs() as i64), 0)
                } else {
                    Timestamp::new(-(d.as_secs() as i64) - 1, 1_000_000_000 - d.subsec_nanos())
                }
            }
        }
    }
}

impl From<Timestamp> for SystemTime {
    fn from(t: Timestamp) -> Self {
        if t.secs >= 0 {
            UNIX_EPOCH + Duration::new(t.secs as u64, t.nanos)
        } else {
            UNIX_EPOCH - Duration::from_secs(t.secs.unsigned_abs()) + Duration::from_nanos(t.nanos as u64)
        }
    }
}

/// Metadata and payload of one file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeRecord {
    /// File type and permission bits, `S_IF*` layout.
    pub mode: u32,
    pub rdev: u32,
    pub size: u64,
    pub link_count: u32,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
    pub accessed_at: Timestamp,
    content: Vec<u8>,
}

impl InodeRecord {
    /// A fresh node as made by mknod: empty, one link, only the creation
    /// time is stamped.
    pub fn node(mode: u32, rdev: u32) -> Self {
        Self {
            mode,
            rdev,
            size: 0,
            link_count: 1,
            created_at: Timestamp::now(),
            modified_at: Timestamp::EPOCH,
            accessed_at: Timestamp::EPOCH,
            content: Vec::new(),
        }
    }

    /// A fresh directory. Starts at two links (its own `.` and the entry in
    /// its parent).
    pub fn directory(mode: u32) -> Self {
        let now = Timestamp::now();
        Self {
            mode: mode | libc::S_IFDIR as u32,
            rdev: 0,
            size: 0,
            link_count: 2,
            created_at: now,
            modified_at: now,
            accessed_at: now,
            content: Vec::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Overwrite from `offset` on: the payload becomes exactly
    /// `offset + data.len()` bytes. Bytes before `offset` are kept,
    /// zero-filled where the payload was shorter.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) {
        self.content.truncate(offset);
        self.content.resize(offset, 0);
        self.content.extend_from_slice(data);
        self.size = self.content.len() as u64;
    }

    /// Replace the payload; `size` follows.
    pub fn set_content(&mut self, content: Vec<u8>) {
        self.size = content.len() as u64;
        self.content = content;
    }
}
