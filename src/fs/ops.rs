//! Path-based filesystem operations over an [`InodeTable`].
//!
//! [`MemoryFs`] is the whole filesystem state plus one method per callback.
//! It does no locking of its own; callers serving concurrent requests hold
//! one lock around it for the full duration of each call.

use tracing::debug;

use crate::error::{FsError, Result};
use crate::fs::inodes::{self, InodeId, InodeTable, ROOT_INO};
use crate::fs::record::{InodeRecord, Timestamp};
use crate::observer::{StateObserver, TableSnapshot};

/// Files larger than this are refused rather than allocated.
pub const MAX_FILE_SIZE: u64 = 1 << 32;

/// Identity reported as the owner of every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    /// The identity of this process.
    pub fn current() -> Self {
        Self {
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
        }
    }
}

/// Metadata as reported to callers: a copy of the stored record plus the
/// filesystem owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes {
    pub ino: u64,
    pub mode: u32,
    pub size: u64,
    pub link_count: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u32,
    pub created_at: Timestamp,
    pub modified_at: Timestamp,
    pub accessed_at: Timestamp,
}

impl Attributes {
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }
}

/// One line of a directory listing. `.` and `..` carry no attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub attr: Option<Attributes>,
}

pub struct MemoryFs {
    table: InodeTable,
    owner: Owner,
    observer: Option<Box<dyn StateObserver>>,
}

impl MemoryFs {
    pub fn new(owner: Owner) -> Self {
        Self {
            table: InodeTable::new(),
            owner,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn StateObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn set_observer(&mut self, observer: Option<Box<dyn StateObserver>>) {
        self.observer = observer;
    }

    pub fn table(&self) -> &InodeTable {
        &self.table
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// Hand the current state to the observer, if it wants one.
    fn publish(&self) {
        if let Some(observer) = self.observer.as_deref().filter(|o| o.wants_snapshot()) {
            observer.observe(TableSnapshot::capture(&self.table));
        }
    }

    /// Absolute, and no trailing slash except for the root itself.
    fn check_path(path: &str) -> Result<()> {
        if path.starts_with('/') && (path == "/" || !path.ends_with('/')) {
            Ok(())
        } else {
            Err(FsError::InvalidPath(path.to_string()))
        }
    }

    fn attributes(&self, id: InodeId, rec: &InodeRecord) -> Attributes {
        Attributes {
            ino: id.0,
            mode: rec.mode,
            size: rec.size,
            link_count: rec.link_count,
            uid: self.owner.uid,
            gid: self.owner.gid,
            rdev: rec.rdev,
            created_at: rec.created_at,
            modified_at: rec.modified_at,
            accessed_at: rec.accessed_at,
        }
    }

    fn root_attributes(&self) -> Attributes {
        Attributes {
            ino: ROOT_INO,
            mode: libc::S_IFDIR as u32 | 0o755,
            size: 0,
            link_count: 2,
            uid: self.owner.uid,
            gid: self.owner.gid,
            rdev: 0,
            created_at: Timestamp::EPOCH,
            modified_at: Timestamp::EPOCH,
            accessed_at: Timestamp::EPOCH,
        }
    }

    /// Path for an inode number. Hard-linked records answer with their
    /// oldest surviving path.
    pub fn path_for_ino(&self, ino: u64) -> Result<String> {
        if ino == ROOT_INO {
            return Ok("/".to_string());
        }
        self.table
            .path_of(InodeId(ino))
            .map(str::to_string)
            .ok_or_else(|| FsError::NotFound(format!("inode {}", ino)))
    }

    /// Install a regular file with the given content, replacing whatever
    /// `path` held.
    pub fn seed(&mut self, path: &str, content: &[u8], mode: u32) -> Result<InodeId> {
        Self::check_path(path)?;
        let now = Timestamp::now();
        let mut rec = InodeRecord::node(libc::S_IFREG as u32 | (mode & 0o7777), 0);
        rec.set_content(content.to_vec());
        rec.modified_at = now;
        rec.accessed_at = now;
        let id = self.table.put(path, rec);
        self.publish();
        Ok(id)
    }

    /// attribute-query
    pub fn getattr(&self, path: &str) -> Result<Attributes> {
        if path == "/" {
            return Ok(self.root_attributes());
        }
        let id = self.table.resolve(path)?;
        let rec = self.table.get(path)?;
        Ok(self.attributes(id, rec))
    }

    /// directory-list: `.`, `..`, then the direct children of `path`.
    pub fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        if path != "/" && !self.table.get(path)?.is_dir() {
            return Err(FsError::NotADirectory(path.to_string()));
        }
        let mut entries = vec![
            DirEntry {
                name: ".".to_string(),
                attr: None,
            },
            DirEntry {
                name: "..".to_string(),
                attr: None,
            },
        ];

        let dir = path.trim_end_matches('/');
        let prefix = format!("{}/", dir);
        let child_depth = inodes::depth(path) + 1;

        for candidate in self.table.paths() {
            if candidate == path
                || !candidate.starts_with(&prefix)
                || inodes::depth(candidate) != child_depth
            {
                continue;
            }
            let id = self.table.resolve(candidate)?;
            let rec = self.table.get(candidate)?;
            entries.push(DirEntry {
                name: inodes::file_name(candidate).to_string(),
                attr: Some(self.attributes(id, rec)),
            });
        }
        Ok(entries)
    }

    /// create-node
    pub fn create_node(&mut self, path: &str, mode: u32, rdev: u32) -> Result<InodeId> {
        Self::check_path(path)?;
        if path == "/" || self.table.contains(path) {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        let id = self.table.put(path, InodeRecord::node(mode, rdev));
        debug!("created node {} as inode {}", path, id.0);
        self.publish();
        Ok(id)
    }

    /// make-directory. The parent gains a link unless it is the root.
    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<InodeId> {
        Self::check_path(path)?;
        if path == "/" || self.table.contains(path) {
            return Err(FsError::AlreadyExists(path.to_string()));
        }
        let parent = inodes::parent_of(path);
        if parent != "/" {
            let parent_rec = self.table.get_mut(parent)?;
            if !parent_rec.is_dir() {
                return Err(FsError::NotADirectory(parent.to_string()));
            }
            parent_rec.link_count += 1;
        }
        let id = self.table.put(path, InodeRecord::directory(mode));
        debug!("created directory {} as inode {}", path, id.0);
        self.publish();
        Ok(id)
    }

    /// Existence check; the file is not otherwise touched.
    pub fn open(&self, path: &str) -> Result<()> {
        if path == "/" || self.table.contains(path) {
            Ok(())
        } else {
            Err(FsError::NotFound(path.to_string()))
        }
    }

    /// Copy up to `buf.len()` bytes starting at `offset` into `buf`.
    /// Returns the number of bytes copied, 0 at or past the end.
    pub fn read(&mut self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
        let rec = self.table.get_mut(path)?;
        let content = rec.content();
        let n = match usize::try_from(offset) {
            Ok(start) if start < content.len() => {
                let n = buf.len().min(content.len() - start);
                buf[..n].copy_from_slice(&content[start..start + n]);
                n
            }
            _ => 0,
        };
        rec.accessed_at = Timestamp::now();
        self.publish();
        Ok(n)
    }

    /// Write `data` at `offset`. The new content is exactly
    /// `offset + data.len()` bytes long: bytes before `offset` are kept
    /// (zero-filled where the old content was shorter) and anything after
    /// the written range is discarded.
    pub fn write(&mut self, path: &str, data: &[u8], offset: u64) -> Result<usize> {
        let start = offset
            .checked_add(data.len() as u64)
            .filter(|len| *len <= MAX_FILE_SIZE)
            .and_then(|_| usize::try_from(offset).ok())
            .ok_or_else(|| FsError::TooLarge(path.to_string()))?;
        let rec = self.table.get_mut(path)?;
        rec.write_at(start, data);
        rec.modified_at = Timestamp::now();
        self.publish();
        Ok(data.len())
    }

    /// Bind `new_path` to the record behind `old_path`.
    pub fn link(&mut self, old_path: &str, new_path: &str) -> Result<InodeId> {
        Self::check_path(new_path)?;
        let id = self.table.resolve(old_path)?;
        if new_path == "/" || self.table.contains(new_path) {
            return Err(FsError::AlreadyExists(new_path.to_string()));
        }
        self.table.get_mut(old_path)?.link_count += 1;
        self.table.put_link(new_path, id)?;
        debug!("linked {} -> inode {} ({} paths)", new_path, id.0, self.table.refs(id));
        self.publish();
        Ok(id)
    }

    /// Drop `path`. The record survives while other paths still refer to it.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let rec = self.table.get_mut(path)?;
        rec.link_count = rec.link_count.saturating_sub(1);
        let id = self.table.remove(path)?;
        debug!("unlinked {} (inode {} has {} paths left)", path, id.0, self.table.refs(id));
        self.publish();
        Ok(())
    }

    /// update-timestamps
    pub fn utimens(&mut self, path: &str, accessed: Timestamp, modified: Timestamp) -> Result<()> {
        let rec = self.table.get_mut(path)?;
        rec.accessed_at = accessed;
        rec.modified_at = modified;
        self.publish();
        Ok(())
    }

    // The operations below are accepted and ignored. They do not implement
    // POSIX semantics: truncate keeps the content, rename keeps the old
    // path, rmdir keeps the directory.

    pub fn truncate(&mut self, path: &str, size: u64) -> Result<()> {
        debug!("truncate({}, {}) ignored", path, size);
        Ok(())
    }

    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        debug!("rename({}, {}) ignored", old_path, new_path);
        Ok(())
    }

    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        debug!("rmdir({}) ignored", path);
        Ok(())
    }

    pub fn release(&mut self, _path: &str) -> Result<()> {
        Ok(())
    }

    pub fn flush(&mut self, _path: &str) -> Result<()> {
        Ok(())
    }

    pub fn fsync(&mut self, _path: &str, _datasync: bool) -> Result<()> {
        Ok(())
    }

    pub fn lock(&mut self, _path: &str) -> Result<()> {
        Ok(())
    }

    pub fn setxattr(&mut self, _path: &str, _name: &str, _value: &[u8]) -> Result<()> {
        Ok(())
    }

    pub fn getxattr(&self, _path: &str, _name: &str) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    pub fn listxattr(&self, _path: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    pub fn removexattr(&mut self, _path: &str, _name: &str) -> Result<()> {
        Ok(())
    }
}
