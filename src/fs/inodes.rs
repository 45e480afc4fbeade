use std::collections::{BTreeMap, HashMap};

use crate::error::{FsError, Result};
use crate::fs::record::InodeRecord;

/// Inode number of the mount root. The root is synthesized and never stored.
pub const ROOT_INO: u64 = 1;

/// Index of a record in the arena. Doubles as the inode number reported to
/// the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InodeId(pub u64);

struct Slot {
    record: InodeRecord,
    /// Number of paths currently bound to this slot.
    refs: usize,
}

/// Path-keyed table of inode records.
///
/// Records live in an arena; paths hold ids into it. Two paths bound to the
/// same id are hard links and see each other's mutations. A record is
/// dropped from the arena when the last path bound to it is removed.
pub struct InodeTable {
    arena: HashMap<InodeId, Slot>,
    by_path: HashMap<String, (u64, InodeId)>,
    /// Insertion sequence -> path, for ordered enumeration.
    order: BTreeMap<u64, String>,
    next_id: u64,
    next_seq: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        Self {
            arena: HashMap::new(),
            by_path: HashMap::new(),
            order: BTreeMap::new(),
            next_id: ROOT_INO + 1,
            next_seq: 0,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn resolve(&self, path: &str) -> Result<InodeId> {
        self.by_path
            .get(path)
            .map(|(_, id)| *id)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    pub fn get(&self, path: &str) -> Result<&InodeRecord> {
        let id = self.resolve(path)?;
        self.record(id).ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    /// Mutable access to the record behind `path`. Hard-linked paths share
    /// the record, so the change is visible through all of them.
    pub fn get_mut(&mut self, path: &str) -> Result<&mut InodeRecord> {
        let id = self.resolve(path)?;
        self.arena
            .get_mut(&id)
            .map(|slot| &mut slot.record)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    pub fn record(&self, id: InodeId) -> Option<&InodeRecord> {
        self.arena.get(&id).map(|slot| &slot.record)
    }

    /// Bind `path` to a newly allocated record. Any record previously bound
    /// to `path` loses that reference.
    pub fn put(&mut self, path: &str, record: InodeRecord) -> InodeId {
        let id = InodeId(self.next_id);
        self.next_id += 1;
        self.arena.insert(id, Slot { record, refs: 0 });
        self.bind(path, id);
        id
    }

    /// Bind `path` to an existing record (hard link).
    pub fn put_link(&mut self, path: &str, id: InodeId) -> Result<()> {
        if !self.arena.contains_key(&id) {
            return Err(FsError::NotFound(format!("inode {}", id.0)));
        }
        self.bind(path, id);
        Ok(())
    }

    fn bind(&mut self, path: &str, id: InodeId) {
        if self.by_path.get(path).is_some_and(|(_, bound)| *bound == id) {
            return;
        }
        self.unbind(path);
        if let Some(slot) = self.arena.get_mut(&id) {
            slot.refs += 1;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, path.to_string());
        self.by_path.insert(path.to_string(), (seq, id));
    }

    fn unbind(&mut self, path: &str) -> Option<InodeId> {
        let (seq, id) = self.by_path.remove(path)?;
        self.order.remove(&seq);
        let orphaned = match self.arena.get_mut(&id) {
            Some(slot) => {
                slot.refs = slot.refs.saturating_sub(1);
                slot.refs == 0
            }
            None => false,
        };
        if orphaned {
            self.arena.remove(&id);
        }
        Some(id)
    }

    /// Drop the mapping for exactly `path`.
    pub fn remove(&mut self, path: &str) -> Result<InodeId> {
        self.unbind(path)
            .ok_or_else(|| FsError::NotFound(path.to_string()))
    }

    /// All known paths in insertion order. The iterator borrows the table
    /// and can be cloned to restart.
    pub fn paths(&self) -> impl Iterator<Item = &str> + Clone + '_ {
        self.order.values().map(String::as_str)
    }

    /// First path (in insertion order) bound to `id`.
    pub fn path_of(&self, id: InodeId) -> Option<&str> {
        self.order
            .values()
            .find(|p| self.by_path.get(p.as_str()).is_some_and(|(_, i)| *i == id))
            .map(String::as_str)
    }

    /// Number of path entries.
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    /// Number of live records in the arena.
    pub fn record_count(&self) -> usize {
        self.arena.len()
    }

    /// Number of paths bound to `id`.
    pub fn refs(&self, id: InodeId) -> usize {
        self.arena.get(&id).map_or(0, |slot| slot.refs)
    }
}

/// Number of non-empty segments in an absolute path; `/` is 0.
pub fn depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

/// Parent of an absolute path. The parent of a top-level entry is `/`.
pub fn parent_of(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// Trailing segment of an absolute path.
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(i) => &trimmed[i + 1..],
        None => trimmed,
    }
}

pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file() -> InodeRecord {
        InodeRecord::node(libc::S_IFREG as u32 | 0o644, 0)
    }

    #[test]
    fn put_get_remove() {
        let mut table = InodeTable::new();
        assert!(!table.contains("/a"));
        table.put("/a", file());
        assert!(table.contains("/a"));
        assert_eq!(table.get("/a").unwrap().link_count, 1);

        table.remove("/a").unwrap();
        assert!(!table.contains("/a"));
        assert!(matches!(table.get("/a"), Err(FsError::NotFound(_))));
        assert!(matches!(table.remove("/a"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn ids_start_after_root_and_are_not_reused() {
        let mut table = InodeTable::new();
        let a = table.put("/a", file());
        assert_eq!(a, InodeId(ROOT_INO + 1));
        table.remove("/a").unwrap();
        let b = table.put("/b", file());
        assert_ne!(a, b);
    }

    #[test]
    fn linked_paths_share_one_record() {
        let mut table = InodeTable::new();
        let id = table.put("/a", file());
        table.put_link("/b", id).unwrap();
        assert_eq!(table.refs(id), 2);
        assert_eq!(table.record_count(), 1);

        table.get_mut("/b").unwrap().set_content(b"shared".to_vec());
        assert_eq!(table.get("/a").unwrap().content(), b"shared");

        table.remove("/a").unwrap();
        assert_eq!(table.refs(id), 1);
        assert_eq!(table.get("/b").unwrap().content(), b"shared");

        table.remove("/b").unwrap();
        assert_eq!(table.record_count(), 0);
        assert!(table.record(id).is_none());
    }

    #[test]
    fn replacing_a_path_releases_the_old_record() {
        let mut table = InodeTable::new();
        let old = table.put("/a", file());
        let new = table.put("/a", file());
        assert_ne!(old, new);
        assert!(table.record(old).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn paths_follow_insertion_order_and_restart() {
        let mut table = InodeTable::new();
        table.put("/c", file());
        table.put("/a", file());
        table.put("/b", file());
        table.remove("/a").unwrap();
        table.put("/a", file());

        let paths = table.paths();
        let first: Vec<&str> = paths.clone().collect();
        let second: Vec<&str> = paths.collect();
        assert_eq!(first, vec!["/c", "/b", "/a"]);
        assert_eq!(first, second);
    }

    #[test]
    fn path_of_finds_first_binding() {
        let mut table = InodeTable::new();
        let id = table.put("/x", file());
        table.put_link("/y", id).unwrap();
        assert_eq!(table.path_of(id), Some("/x"));
        table.remove("/x").unwrap();
        assert_eq!(table.path_of(id), Some("/y"));
    }

    #[test]
    fn path_helpers() {
        assert_eq!(depth("/"), 0);
        assert_eq!(depth("/a"), 1);
        assert_eq!(depth("/a/b"), 2);
        assert_eq!(parent_of("/a"), "/");
        assert_eq!(parent_of("/a/b"), "/a");
        assert_eq!(parent_of("/a/b/c"), "/a/b");
        assert_eq!(file_name("/a/b"), "b");
        assert_eq!(file_name("/a"), "a");
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }
}
