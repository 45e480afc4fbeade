//! Conversions between the in-memory metadata model and fuser types.
use std::time::SystemTime;

use fuser::{FileAttr, FileType, INodeNo, TimeOrNow};

use crate::fs::ops::Attributes;
use crate::fs::record::Timestamp;

pub const BLOCK_SIZE: u32 = 512;

/// Convert [`Attributes`] to the attribute block handed to the kernel.
pub fn to_file_attr(attr: &Attributes) -> FileAttr {
    FileAttr {
        ino: INodeNo(attr.ino),
        size: attr.size,
        blocks: attr.size.div_ceil(BLOCK_SIZE as u64),
        atime: SystemTime::from(attr.accessed_at),
        mtime: SystemTime::from(attr.modified_at),
        ctime: SystemTime::from(attr.created_at),
        crtime: SystemTime::from(attr.created_at),
        kind: mode_to_filetype(attr.mode),
        perm: (attr.mode & 0o7777) as u16,
        nlink: attr.link_count,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

pub fn mode_to_filetype(mode: u32) -> FileType {
    let fmt = mode & (libc::S_IFMT as u32);
    match fmt {
        x if x == libc::S_IFREG as u32 => FileType::RegularFile,
        x if x == libc::S_IFDIR as u32 => FileType::Directory,
        x if x == libc::S_IFLNK as u32 => FileType::Symlink,
        x if x == libc::S_IFBLK as u32 => FileType::BlockDevice,
        x if x == libc::S_IFCHR as u32 => FileType::CharDevice,
        x if x == libc::S_IFIFO as u32 => FileType::NamedPipe,
        x if x == libc::S_IFSOCK as u32 => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

/// Resolve a setattr time argument, falling back to `current` when the
/// kernel left it unset.
pub fn resolve_time(t: Option<TimeOrNow>, current: Timestamp) -> Timestamp {
    match t {
        Some(TimeOrNow::SpecificTime(st)) => Timestamp::from(st),
        Some(TimeOrNow::Now) => Timestamp::now(),
        None => current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(mode: u32, size: u64) -> Attributes {
        Attributes {
            ino: 7,
            mode,
            size,
            link_count: 3,
            uid: 1,
            gid: 2,
            rdev: 0,
            created_at: Timestamp::new(100, 0),
            modified_at: Timestamp::new(200, 5),
            accessed_at: Timestamp::new(300, 0),
        }
    }

    #[test]
    fn file_attr_mirrors_metadata() {
        let fa = to_file_attr(&attrs(libc::S_IFREG as u32 | 0o640, 1025));
        assert_eq!(fa.ino, INodeNo(7));
        assert_eq!(fa.kind, FileType::RegularFile);
        assert_eq!(fa.perm, 0o640);
        assert_eq!(fa.nlink, 3);
        assert_eq!(fa.blocks, 3);
        assert_eq!(Timestamp::from(fa.mtime), Timestamp::new(200, 5));
    }

    #[test]
    fn directory_mode_maps_to_directory() {
        let fa = to_file_attr(&attrs(libc::S_IFDIR as u32 | 0o755, 0));
        assert_eq!(fa.kind, FileType::Directory);
        assert_eq!(mode_to_filetype(0o644), FileType::RegularFile);
    }

    #[test]
    fn unset_time_keeps_current() {
        let current = Timestamp::new(42, 0);
        assert_eq!(resolve_time(None, current), current);
        let specific = Timestamp::new(7, 9);
        assert_eq!(
            resolve_time(Some(TimeOrNow::SpecificTime(SystemTime::from(specific))), current),
            specific
        );
    }
}
