pub mod attr;
pub mod inodes;
pub mod ops;
pub mod record;

use std::ffi::OsStr;
use std::time::{Duration, SystemTime};

use fuser::{
    AccessFlags, BsdFileFlags, Errno, FileHandle, FileType, Filesystem, FopenFlags, Generation,
    INodeNo, KernelConfig, LockOwner, OpenFlags, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, RenameFlags,
    Request, TimeOrNow, WriteFlags,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use self::attr::{mode_to_filetype, resolve_time, to_file_attr, BLOCK_SIZE};
use self::inodes::{InodeTable, ROOT_INO};
use self::ops::{MemoryFs, MAX_FILE_SIZE};
use crate::config::MemfsConfig;
use crate::error::{FsError, Result};

const TTL: Duration = Duration::from_secs(1);

/// Example file installed at mount time.
pub const HELLO_PATH: &str = "/hello";
pub const HELLO_CONTENT: &[u8] = b"Hello World!\n";

/// FUSE front end for a [`MemoryFs`].
///
/// Every callback takes the one table lock for its full duration, so
/// requests are applied one at a time.
pub struct MemFs {
    pub config: MemfsConfig,
    state: Mutex<MemoryFs>,
}

impl MemFs {
    pub fn new(config: MemfsConfig, fs: MemoryFs) -> Self {
        Self {
            config,
            state: Mutex::new(fs),
        }
    }

    fn child_path(fs: &MemoryFs, parent: INodeNo, name: &OsStr) -> Result<String> {
        let parent = fs.path_for_ino(parent.0)?;
        let name = name
            .to_str()
            .ok_or_else(|| FsError::InvalidPath(name.to_string_lossy().into_owned()))?;
        Ok(inodes::join(&parent, name))
    }

    /// Inode number of the directory containing `path`.
    fn parent_ino(table: &InodeTable, path: &str) -> u64 {
        match inodes::parent_of(path) {
            "/" => ROOT_INO,
            parent => table.resolve(parent).map_or(ROOT_INO, |id| id.0),
        }
    }
}

impl Filesystem for MemFs {
    fn init(&mut self, _req: &Request, _config: &mut KernelConfig) -> std::io::Result<()> {
        info!("memfs initialized, mountpoint={}", self.config.mountpoint.display());
        if self.config.seed_hello {
            self.state
                .get_mut()
                .seed(HELLO_PATH, HELLO_CONTENT, 0o644)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
        }
        Ok(())
    }

    fn destroy(&mut self) {
        info!("memfs shutting down, discarding {} paths", self.state.get_mut().table().len());
        self.state.get_mut().set_observer(None);
    }

    fn lookup(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup(parent={}, name={:?})", parent.0, name);
        let fs = self.state.lock();
        match Self::child_path(&fs, parent, name).and_then(|p| fs.getattr(&p)) {
            Ok(attr) => reply.entry(&TTL, &to_file_attr(&attr), Generation(0)),
            Err(e) => reply.error(Errno::from(&e)),
        }
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
        debug!("getattr(ino={})", ino.0);
        let fs = self.state.lock();
        match fs.path_for_ino(ino.0).and_then(|p| fs.getattr(&p)) {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(&attr)),
            Err(e) => reply.error(Errno::from(&e)),
        }
    }

    fn setattr(
        &self,
        _req: &Request,
        ino: INodeNo,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<FileHandle>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<BsdFileFlags>,
        reply: ReplyAttr,
    ) {
        debug!(
            "setattr(ino={}, mode={:?}, uid={:?}, gid={:?}, size={:?})",
            ino.0, mode, uid, gid, size
        );
        let mut fs = self.state.lock();
        let result = fs.path_for_ino(ino.0).and_then(|path| {
            if let Some(size) = size {
                fs.truncate(&path, size)?;
            }
            if atime.is_some() || mtime.is_some() {
                let current = fs.getattr(&path)?;
                fs.utimens(
                    &path,
                    resolve_time(atime, current.accessed_at),
                    resolve_time(mtime, current.modified_at),
                )?;
            }
            fs.getattr(&path)
        });
        match result {
            Ok(attr) => reply.attr(&TTL, &to_file_attr(&attr)),
            Err(e) => reply.error(Errno::from(&e)),
        }
    }

    fn open(&self, _req: &Request, ino: INodeNo, flags: OpenFlags, reply: ReplyOpen) {
        debug!("open(ino={}, flags={})", ino.0, flags.0);
        let fs = self.state.lock();
        match fs.path_for_ino(ino.0).and_then(|p| fs.open(&p)) {
            Ok(()) => reply.opened(FileHandle(0), FopenFlags::empty()),
            Err(e) => reply.error(Errno::from(&e)),
        }
    }

    fn read(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        size: u32,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyData,
    ) {
        debug!("read(ino={}, offset={}, size={})", ino.0, offset, size);
        let mut fs = self.state.lock();
        let mut buf = vec![0u8; size as usize];
        match fs.path_for_ino(ino.0).and_then(|p| fs.read(&p, &mut buf, offset)) {
            Ok(n) => reply.data(&buf[..n]),
            Err(e) => reply.error(Errno::from(&e)),
        }
    }

    fn write(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        data: &[u8],
        _write_flags: WriteFlags,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyWrite,
    ) {
        debug!("write(ino={}, offset={}, size={})", ino.0, offset, data.len());
        let mut fs = self.state.lock();
        match fs.path_for_ino(ino.0).and_then(|p| fs.write(&p, data, offset)) {
            Ok(n) => reply.written(n as u32),
            Err(e) => {
                warn!("write to inode {} failed: {}", ino.0, e);
                reply.error(Errno::from(&e));
            }
        }
    }

    // flush, release and fsync always succeed: an unlinked file may still be
    // open, and its close must not fail.

    fn flush(&self, _req: &Request, ino: INodeNo, _fh: FileHandle, _lock_owner: LockOwner, reply: ReplyEmpty) {
        debug!("flush(ino={})", ino.0);
        let mut fs = self.state.lock();
        if let Ok(path) = fs.path_for_ino(ino.0) {
            let _ = fs.flush(&path);
        }
        reply.ok();
    }

    fn release(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release(ino={})", ino.0);
        let mut fs = self.state.lock();
        if let Ok(path) = fs.path_for_ino(ino.0) {
            let _ = fs.release(&path);
        }
        reply.ok();
    }

    fn fsync(&self, _req: &Request, ino: INodeNo, _fh: FileHandle, datasync: bool, reply: ReplyEmpty) {
        debug!("fsync(ino={}, datasync={})", ino.0, datasync);
        let mut fs = self.state.lock();
        if let Ok(path) = fs.path_for_ino(ino.0) {
            let _ = fs.fsync(&path, datasync);
        }
        reply.ok();
    }

    fn opendir(&self, _req: &Request, ino: INodeNo, _flags: OpenFlags, reply: ReplyOpen) {
        debug!("opendir(ino={})", ino.0);
        let fs = self.state.lock();
        match fs.path_for_ino(ino.0).and_then(|p| fs.open(&p)) {
            Ok(()) => reply.opened(FileHandle(0), FopenFlags::empty()),
            Err(e) => reply.error(Errno::from(&e)),
        }
    }

    fn readdir(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir(ino={}, offset={})", ino.0, offset);
        let fs = self.state.lock();
        let (path, listing) = match fs
            .path_for_ino(ino.0)
            .and_then(|p| fs.readdir(&p).map(|listing| (p, listing)))
        {
            Ok(v) => v,
            Err(e) => {
                reply.error(Errno::from(&e));
                return;
            }
        };

        let parent_ino = if ino.0 == ROOT_INO {
            ROOT_INO
        } else {
            Self::parent_ino(fs.table(), &path)
        };

        for (i, entry) in listing.iter().enumerate().skip(offset as usize) {
            let (entry_ino, kind) = match (&entry.attr, entry.name.as_str()) {
                (Some(attr), _) => (attr.ino, mode_to_filetype(attr.mode)),
                (None, "..") => (parent_ino, FileType::Directory),
                (None, _) => (ino.0, FileType::Directory),
            };
            if reply.add(INodeNo(entry_ino), (i + 1) as u64, kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&self, _req: &Request, ino: INodeNo, _fh: FileHandle, _flags: OpenFlags, reply: ReplyEmpty) {
        debug!("releasedir(ino={})", ino.0);
        reply.ok();
    }

    fn mknod(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        debug!("mknod(parent={}, name={:?}, mode={:#o})", parent.0, name, mode);
        let mut fs = self.state.lock();
        let result = Self::child_path(&fs, parent, name).and_then(|path| {
            fs.create_node(&path, mode, rdev)?;
            fs.getattr(&path)
        });
        match result {
            Ok(attr) => reply.entry(&TTL, &to_file_attr(&attr), Generation(0)),
            Err(e) => reply.error(Errno::from(&e)),
        }
    }

    fn create(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("create(parent={}, name={:?}, mode={:#o})", parent.0, name, mode);
        let mut fs = self.state.lock();
        let result = Self::child_path(&fs, parent, name).and_then(|path| {
            fs.create_node(&path, mode, 0)?;
            fs.getattr(&path)
        });
        match result {
            Ok(attr) => reply.created(
                &TTL,
                &to_file_attr(&attr),
                Generation(0),
                FileHandle(0),
                FopenFlags::empty(),
            ),
            Err(e) => reply.error(Errno::from(&e)),
        }
    }

    fn mkdir(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir(parent={}, name={:?}, mode={:#o})", parent.0, name, mode);
        let mut fs = self.state.lock();
        let result = Self::child_path(&fs, parent, name).and_then(|path| {
            fs.mkdir(&path, mode)?;
            fs.getattr(&path)
        });
        match result {
            Ok(attr) => reply.entry(&TTL, &to_file_attr(&attr), Generation(0)),
            Err(e) => reply.error(Errno::from(&e)),
        }
    }

    fn unlink(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink(parent={}, name={:?})", parent.0, name);
        let mut fs = self.state.lock();
        match Self::child_path(&fs, parent, name).and_then(|p| fs.unlink(&p)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Errno::from(&e)),
        }
    }

    fn rmdir(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir(parent={}, name={:?})", parent.0, name);
        let mut fs = self.state.lock();
        match Self::child_path(&fs, parent, name).and_then(|p| fs.rmdir(&p)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Errno::from(&e)),
        }
    }

    fn rename(
        &self,
        _req: &Request,
        parent: INodeNo,
        name: &OsStr,
        newparent: INodeNo,
        newname: &OsStr,
        _flags: RenameFlags,
        reply: ReplyEmpty,
    ) {
        debug!(
            "rename(parent={}, name={:?}, newparent={}, newname={:?})",
            parent.0, name, newparent.0, newname
        );
        let mut fs = self.state.lock();
        let result = Self::child_path(&fs, parent, name).and_then(|old| {
            let new = Self::child_path(&fs, newparent, newname)?;
            fs.rename(&old, &new)
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Errno::from(&e)),
        }
    }

    fn link(
        &self,
        _req: &Request,
        ino: INodeNo,
        newparent: INodeNo,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        debug!("link(ino={}, newparent={}, newname={:?})", ino.0, newparent.0, newname);
        let mut fs = self.state.lock();
        let result = fs.path_for_ino(ino.0).and_then(|old| {
            let new = Self::child_path(&fs, newparent, newname)?;
            fs.link(&old, &new)?;
            fs.getattr(&new)
        });
        match result {
            Ok(attr) => reply.entry(&TTL, &to_file_attr(&attr), Generation(0)),
            Err(e) => reply.error(Errno::from(&e)),
        }
    }

    fn statfs(&self, _req: &Request, _ino: INodeNo, reply: ReplyStatfs) {
        let fs = self.state.lock();
        let table = fs.table();
        let used_bytes: u64 = table
            .paths()
            .filter_map(|p| table.get(p).ok())
            .map(|rec| rec.size)
            .sum();
        let block = BLOCK_SIZE as u64;
        let total_blocks = MAX_FILE_SIZE / block;
        let used_blocks = used_bytes.div_ceil(block).min(total_blocks);
        let free_blocks = total_blocks - used_blocks;
        let files = table.record_count() as u64;
        reply.statfs(
            total_blocks,
            free_blocks,
            free_blocks,
            files,
            u32::MAX as u64 - files,
            BLOCK_SIZE,
            255,
            BLOCK_SIZE,
        );
    }

    fn access(&self, _req: &Request, ino: INodeNo, mask: AccessFlags, reply: ReplyEmpty) {
        debug!("access(ino={}, mask={:?})", ino.0, mask);
        let fs = self.state.lock();
        match fs.path_for_ino(ino.0).and_then(|p| fs.open(&p)) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(Errno::from(&e)),
        }
    }
}
