//! Unix FUSE implementation using the `fuser` crate.

use std::ffi::OsStr;
use std::path::Path;
use std::time::SystemTime;

use etcdfs_config::WriteMode;
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use tracing::{debug, error};

use crate::attr::{NodeAttr, NodeKind};
use crate::bridge::EtcdFsCore;
use crate::error::FsOpError;
use crate::inode::{child_path, InodeTable, ROOT_INO};

/// Block size reported to the kernel.
const BLKSIZE: u32 = 4096;

/// Unix FUSE filesystem wrapper around `EtcdFsCore`.
pub struct UnixFuse {
    core: EtcdFsCore,
    inodes: InodeTable,
}

/// Map a synthesized kind to the FUSE file type.
pub fn file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::File => FileType::RegularFile,
        NodeKind::Directory => FileType::Directory,
    }
}

/// Convert a `NodeAttr` to a `FileAttr` carrying the kernel-facing inode.
pub fn to_file_attr(attr: &NodeAttr, ino: u64) -> FileAttr {
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.crtime,
        kind: file_type(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: BLKSIZE,
        flags: 0,
    }
}

impl UnixFuse {
    pub fn new(core: EtcdFsCore) -> Self {
        UnixFuse {
            core,
            inodes: InodeTable::new(),
        }
    }

    fn path_of(&self, ino: u64) -> Result<String, FsOpError> {
        self.inodes.get_path(ino).ok_or(FsOpError::NotFound)
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> Result<String, FsOpError> {
        let name = name.to_str().ok_or(FsOpError::InvalidArg)?;
        self.inodes.resolve_child(parent, name).ok_or(FsOpError::NotFound)
    }

    fn file_attr(&self, path: &str, attr: &NodeAttr) -> FileAttr {
        let ino = if path == "/" {
            ROOT_INO
        } else {
            self.inodes.assign(path, attr.ino)
        };
        to_file_attr(attr, ino)
    }

    /// Attributes for an entry reply, which hands the kernel a reference.
    fn entry_attr(&self, path: &str, attr: &NodeAttr) -> FileAttr {
        to_file_attr(attr, self.inodes.lookup(path, attr.ino))
    }

    fn lookup_path(&self, parent: u64, name: &OsStr) -> Result<FileAttr, FsOpError> {
        let path = self.child_of(parent, name)?;
        let attr = self.core.do_getattr(&path)?;
        Ok(self.entry_attr(&path, &attr))
    }

    fn getattr_path(&self, ino: u64) -> Result<FileAttr, FsOpError> {
        let path = self.path_of(ino)?;
        let attr = self.core.do_getattr(&path)?;
        Ok(self.file_attr(&path, &attr))
    }

    fn write_path(&self, ino: u64, offset: i64, data: &[u8]) -> Result<u32, FsOpError> {
        let path = self.path_of(ino)?;
        let offset = u64::try_from(offset).map_err(|_| FsOpError::InvalidArg)?;
        match self.core.write_mode() {
            WriteMode::LastWriterWins => self.core.do_write(&path, data, offset),
            WriteMode::CompareAndSwap => self.core.do_write_checked(&path, data, offset),
        }
    }

    fn setattr_path(
        &self,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
    ) -> Result<FileAttr, FsOpError> {
        let path = self.path_of(ino)?;

        if mode.is_some() {
            self.core.do_unsupported("chmod", &path)?;
        }
        if uid.is_some() || gid.is_some() {
            self.core.do_unsupported("chown", &path)?;
        }

        // Time updates have nowhere to go and are accepted as-is
        let attr = match size {
            Some(len) => match self.core.write_mode() {
                WriteMode::LastWriterWins => self.core.do_truncate(&path, len)?,
                WriteMode::CompareAndSwap => self.core.do_truncate_checked(&path, len)?,
            },
            None => self.core.do_getattr(&path)?,
        };
        Ok(self.file_attr(&path, &attr))
    }

    fn readdir_entries(&self, ino: u64) -> Result<Vec<(u64, FileType, String)>, FsOpError> {
        let path = self.path_of(ino)?;
        let result = self.core.do_readdir(&path)?;

        let entries = result
            .entries
            .into_iter()
            .map(|entry| match (entry.name.as_str(), &entry.attr) {
                (".", _) => (ino, FileType::Directory, entry.name),
                ("..", _) | (_, None) => (self.inodes.parent_ino(ino), FileType::Directory, entry.name),
                (_, Some(attr)) => {
                    let child = child_path(&path, &entry.name);
                    let child_ino = self.inodes.peek(&child, attr.ino);
                    (child_ino, file_type(attr.kind), entry.name)
                }
            })
            .collect();
        Ok(entries)
    }

    fn reply_unsupported(&self, op: &str, ino: u64) -> i32 {
        let path = self.inodes.get_path(ino).unwrap_or_default();
        match self.core.do_unsupported(op, &path) {
            Ok(()) => 0,
            Err(e) => e.to_errno(),
        }
    }
}

impl Filesystem for UnixFuse {
    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup: parent={}, name={:?}", parent, name);

        match self.lookup_path(parent, name) {
            Ok(attr) => reply.entry(&NodeAttr::ttl(), &attr, 0),
            Err(e) => {
                debug!("lookup failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        debug!("forget: ino={}, nlookup={}", ino, nlookup);
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        debug!("getattr: ino={}", ino);

        match self.getattr_path(ino) {
            Ok(attr) => reply.attr(&NodeAttr::ttl(), &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read: ino={}, offset={}, size={}", ino, offset, size);

        let result = self.path_of(ino).and_then(|path| {
            let offset = u64::try_from(offset).map_err(|_| FsOpError::InvalidArg)?;
            self.core.do_read(&path, size, offset)
        });
        match result {
            Ok(data) => reply.data(&data),
            Err(e) => {
                error!("read failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("write: ino={}, offset={}, size={}", ino, offset, data.len());

        match self.write_path(ino, offset, data) {
            Ok(written) => reply.written(written),
            Err(e) => {
                error!("write failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir: ino={}, offset={}", ino, offset);

        match self.readdir_entries(ino) {
            Ok(entries) => {
                let skip = usize::try_from(offset).unwrap_or(0);
                for (i, (entry_ino, kind, name)) in entries.into_iter().enumerate().skip(skip) {
                    if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                        break;
                    }
                }
                reply.ok();
            }
            Err(e) => {
                error!("readdir failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        debug!("create: parent={}, name={:?}", parent, name);

        let result = self.child_of(parent, name).and_then(|path| {
            let attr = self.core.do_create(&path)?;
            Ok(self.entry_attr(&path, &attr))
        });
        match result {
            Ok(attr) => reply.created(&NodeAttr::ttl(), &attr, 0, 0, 0),
            Err(e) => {
                error!("create failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir: parent={}, name={:?}", parent, name);

        let result = self.child_of(parent, name).and_then(|path| {
            let attr = self.core.do_mkdir(&path)?;
            Ok(self.entry_attr(&path, &attr))
        });
        match result {
            Ok(attr) => reply.entry(&NodeAttr::ttl(), &attr, 0),
            Err(e) => {
                error!("mkdir failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink: parent={}, name={:?}", parent, name);

        let result = self.child_of(parent, name).and_then(|path| {
            self.core.do_unlink(&path)?;
            self.inodes.remove_path(&path);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                error!("unlink failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir: parent={}, name={:?}", parent, name);

        let result = self.child_of(parent, name).and_then(|path| {
            self.core.do_rmdir(&path)?;
            self.inodes.remove_path(&path);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                error!("rmdir failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("open: ino={}", ino);

        match self.path_of(ino).and_then(|path| self.core.do_open(&path)) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("opendir: ino={}", ino);

        match self.path_of(ino).and_then(|path| self.core.do_open(&path)) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn release(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let path = self.inodes.get_path(ino).unwrap_or_default();
        match self.core.do_release(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn flush(&mut self, _req: &Request, ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        let path = self.inodes.get_path(ino).unwrap_or_default();
        match self.core.do_flush(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn fsync(&mut self, _req: &Request, ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        let path = self.inodes.get_path(ino).unwrap_or_default();
        match self.core.do_fsync(&path) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn statfs(&mut self, _req: &Request, _ino: u64, reply: ReplyStatfs) {
        match self.core.do_statfs() {
            Ok(()) => reply.statfs(0, 0, 0, 0, 0, 512, 255, 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!("setattr: ino={}, mode={:?}, size={:?}", ino, mode, size);

        match self.setattr_path(ino, mode, uid, gid, size) {
            Ok(attr) => reply.attr(&NodeAttr::ttl(), &attr),
            Err(e) => {
                error!("setattr failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        reply.error(self.reply_unsupported("readlink", ino));
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        _link_name: &OsStr,
        _target: &Path,
        reply: ReplyEntry,
    ) {
        reply.error(self.reply_unsupported("symlink", parent));
    }

    fn link(
        &mut self,
        _req: &Request,
        ino: u64,
        _newparent: u64,
        _newname: &OsStr,
        reply: ReplyEntry,
    ) {
        reply.error(self.reply_unsupported("link", ino));
    }

    fn mknod(
        &mut self,
        _req: &Request,
        parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        reply.error(self.reply_unsupported("mknod", parent));
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(self.reply_unsupported("rename", parent));
    }

    fn setxattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(self.reply_unsupported("setxattr", ino));
    }

    fn getxattr(&mut self, _req: &Request, ino: u64, _name: &OsStr, _size: u32, reply: ReplyXattr) {
        reply.error(self.reply_unsupported("getxattr", ino));
    }

    fn listxattr(&mut self, _req: &Request, ino: u64, _size: u32, reply: ReplyXattr) {
        reply.error(self.reply_unsupported("listxattr", ino));
    }

    fn removexattr(&mut self, _req: &Request, ino: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(self.reply_unsupported("removexattr", ino));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etcdfs_core::Node;

    use crate::mapping::MountContext;

    fn ctx() -> MountContext {
        MountContext::new("/", 1000, 1000, 0o644)
    }

    #[test]
    fn test_file_attr_conversion() {
        let node = Node::file("/f", vec![b'x'; 1024]).with_versions(42, 43);
        let attr = NodeAttr::from_node(&node, &ctx());
        let file_attr = to_file_attr(&attr, 42);

        assert_eq!(file_attr.ino, 42);
        assert_eq!(file_attr.size, 1024);
        assert_eq!(file_attr.kind, FileType::RegularFile);
        assert_eq!(file_attr.perm, 0o644);
    }

    #[test]
    fn test_dir_attr_conversion() {
        let attr = NodeAttr::from_node(&Node::dir("/d").with_versions(5, 5), &ctx());
        let file_attr = to_file_attr(&attr, ROOT_INO);

        assert_eq!(file_attr.ino, ROOT_INO);
        assert_eq!(file_attr.kind, FileType::Directory);
        assert_eq!(file_attr.perm, 0o755);
    }

    #[test]
    fn test_file_attr_preserves_all_fields() {
        let attr = NodeAttr::from_node(&Node::file("/f", b"abc".to_vec()).with_versions(3, 8), &ctx());
        let file_attr = to_file_attr(&attr, 77);

        assert_eq!(file_attr.size, attr.size);
        assert_eq!(file_attr.blocks, attr.blocks);
        assert_eq!(file_attr.atime, attr.atime);
        assert_eq!(file_attr.mtime, attr.mtime);
        assert_eq!(file_attr.ctime, attr.ctime);
        assert_eq!(file_attr.crtime, attr.crtime);
        assert_eq!(file_attr.perm, attr.perm);
        assert_eq!(file_attr.nlink, attr.nlink);
        assert_eq!(file_attr.uid, attr.uid);
        assert_eq!(file_attr.gid, attr.gid);
        assert_eq!(file_attr.rdev, 0);
        assert_eq!(file_attr.blksize, BLKSIZE);
        assert_eq!(file_attr.flags, 0);
    }

    #[test]
    fn test_file_type_mapping() {
        assert_eq!(file_type(NodeKind::File), FileType::RegularFile);
        assert_eq!(file_type(NodeKind::Directory), FileType::Directory);
    }
}
