//! The filesystem bridge: every operation resolves a path to a store key,
//! issues one or two store calls and translates the result.
//!
//! # Concurrent writers
//!
//! Offset writes and truncation are read-modify-write sequences with no
//! lock held between the read and the write. With
//! [`WriteMode::LastWriterWins`] two callers updating the same key can
//! interleave and one update is silently lost. The `*_checked` operations
//! condition the write on the version that was read and fail with
//! [`FsOpError::Stale`] instead.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use etcdfs_backends::{EtcdStore, EtcdStoreConfig};
use etcdfs_config::{EtcdFsConfig, MountConfig, WriteMode};
use etcdfs_core::{DeleteOptions, Node, ReadOptions, Store, StoreError, WriteOptions};
use tracing::{debug, info};

use crate::async_bridge::{block_on, init_runtime, FuseError};
use crate::attr::NodeAttr;
use crate::error::FsOpError;
use crate::mapping::{child_name, normalize_path, MountContext};

/// Padding byte used when a value is extended past its current length.
pub const FILL_BYTE: u8 = b' ';

/// Largest value a write or truncate may produce.
///
/// Matches etcd's default request size limit (`--max-request-bytes`).
pub const MAX_VALUE_SIZE: u64 = 1536 * 1024;

/// Length of a value ending at `offset + extra`, if within [`MAX_VALUE_SIZE`].
fn bounded_len(offset: u64, extra: usize) -> Result<usize, FsOpError> {
    match offset.checked_add(extra as u64) {
        Some(end) if end <= MAX_VALUE_SIZE => Ok(end as usize),
        _ => Err(FsOpError::FileTooLarge),
    }
}

/// A single directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name relative to the listed directory.
    pub name: String,
    /// Synthesized attributes. `None` for `..`, whose node is not fetched.
    pub attr: Option<NodeAttr>,
}

/// Result from a readdir operation.
#[derive(Debug, Clone)]
pub struct ReadDirResult {
    /// Attributes of the listed directory.
    pub attr: NodeAttr,
    /// `.`, `..` and one entry per child, in store order.
    pub entries: Vec<DirEntry>,
}

/// Why the base directory cannot be mounted.
#[derive(Debug, thiserror::Error)]
pub enum BaseDirError {
    #[error("Base etcd directory '{0}' does not exist")]
    Missing(String),
    #[error("Etcd key '{0}' is not a directory")]
    NotADirectory(String),
    #[error("Failed to read base directory '{key}': {source}")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Runtime(#[from] FuseError),
}

/// Core filesystem logic, independent of the FUSE protocol.
pub struct EtcdFsCore {
    store: Arc<dyn Store>,
    ctx: MountContext,
    write_mode: WriteMode,
}

/// Copy `data` into `existing` at `offset`, padding any gap with [`FILL_BYTE`]
/// and keeping bytes past the end of `data`.
pub fn splice(existing: &[u8], offset: usize, data: &[u8]) -> Vec<u8> {
    let end = offset + data.len();
    let mut value = Vec::with_capacity(end.max(existing.len()));

    value.extend_from_slice(&existing[..offset.min(existing.len())]);
    value.resize(offset, FILL_BYTE);
    value.extend_from_slice(data);
    if existing.len() > end {
        value.extend_from_slice(&existing[end..]);
    }
    value
}

/// Cut or pad `existing` to exactly `len` bytes.
pub fn resize(existing: &[u8], len: usize) -> Vec<u8> {
    let mut value = existing[..len.min(existing.len())].to_vec();
    value.resize(len, FILL_BYTE);
    value
}

fn slice_range(value: &[u8], offset: u64, size: u32) -> Vec<u8> {
    let len = value.len() as u64;
    if offset >= len {
        return Vec::new();
    }
    let end = offset.saturating_add(size as u64).min(len);
    value[offset as usize..end as usize].to_vec()
}

fn connect(config: &EtcdFsConfig) -> Result<EtcdStore, StoreError> {
    EtcdStore::new(EtcdStoreConfig {
        endpoint: config.endpoint.clone(),
        timeout: config.timeout.as_ref().map(|t| t.as_duration()),
    })
}

async fn verify_base_dir(store: &dyn Store, key: &str) -> Result<(), BaseDirError> {
    match store.read(key, ReadOptions::default()).await {
        Ok(node) if node.is_dir => Ok(()),
        Ok(_) => Err(BaseDirError::NotADirectory(key.to_string())),
        Err(e) if e.is_not_found() => Err(BaseDirError::Missing(key.to_string())),
        Err(source) => Err(BaseDirError::Store {
            key: key.to_string(),
            source,
        }),
    }
}

impl EtcdFsCore {
    /// Create a new core over a connected store.
    pub fn new(store: Arc<dyn Store>, ctx: MountContext) -> Result<Self, FsOpError> {
        init_runtime()?;
        Ok(EtcdFsCore {
            store,
            ctx,
            write_mode: WriteMode::default(),
        })
    }

    /// Create a core talking to the etcd endpoint in `config`.
    ///
    /// Owner identity defaults to the current process when the config does
    /// not name one.
    #[cfg(unix)]
    pub fn from_config(config: &EtcdFsConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = connect(config)?;

        let uid = config.mount.uid.unwrap_or_else(|| unsafe { libc::getuid() });
        let gid = config.mount.gid.unwrap_or_else(|| unsafe { libc::getgid() });
        let ctx = MountContext::new(&config.base_dir, uid, gid, config.mount.mode.bits());

        Ok(Self::new(Arc::new(store), ctx)?.with_write_mode(config.mount.write_mode))
    }

    /// Check the base directory named in `config` without a core.
    ///
    /// Runs on a private single-threaded runtime that is shut down before
    /// returning, so no threads outlive the call. Use this before the
    /// process forks; the shared runtime would not survive the fork.
    pub fn preflight(config: &EtcdFsConfig) -> Result<(), BaseDirError> {
        let key = normalize_path(&config.base_dir);
        let store = connect(config).map_err(|source| BaseDirError::Store {
            key: key.clone(),
            source,
        })?;
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| FuseError::RuntimeInit(e.to_string()))?;

        let result = rt.block_on(verify_base_dir(&store, &key));
        // The client's connections belong to the runtime
        drop(store);
        drop(rt);
        result
    }

    /// Select how FUSE writes and truncation publish recomputed values.
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }

    pub fn context(&self) -> &MountContext {
        &self.ctx
    }

    fn call<T, F>(&self, future: F) -> Result<T, FsOpError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        Ok(block_on(future)??)
    }

    fn fetch(&self, key: &str, opts: ReadOptions) -> Result<Node, FsOpError> {
        self.call(self.store.read(key, opts))
    }

    fn put(&self, key: &str, value: &[u8], opts: WriteOptions) -> Result<Node, FsOpError> {
        self.call(self.store.write(key, value, opts))
    }

    /// Confirm the base key exists and is a directory.
    pub fn check_base_dir(&self) -> Result<(), BaseDirError> {
        block_on(verify_base_dir(self.store.as_ref(), self.ctx.base_key()))?
    }

    /// Attributes of the entry at `path`.
    pub fn do_getattr(&self, path: &str) -> Result<NodeAttr, FsOpError> {
        let node = self.fetch(&self.ctx.path_to_key(path), ReadOptions::default())?;
        Ok(NodeAttr::from_node(&node, &self.ctx))
    }

    /// Read up to `size` bytes starting at `offset`. Past the end the result is empty.
    pub fn do_read(&self, path: &str, size: u32, offset: u64) -> Result<Vec<u8>, FsOpError> {
        let node = self.fetch(&self.ctx.path_to_key(path), ReadOptions::default())?;
        if node.is_dir {
            return Err(FsOpError::IsDir);
        }
        Ok(slice_range(&node.value, offset, size))
    }

    /// Write `data` at `offset`, last writer wins.
    ///
    /// At offset 0 the value is replaced outright. Otherwise the current
    /// value is read (absent counts as empty), spliced and written back
    /// without a version check; see the module docs for the race this
    /// leaves open.
    pub fn do_write(&self, path: &str, data: &[u8], offset: u64) -> Result<u32, FsOpError> {
        bounded_len(offset, data.len())?;
        let key = self.ctx.path_to_key(path);

        let value = if offset == 0 {
            data.to_vec()
        } else {
            let existing = self.read_value_or_empty(&key)?;
            splice(&existing.value, offset as usize, data)
        };

        self.put(&key, &value, WriteOptions::value())?;
        Ok(data.len() as u32)
    }

    /// Like [`do_write`](Self::do_write), but an offset write only lands if
    /// nobody modified the key since it was read.
    pub fn do_write_checked(&self, path: &str, data: &[u8], offset: u64) -> Result<u32, FsOpError> {
        bounded_len(offset, data.len())?;
        if offset == 0 {
            return self.do_write(path, data, offset);
        }

        let key = self.ctx.path_to_key(path);
        let existing = self.read_value_or_empty(&key)?;
        let value = splice(&existing.value, offset as usize, data);

        let opts = match existing.version {
            Some(version) => WriteOptions::compare_and_swap(version),
            None => WriteOptions::create_file(),
        };
        match self.put(&key, &value, opts) {
            // Someone created the key after we saw it missing
            Err(FsOpError::Exists) => Err(FsOpError::Stale),
            other => other.map(|_| data.len() as u32),
        }
    }

    fn read_value_or_empty(&self, key: &str) -> Result<CurrentValue, FsOpError> {
        match block_on(self.store.read(key, ReadOptions::default()))? {
            Ok(node) if node.is_dir => Err(FsOpError::IsDir),
            Ok(node) => Ok(CurrentValue {
                version: Some(node.modified_version),
                value: node.value,
            }),
            Err(e) if e.is_not_found() => Ok(CurrentValue {
                version: None,
                value: Vec::new(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Cut or extend the value at `path` to `len` bytes, last writer wins.
    pub fn do_truncate(&self, path: &str, len: u64) -> Result<NodeAttr, FsOpError> {
        self.truncate_with(path, len, |_| WriteOptions::value())
    }

    /// Like [`do_truncate`](Self::do_truncate), conditioned on the version read.
    pub fn do_truncate_checked(&self, path: &str, len: u64) -> Result<NodeAttr, FsOpError> {
        self.truncate_with(path, len, WriteOptions::compare_and_swap)
    }

    fn truncate_with(
        &self,
        path: &str,
        len: u64,
        opts: impl FnOnce(u64) -> WriteOptions,
    ) -> Result<NodeAttr, FsOpError> {
        let key = self.ctx.path_to_key(path);
        let node = self.fetch(&key, ReadOptions::default())?;
        if node.is_dir {
            return Err(FsOpError::IsDir);
        }

        let len = bounded_len(len, 0)?;
        if node.value.len() == len {
            return Ok(NodeAttr::from_node(&node, &self.ctx));
        }

        let value = resize(&node.value, len);
        let written = self.put(&key, &value, opts(node.modified_version))?;
        Ok(NodeAttr::from_node(&written, &self.ctx))
    }

    /// Create an empty file. Fails with `Exists` if anything is at `path`.
    pub fn do_create(&self, path: &str) -> Result<NodeAttr, FsOpError> {
        let node = self.put(&self.ctx.path_to_key(path), &[], WriteOptions::create_file())?;
        Ok(NodeAttr::from_node(&node, &self.ctx))
    }

    /// Create a directory. Fails with `Exists` if anything is at `path`.
    pub fn do_mkdir(&self, path: &str) -> Result<NodeAttr, FsOpError> {
        let node = self.put(&self.ctx.path_to_key(path), &[], WriteOptions::create_dir())?;
        Ok(NodeAttr::from_node(&node, &self.ctx))
    }

    /// Delete a file.
    pub fn do_unlink(&self, path: &str) -> Result<(), FsOpError> {
        let key = self.ctx.path_to_key(path);
        self.call(self.store.delete(&key, DeleteOptions::file()))
    }

    /// Delete an empty directory. Emptiness is enforced by the store.
    pub fn do_rmdir(&self, path: &str) -> Result<(), FsOpError> {
        let key = self.ctx.path_to_key(path);
        self.call(self.store.delete(&key, DeleteOptions::dir()))
    }

    /// List a directory.
    ///
    /// Children whose key is missing, equals the directory itself, or is not
    /// a direct child are skipped.
    pub fn do_readdir(&self, path: &str) -> Result<ReadDirResult, FsOpError> {
        let key = self.ctx.path_to_key(path);
        let node = self.fetch(&key, ReadOptions::dir())?;
        if !node.is_dir {
            return Err(FsOpError::NotDir);
        }

        let attr = NodeAttr::from_node(&node, &self.ctx);
        let mut entries = Vec::with_capacity(node.children.len() + 2);
        entries.push(DirEntry {
            name: ".".to_string(),
            attr: Some(attr.clone()),
        });
        entries.push(DirEntry {
            name: "..".to_string(),
            attr: None,
        });

        for child in &node.children {
            match child_name(&key, &child.key) {
                Some(name) => entries.push(DirEntry {
                    name,
                    attr: Some(NodeAttr::from_node(child, &self.ctx)),
                }),
                None => debug!("readdir {}: skipping child key '{}'", key, child.key),
            }
        }

        Ok(ReadDirResult { attr, entries })
    }

    /// Opening is stateless; the handle is a constant.
    pub fn do_open(&self, path: &str) -> Result<(), FsOpError> {
        debug!("open {} (stateless)", path);
        Ok(())
    }

    pub fn do_release(&self, _path: &str) -> Result<(), FsOpError> {
        Ok(())
    }

    /// Writes go straight to the store, so there is nothing to flush.
    pub fn do_flush(&self, _path: &str) -> Result<(), FsOpError> {
        Ok(())
    }

    pub fn do_fsync(&self, _path: &str) -> Result<(), FsOpError> {
        Ok(())
    }

    pub fn do_statfs(&self) -> Result<(), FsOpError> {
        Ok(())
    }

    /// Operations the store has no representation for (ownership, mode,
    /// links, xattrs, device nodes, rename).
    pub fn do_unsupported(&self, op: &str, path: &str) -> Result<(), FsOpError> {
        debug!("{} {}: not supported", op, path);
        Err(FsOpError::NotSupported)
    }

    /// Mount the filesystem and serve requests until it is unmounted.
    #[cfg(unix)]
    pub fn mount(
        self,
        mountpoint: &Path,
        mount: &MountConfig,
    ) -> Result<(), Box<dyn std::error::Error>> {
        use crate::unix_fuse::UnixFuse;
        use fuser::MountOption;

        let mut options = vec![
            MountOption::FSName("etcdfs".to_string()),
            MountOption::Subtype("etcd".to_string()),
            MountOption::DefaultPermissions,
        ];
        if mount.auto_unmount {
            options.push(MountOption::AutoUnmount);
        }
        if mount.allow_other {
            options.push(MountOption::AllowOther);
        }

        info!(
            "Mounting etcd key {} at {:?}",
            self.ctx.base_key(),
            mountpoint
        );
        fuser::mount2(UnixFuse::new(self), mountpoint, &options)?;
        info!("etcdfs unmounted from {:?}", mountpoint);

        Ok(())
    }
}

struct CurrentValue {
    version: Option<u64>,
    value: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_len() {
        assert_eq!(bounded_len(10, 5), Ok(15));
        assert_eq!(bounded_len(MAX_VALUE_SIZE, 0), Ok(MAX_VALUE_SIZE as usize));
        assert_eq!(bounded_len(MAX_VALUE_SIZE, 1), Err(FsOpError::FileTooLarge));
        assert_eq!(bounded_len(u64::MAX, 1), Err(FsOpError::FileTooLarge));
    }

    #[test]
    fn test_splice_offset_zero_keeps_tail() {
        assert_eq!(splice(b"abcdef", 0, b"XY"), b"XYcdef");
    }

    #[test]
    fn test_splice_inside() {
        assert_eq!(splice(b"abcdef", 2, b"XY"), b"abXYef");
    }

    #[test]
    fn test_splice_extends() {
        assert_eq!(splice(b"abc", 2, b"XYZ"), b"abXYZ");
    }

    #[test]
    fn test_splice_pads_gap() {
        assert_eq!(splice(b"ab", 5, b"XY"), b"ab   XY");
        assert_eq!(splice(b"", 3, b"X"), b"   X");
    }

    #[test]
    fn test_resize() {
        assert_eq!(resize(b"abcdef", 3), b"abc");
        assert_eq!(resize(b"abc", 5), b"abc  ");
        assert_eq!(resize(b"abc", 0), b"");
        assert_eq!(resize(b"", 2), b"  ");
    }

    #[test]
    fn test_slice_range() {
        assert_eq!(slice_range(b"hello world", 0, 5), b"hello");
        assert_eq!(slice_range(b"hello world", 6, 100), b"world");
        assert_eq!(slice_range(b"hello", 5, 10), b"");
        assert_eq!(slice_range(b"hello", 50, 10), b"");
        assert_eq!(slice_range(b"hello", u64::MAX, u32::MAX), b"");
    }
}
