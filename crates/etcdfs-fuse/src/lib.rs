//! FUSE filesystem exposing a subtree of an etcd keyspace.
//!
//! Directories map to etcd directory nodes and regular files map to value
//! nodes. Every operation is answered from the store; nothing is cached
//! between requests apart from the inode numbers handed to the kernel.
//!
//! # Architecture
//!
//! - `bridge`: `EtcdFsCore`, path-based operations over a [`Store`](etcdfs_core::Store)
//! - `unix_fuse`: `fuser::Filesystem` impl translating inodes to paths
//! - `inode`: the inode/path table backing `unix_fuse`
//!
//! # Example
//!
//! ```ignore
//! use etcdfs_config::EtcdFsConfig;
//! use etcdfs_fuse::EtcdFsCore;
//!
//! let config = EtcdFsConfig::from_file("etcdfs.yaml")?;
//! let fs = EtcdFsCore::from_config(&config)?;
//! fs.check_base_dir()?;
//! fs.mount("/mnt/etcd".as_ref(), &config.mount)?;
//! ```

mod async_bridge;
mod attr;
mod bridge;
mod error;
mod inode;
mod mapping;
#[cfg(unix)]
mod unix_fuse;

pub use async_bridge::{block_on, init_runtime, runtime, FuseError};
pub use attr::{version_time, NodeAttr, NodeKind, DIR_SIZE};
pub use bridge::{
    resize, splice, BaseDirError, DirEntry, EtcdFsCore, ReadDirResult, FILL_BYTE, MAX_VALUE_SIZE,
};
pub use error::{translate, FsOpError};
pub use inode::{child_path, InodeTable, ROOT_INO, SYNTHETIC_INO_BASE};
pub use mapping::{child_name, normalize_path, MountContext};
#[cfg(unix)]
pub use unix_fuse::{file_type, to_file_attr, UnixFuse};
