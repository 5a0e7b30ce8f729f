//! Attribute synthesis from store nodes.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use etcdfs_core::Node;

use crate::mapping::MountContext;

/// Nominal size reported for directories.
pub const DIR_SIZE: u64 = 4096;

/// Block size used for the `blocks` count.
const BLOCK_SIZE: u64 = 512;

/// Type of entry (file or directory).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// Filesystem attributes synthesized from a [`Node`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttr {
    /// Inode number (the node's created version, 0 if unknown).
    pub ino: u64,
    /// Size in bytes.
    pub size: u64,
    /// Number of 512-byte blocks.
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
    pub kind: NodeKind,
    /// Permission mode bits.
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Map a store version counter onto a timestamp.
///
/// Versions are not wall-clock times; the mapping only keeps them ordered so
/// tools sorting by mtime see modifications.
pub fn version_time(version: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(version)
}

impl NodeAttr {
    /// Build the attribute record for `node` under `ctx`.
    pub fn from_node(node: &Node, ctx: &MountContext) -> Self {
        let (kind, size, perm) = if node.is_dir {
            // Directories need execute to be traversable
            (NodeKind::Directory, DIR_SIZE, ctx.file_mode | 0o111)
        } else {
            (NodeKind::File, node.value.len() as u64, ctx.file_mode)
        };

        let created = version_time(node.created_version);
        let modified = version_time(node.modified_version);

        NodeAttr {
            ino: node.created_version,
            size,
            blocks: size.div_ceil(BLOCK_SIZE),
            atime: modified,
            mtime: modified,
            ctime: created,
            crtime: created,
            kind,
            perm,
            nlink: 1,
            uid: ctx.owner_uid,
            gid: ctx.owner_gid,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    /// How long the kernel may cache attributes and entries.
    ///
    /// Zero: every lookup goes back to the store.
    pub fn ttl() -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> MountContext {
        MountContext::new("/base", 501, 20, 0o640)
    }

    #[test]
    fn test_file_attr() {
        let node = Node::file("/base/f", b"hello world".to_vec()).with_versions(7, 12);
        let attr = NodeAttr::from_node(&node, &ctx());

        assert_eq!(attr.kind, NodeKind::File);
        assert_eq!(attr.size, 11);
        assert_eq!(attr.blocks, 1);
        assert_eq!(attr.perm, 0o640);
        assert_eq!(attr.nlink, 1);
        assert_eq!(attr.uid, 501);
        assert_eq!(attr.gid, 20);
        assert_eq!(attr.ino, 7);
        assert!(!attr.is_dir());
    }

    #[test]
    fn test_dir_attr() {
        let node = Node::dir("/base/d").with_versions(3, 3);
        let attr = NodeAttr::from_node(&node, &ctx());

        assert_eq!(attr.kind, NodeKind::Directory);
        assert_eq!(attr.size, DIR_SIZE);
        assert_eq!(attr.perm, 0o751);
        assert_eq!(attr.nlink, 1);
        assert!(attr.is_dir());
    }

    #[test]
    fn test_times_follow_versions() {
        let node = Node::file("/base/f", Vec::new()).with_versions(4, 9);
        let attr = NodeAttr::from_node(&node, &ctx());

        assert_eq!(attr.crtime, UNIX_EPOCH + Duration::from_secs(4));
        assert_eq!(attr.ctime, attr.crtime);
        assert_eq!(attr.mtime, UNIX_EPOCH + Duration::from_secs(9));
        assert_eq!(attr.atime, attr.mtime);
    }

    #[test]
    fn test_version_bump_is_observable() {
        let before = NodeAttr::from_node(&Node::file("/base/f", b"a".to_vec()).with_versions(4, 9), &ctx());
        let after = NodeAttr::from_node(&Node::file("/base/f", b"b".to_vec()).with_versions(4, 10), &ctx());
        assert!(after.mtime > before.mtime);
    }

    #[test]
    fn test_missing_versions() {
        let node = Node::file("/base/f", b"x".to_vec());
        let attr = NodeAttr::from_node(&node, &ctx());
        assert_eq!(attr.ino, 0);
        assert_eq!(attr.mtime, UNIX_EPOCH);
    }

    #[test]
    fn test_block_calculation() {
        let c = ctx();
        let size_blocks = |len: usize| NodeAttr::from_node(&Node::file("/f", vec![b'x'; len]), &c).blocks;
        assert_eq!(size_blocks(0), 0);
        assert_eq!(size_blocks(1), 1);
        assert_eq!(size_blocks(512), 1);
        assert_eq!(size_blocks(513), 2);
    }
}
