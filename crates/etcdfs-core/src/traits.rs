use async_trait::async_trait;

use crate::error::StoreError;

/// Separator between key segments.
pub const KEY_SEPARATOR: char = '/';

/// Snapshot of a single store entry returned by one call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Node {
    /// Absolute key within the store namespace.
    pub key: String,
    /// Whether this entry is a directory.
    pub is_dir: bool,
    /// Value bytes (empty for directories).
    pub value: Vec<u8>,
    /// Direct children, only populated when a directory was read.
    pub children: Vec<Node>,
    /// Store index at which the key was created (0 if unknown).
    pub created_version: u64,
    /// Store index of the last modification (0 if unknown).
    pub modified_version: u64,
}

impl Node {
    /// Create a file node.
    pub fn file(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Node {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    /// Create a directory node.
    pub fn dir(key: impl Into<String>) -> Self {
        Node {
            key: key.into(),
            is_dir: true,
            ..Default::default()
        }
    }

    /// Set the version counters.
    pub fn with_versions(mut self, created: u64, modified: u64) -> Self {
        self.created_version = created;
        self.modified_version = modified;
        self
    }

    /// Attach listed children.
    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }
}

/// Options for [`Store::read`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Read the key as a directory and list its direct children.
    pub dir: bool,
}

impl ReadOptions {
    pub fn dir() -> Self {
        ReadOptions { dir: true }
    }
}

/// Options for [`Store::write`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Create a directory instead of setting a value.
    pub dir: bool,
    /// Existence precondition: `Some(false)` requires the key to be absent,
    /// `Some(true)` requires it to be present.
    pub prev_exist: Option<bool>,
    /// Require the node's current `modified_version` to equal this value.
    pub prev_index: Option<u64>,
}

impl WriteOptions {
    /// Unconditional value write.
    pub fn value() -> Self {
        WriteOptions::default()
    }

    /// Create a value only if the key is absent.
    pub fn create_file() -> Self {
        WriteOptions {
            prev_exist: Some(false),
            ..Default::default()
        }
    }

    /// Create a directory only if the key is absent.
    pub fn create_dir() -> Self {
        WriteOptions {
            dir: true,
            prev_exist: Some(false),
            ..Default::default()
        }
    }

    /// Overwrite a value only if it is still at `modified_version`.
    pub fn compare_and_swap(modified_version: u64) -> Self {
        WriteOptions {
            prev_index: Some(modified_version),
            ..Default::default()
        }
    }
}

/// Options for [`Store::delete`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Delete an (empty) directory instead of a value.
    pub dir: bool,
}

impl DeleteOptions {
    pub fn file() -> Self {
        DeleteOptions { dir: false }
    }

    pub fn dir() -> Self {
        DeleteOptions { dir: true }
    }
}

/// A connected handle to a hierarchical key-value store.
///
/// Implementations must be safe for concurrent use; the filesystem layer
/// shares a single handle across all FUSE callbacks.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Fetch the node at `key`. With `opts.dir`, directory children are listed.
    async fn read(&self, key: &str, opts: ReadOptions) -> Result<Node, StoreError>;

    /// Set `key` to `value` (or create a directory) subject to the preconditions in `opts`.
    async fn write(&self, key: &str, value: &[u8], opts: WriteOptions) -> Result<Node, StoreError>;

    /// Delete `key`. Directories must be empty.
    async fn delete(&self, key: &str, opts: DeleteOptions) -> Result<(), StoreError>;
}
