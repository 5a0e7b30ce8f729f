use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use etcdfs_core::{DeleteOptions, Node, ReadOptions, Store, StoreError, StoreErrorKind, WriteOptions};

use crate::normalize_key;

#[derive(Debug, Clone)]
struct Entry {
    is_dir: bool,
    value: Vec<u8>,
    created: u64,
    modified: u64,
}

struct Tree {
    entries: BTreeMap<String, Entry>,
    index: u64,
}

/// In-memory store with etcd v2 keyspace semantics.
///
/// Writes create missing parent directories, every mutation advances a
/// single global index, and errors carry the same codes the etcd server
/// would return.
pub struct MemoryStore {
    tree: RwLock<Tree>,
}

impl MemoryStore {
    /// Create a store holding only the root directory.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            "/".to_string(),
            Entry {
                is_dir: true,
                value: Vec::new(),
                created: 0,
                modified: 0,
            },
        );
        MemoryStore {
            tree: RwLock::new(Tree { entries, index: 0 }),
        }
    }

    /// The index of the most recent mutation.
    pub fn current_index(&self) -> u64 {
        self.tree.read().unwrap_or_else(|e| e.into_inner()).index
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn error(kind: StoreErrorKind, key: &str) -> StoreError {
    let message = match kind {
        StoreErrorKind::KeyNotFound => "Key not found",
        StoreErrorKind::CompareFailed => "Compare failed",
        StoreErrorKind::NotAFile => "Not a file",
        StoreErrorKind::NotADirectory => "Not a directory",
        StoreErrorKind::NodeExists => "Key already exists",
        StoreErrorKind::RootReadOnly => "Root is read only",
        StoreErrorKind::DirNotEmpty => "Directory not empty",
        StoreErrorKind::Unauthorized => "The request requires user authentication",
        StoreErrorKind::Other(_) => "Store error",
    };
    StoreError::remote(kind, message, key)
}

/// Ancestors of a normalized key, outermost first, excluding the root.
fn ancestors(key: &str) -> Vec<String> {
    let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    (1..segments.len())
        .map(|n| format!("/{}", segments[..n].join("/")))
        .collect()
}

fn child_prefix(key: &str) -> String {
    if key == "/" {
        "/".to_string()
    } else {
        format!("{}/", key)
    }
}

impl Tree {
    fn node(&self, key: &str, entry: &Entry) -> Node {
        Node {
            key: key.to_string(),
            is_dir: entry.is_dir,
            value: entry.value.clone(),
            children: Vec::new(),
            created_version: entry.created,
            modified_version: entry.modified,
        }
    }

    fn children(&self, key: &str) -> Vec<Node> {
        let prefix = child_prefix(key);
        self.entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| k.len() > prefix.len() && !k[prefix.len()..].contains('/'))
            .map(|(k, e)| self.node(k, e))
            .collect()
    }

    fn has_children(&self, key: &str) -> bool {
        let prefix = child_prefix(key);
        self.entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .any(|(k, _)| k.len() > prefix.len())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn read(&self, key: &str, opts: ReadOptions) -> Result<Node, StoreError> {
        let tree = self.tree.read().unwrap_or_else(|e| e.into_inner());
        let key = normalize_key(key);

        let entry = tree
            .entries
            .get(&key)
            .ok_or_else(|| error(StoreErrorKind::KeyNotFound, &key))?;

        let mut node = tree.node(&key, entry);
        if entry.is_dir && opts.dir {
            node.children = tree.children(&key);
        }
        Ok(node)
    }

    async fn write(&self, key: &str, value: &[u8], opts: WriteOptions) -> Result<Node, StoreError> {
        let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());
        let key = normalize_key(key);

        if key == "/" {
            return Err(error(StoreErrorKind::RootReadOnly, &key));
        }

        let existing = tree.entries.get(&key).cloned();

        match (opts.prev_exist, &existing) {
            (Some(false), Some(_)) => return Err(error(StoreErrorKind::NodeExists, &key)),
            (Some(true), None) => return Err(error(StoreErrorKind::KeyNotFound, &key)),
            _ => {}
        }

        if let Some(prev_index) = opts.prev_index {
            match &existing {
                None => return Err(error(StoreErrorKind::KeyNotFound, &key)),
                Some(entry) if entry.modified != prev_index => {
                    return Err(error(StoreErrorKind::CompareFailed, &key));
                }
                Some(_) => {}
            }
        }

        if let Some(entry) = &existing {
            if entry.is_dir || opts.dir {
                return Err(error(StoreErrorKind::NotAFile, &key));
            }
        }

        let parents = ancestors(&key);
        for parent in &parents {
            if let Some(entry) = tree.entries.get(parent) {
                if !entry.is_dir {
                    return Err(error(StoreErrorKind::NotADirectory, parent));
                }
            }
        }

        tree.index += 1;
        let index = tree.index;

        for parent in parents {
            tree.entries.entry(parent).or_insert(Entry {
                is_dir: true,
                value: Vec::new(),
                created: index,
                modified: index,
            });
        }

        let entry = Entry {
            is_dir: opts.dir,
            value: if opts.dir { Vec::new() } else { value.to_vec() },
            created: existing.map(|e| e.created).unwrap_or(index),
            modified: index,
        };
        let node = tree.node(&key, &entry);
        tree.entries.insert(key, entry);

        Ok(node)
    }

    async fn delete(&self, key: &str, opts: DeleteOptions) -> Result<(), StoreError> {
        let mut tree = self.tree.write().unwrap_or_else(|e| e.into_inner());
        let key = normalize_key(key);

        if key == "/" {
            return Err(error(StoreErrorKind::RootReadOnly, &key));
        }

        let is_dir = tree
            .entries
            .get(&key)
            .map(|e| e.is_dir)
            .ok_or_else(|| error(StoreErrorKind::KeyNotFound, &key))?;

        if is_dir {
            if !opts.dir {
                return Err(error(StoreErrorKind::NotAFile, &key));
            }
            if tree.has_children(&key) {
                return Err(error(StoreErrorKind::DirNotEmpty, &key));
            }
        }

        tree.entries.remove(&key);
        tree.index += 1;
        Ok(())
    }
}
