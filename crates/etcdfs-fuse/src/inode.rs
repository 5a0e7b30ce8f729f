//! Inode numbering for the FUSE adapter.
//!
//! FUSE addresses entries by inode, while every bridge operation takes a
//! path. This table only remembers which path an inode number was handed
//! out for, plus how many references the kernel holds on it, so entries
//! can be dropped on `forget`. It never holds node data or attributes.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::mapping::normalize_path;

/// Reserved inode for the root directory.
pub const ROOT_INO: u64 = 1;

/// First inode handed out when a node's created version cannot be used.
pub const SYNTHETIC_INO_BASE: u64 = 1 << 48;

struct Maps {
    path_to_ino: HashMap<String, u64>,
    ino_to_path: HashMap<u64, String>,
    /// Kernel lookup counts; inodes only handed out in listings have none.
    lookups: HashMap<u64, u64>,
    next_synthetic: u64,
}

impl Maps {
    fn usable(&self, preferred: u64) -> bool {
        preferred > ROOT_INO
            && preferred < SYNTHETIC_INO_BASE
            && !self.ino_to_path.contains_key(&preferred)
    }

    fn assign(&mut self, normalized: String, preferred: u64) -> u64 {
        if let Some(&ino) = self.path_to_ino.get(&normalized) {
            return ino;
        }

        let ino = if self.usable(preferred) {
            preferred
        } else {
            let ino = self.next_synthetic;
            self.next_synthetic += 1;
            ino
        };

        self.path_to_ino.insert(normalized.clone(), ino);
        self.ino_to_path.insert(ino, normalized);
        ino
    }

    fn remove_ino(&mut self, ino: u64) {
        self.lookups.remove(&ino);
        if let Some(path) = self.ino_to_path.remove(&ino) {
            self.path_to_ino.remove(&path);
        }
    }
}

/// Bidirectional inode <-> path table.
pub struct InodeTable {
    maps: RwLock<Maps>,
}

impl InodeTable {
    /// Create a new table with the root directory mapped.
    pub fn new() -> Self {
        let mut path_to_ino = HashMap::new();
        let mut ino_to_path = HashMap::new();
        path_to_ino.insert("/".to_string(), ROOT_INO);
        ino_to_path.insert(ROOT_INO, "/".to_string());

        InodeTable {
            maps: RwLock::new(Maps {
                path_to_ino,
                ino_to_path,
                lookups: HashMap::new(),
                next_synthetic: SYNTHETIC_INO_BASE,
            }),
        }
    }

    /// Get the inode for `path`, assigning one if needed.
    ///
    /// `preferred` (normally the node's created version) is used when it is
    /// non-zero, outside the reserved ranges and not held by another path.
    pub fn assign(&self, path: &str, preferred: u64) -> u64 {
        let normalized = normalize_path(path);

        if let Some(&ino) = self.maps.read().path_to_ino.get(&normalized) {
            return ino;
        }

        // Another thread may have assigned it between the two locks
        self.maps.write().assign(normalized, preferred)
    }

    /// Assign like [`assign`](Self::assign) and count one kernel reference.
    ///
    /// Call this for every inode returned in an entry reply (lookup, create,
    /// mkdir); the kernel releases those references through [`forget`](Self::forget).
    pub fn lookup(&self, path: &str, preferred: u64) -> u64 {
        let mut maps = self.maps.write();
        let ino = maps.assign(normalize_path(path), preferred);
        if ino != ROOT_INO {
            *maps.lookups.entry(ino).or_insert(0) += 1;
        }
        ino
    }

    /// Drop `nlookup` kernel references; the mapping goes once none remain.
    pub fn forget(&self, ino: u64, nlookup: u64) {
        if ino == ROOT_INO {
            return;
        }
        let mut maps = self.maps.write();
        let Some(count) = maps.lookups.get_mut(&ino) else {
            return;
        };
        *count = count.saturating_sub(nlookup);
        if *count == 0 {
            maps.remove_ino(ino);
        }
    }

    /// Inode to report for `path` in a directory listing.
    ///
    /// Listings do not add kernel references, so an unmapped path with a
    /// usable created version is reported without being recorded.
    pub fn peek(&self, path: &str, preferred: u64) -> u64 {
        let normalized = normalize_path(path);
        {
            let maps = self.maps.read();
            if let Some(&ino) = maps.path_to_ino.get(&normalized) {
                return ino;
            }
            if maps.usable(preferred) {
                return preferred;
            }
        }
        self.maps.write().assign(normalized, preferred)
    }

    /// Get inode for a path (if assigned).
    pub fn get_ino(&self, path: &str) -> Option<u64> {
        self.maps.read().path_to_ino.get(&normalize_path(path)).copied()
    }

    /// Get path for an inode (if assigned).
    pub fn get_path(&self, ino: u64) -> Option<String> {
        self.maps.read().ino_to_path.get(&ino).cloned()
    }

    /// Forget a path after it was removed.
    pub fn remove_path(&self, path: &str) {
        let normalized = normalize_path(path);
        if normalized == "/" {
            return;
        }
        let mut maps = self.maps.write();
        if let Some(ino) = maps.path_to_ino.get(&normalized).copied() {
            maps.remove_ino(ino);
        }
    }

    /// Resolve a child path from parent inode and name.
    pub fn resolve_child(&self, parent_ino: u64, name: &str) -> Option<String> {
        let parent_path = self.get_path(parent_ino)?;
        Some(child_path(&parent_path, name))
    }

    /// Inode of the directory containing `ino` (the root is its own parent).
    pub fn parent_ino(&self, ino: u64) -> u64 {
        let Some(path) = self.get_path(ino) else {
            return ROOT_INO;
        };
        let parent = match path.rsplit_once('/') {
            Some((p, _)) if !p.is_empty() => p.to_string(),
            _ => "/".to_string(),
        };
        self.get_ino(&parent).unwrap_or(ROOT_INO)
    }

    /// Number of mapped paths, including the root.
    pub fn len(&self) -> usize {
        self.maps.read().path_to_ino.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Join a directory path and an entry name.
pub fn child_path(parent_path: &str, name: &str) -> String {
    if parent_path == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent_path, name)
    }
}
