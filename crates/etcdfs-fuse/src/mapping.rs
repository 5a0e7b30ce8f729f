//! Mount context and the pure path <-> key mapping.

use etcdfs_core::KEY_SEPARATOR;

/// Immutable per-mount settings shared by every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountContext {
    base_key: String,
    /// Owner uid reported for every entry.
    pub owner_uid: u32,
    /// Owner gid reported for every entry.
    pub owner_gid: u32,
    /// Permission bits reported for every entry.
    pub file_mode: u16,
}

fn segments(s: &str) -> impl Iterator<Item = &str> {
    s.split(KEY_SEPARATOR).filter(|seg| !seg.is_empty())
}

/// Canonical form of a filesystem path: leading `/`, no empty segments.
pub fn normalize_path(path: &str) -> String {
    format!("/{}", segments(path).collect::<Vec<_>>().join("/"))
}

/// Name of `child_key` relative to `parent_key`, if it is a direct child.
///
/// Keys are compared segment by segment, so a key that merely contains the
/// parent's text somewhere else is never mistaken for a child.
pub fn child_name(parent_key: &str, child_key: &str) -> Option<String> {
    let mut child = segments(child_key);
    for parent_seg in segments(parent_key) {
        if child.next()? != parent_seg {
            return None;
        }
    }
    let name = child.next()?;
    match child.next() {
        Some(_) => None,
        None => Some(name.to_string()),
    }
}

impl MountContext {
    /// Create a context rooted at `base_key`. The key is normalized.
    pub fn new(base_key: &str, owner_uid: u32, owner_gid: u32, file_mode: u16) -> Self {
        MountContext {
            base_key: normalize_path(base_key),
            owner_uid,
            owner_gid,
            file_mode,
        }
    }

    /// Store key the mount is rooted at.
    pub fn base_key(&self) -> &str {
        &self.base_key
    }

    /// Store key for a filesystem path.
    pub fn path_to_key(&self, path: &str) -> String {
        let relative = segments(path).collect::<Vec<_>>().join("/");
        if relative.is_empty() {
            self.base_key.clone()
        } else if self.base_key == "/" {
            format!("/{}", relative)
        } else {
            format!("{}/{}", self.base_key, relative)
        }
    }

    /// Filesystem path for a store key, or `None` if the key lies outside
    /// the mount.
    pub fn key_to_path(&self, key: &str) -> Option<String> {
        let mut key_segs = segments(key);
        for base_seg in segments(&self.base_key) {
            if key_segs.next()? != base_seg {
                return None;
            }
        }
        Some(format!("/{}", key_segs.collect::<Vec<_>>().join("/")))
    }
}
