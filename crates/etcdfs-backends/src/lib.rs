//! Store implementations for etcdfs.
//!
//! - [`EtcdStore`] talks to an etcd server over the v2 keys HTTP API.
//! - [`MemoryStore`] keeps the tree in process with the same error
//!   semantics, for tests and local experiments.

mod etcd;
mod memory;

pub use etcd::{EtcdStore, EtcdStoreConfig};
pub use memory::MemoryStore;

pub(crate) fn normalize_key(key: &str) -> String {
    let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::normalize_key;

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key(""), "/");
        assert_eq!(normalize_key("/"), "/");
        assert_eq!(normalize_key("a/b"), "/a/b");
        assert_eq!(normalize_key("//a///b/"), "/a/b");
    }
}
