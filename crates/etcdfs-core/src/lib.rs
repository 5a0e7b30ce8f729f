//! Storage abstraction for etcdfs.
//!
//! A [`Store`] is a hierarchical key-value tree in the shape of the etcd v2
//! keys API: keys are `/`-separated paths, directories are nodes without a
//! value, and every node carries the store-wide versions at which it was
//! created and last modified. Failures reported by the store itself carry a
//! [`StoreErrorKind`]; transport failures do not.

mod error;
mod traits;

pub use error::{StoreError, StoreErrorKind};
pub use traits::{DeleteOptions, Node, ReadOptions, Store, WriteOptions, KEY_SEPARATOR};
