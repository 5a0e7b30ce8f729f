//! Filesystem error conditions and the store-error translation table.

use etcdfs_core::{StoreError, StoreErrorKind};

use crate::async_bridge::FuseError;

/// Errors returned by filesystem operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsOpError {
    #[error("no such file or directory")]
    NotFound,
    /// The node changed underneath a conditional write.
    #[error("stale file handle")]
    Stale,
    #[error("is a directory")]
    IsDir,
    #[error("not a directory")]
    NotDir,
    #[error("file exists")]
    Exists,
    #[error("permission denied")]
    PermissionDenied,
    #[error("directory not empty")]
    NotEmpty,
    #[error("operation not permitted")]
    NotPermitted,
    /// Fallback for store errors without a specific mapping.
    #[error("invalid argument")]
    InvalidArg,
    #[error("operation not supported")]
    NotSupported,
    /// The resulting value would exceed the largest value the store accepts.
    #[error("file too large")]
    FileTooLarge,
    /// Transport or runtime failure; never produced by the translation table.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Translate a store error kind into a filesystem condition.
pub fn translate(kind: StoreErrorKind) -> FsOpError {
    match kind {
        StoreErrorKind::KeyNotFound => FsOpError::NotFound,
        StoreErrorKind::CompareFailed => FsOpError::Stale,
        StoreErrorKind::NotAFile => FsOpError::IsDir,
        StoreErrorKind::NotADirectory => FsOpError::NotDir,
        StoreErrorKind::NodeExists => FsOpError::Exists,
        StoreErrorKind::RootReadOnly => FsOpError::PermissionDenied,
        StoreErrorKind::DirNotEmpty => FsOpError::NotEmpty,
        StoreErrorKind::Unauthorized => FsOpError::NotPermitted,
        StoreErrorKind::Other(_) => FsOpError::InvalidArg,
    }
}

impl From<StoreError> for FsOpError {
    fn from(e: StoreError) -> Self {
        match e.kind() {
            Some(kind) => translate(kind),
            None => FsOpError::Io(e.to_string()),
        }
    }
}

impl From<FuseError> for FsOpError {
    fn from(e: FuseError) -> Self {
        FsOpError::Io(e.to_string())
    }
}

#[cfg(unix)]
impl FsOpError {
    /// Convert to a libc errno.
    pub fn to_errno(&self) -> i32 {
        match self {
            FsOpError::NotFound => libc::ENOENT,
            FsOpError::Stale => libc::ESTALE,
            FsOpError::IsDir => libc::EISDIR,
            FsOpError::NotDir => libc::ENOTDIR,
            FsOpError::Exists => libc::EEXIST,
            FsOpError::PermissionDenied => libc::EACCES,
            FsOpError::NotEmpty => libc::ENOTEMPTY,
            FsOpError::NotPermitted => libc::EPERM,
            FsOpError::InvalidArg => libc::EINVAL,
            FsOpError::NotSupported => libc::ENOTSUP,
            FsOpError::FileTooLarge => libc::EFBIG,
            FsOpError::Io(_) => libc::EIO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_table() {
        let table = [
            (100, FsOpError::NotFound),
            (101, FsOpError::Stale),
            (102, FsOpError::IsDir),
            (104, FsOpError::NotDir),
            (105, FsOpError::Exists),
            (107, FsOpError::PermissionDenied),
            (108, FsOpError::NotEmpty),
            (110, FsOpError::NotPermitted),
        ];
        for (code, expected) in table {
            assert_eq!(translate(StoreErrorKind::from_code(code)), expected, "code {}", code);
        }
    }

    #[test]
    fn test_unknown_codes_fall_back_to_invalid_argument() {
        for code in [103, 106, 200, 300, 401] {
            assert_eq!(translate(StoreErrorKind::from_code(code)), FsOpError::InvalidArg);
        }
    }

    #[test]
    fn test_transport_errors_are_not_translated() {
        let err = StoreError::Protocol("garbage".to_string());
        assert!(matches!(FsOpError::from(err), FsOpError::Io(_)));

        let err = StoreError::Timeout {
            operation: "read".to_string(),
            key: "/k".to_string(),
        };
        assert!(matches!(FsOpError::from(err), FsOpError::Io(_)));
    }

    #[test]
    fn test_runtime_errors_are_io() {
        assert!(matches!(FsOpError::from(FuseError::NotInitialized), FsOpError::Io(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_error_to_errno_mapping() {
        assert_eq!(FsOpError::NotFound.to_errno(), libc::ENOENT);
        assert_eq!(FsOpError::Stale.to_errno(), libc::ESTALE);
        assert_eq!(FsOpError::IsDir.to_errno(), libc::EISDIR);
        assert_eq!(FsOpError::NotDir.to_errno(), libc::ENOTDIR);
        assert_eq!(FsOpError::Exists.to_errno(), libc::EEXIST);
        assert_eq!(FsOpError::PermissionDenied.to_errno(), libc::EACCES);
        assert_eq!(FsOpError::NotEmpty.to_errno(), libc::ENOTEMPTY);
        assert_eq!(FsOpError::NotPermitted.to_errno(), libc::EPERM);
        assert_eq!(FsOpError::InvalidArg.to_errno(), libc::EINVAL);
        assert_eq!(FsOpError::NotSupported.to_errno(), libc::ENOTSUP);
        assert_eq!(FsOpError::FileTooLarge.to_errno(), libc::EFBIG);
        assert_eq!(FsOpError::Io("x".to_string()).to_errno(), libc::EIO);
    }
}
