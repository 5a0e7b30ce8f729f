use std::fmt;

/// Classified error condition reported by the store.
///
/// Numeric codes follow the etcd v2 keys API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// 100: the key does not exist.
    KeyNotFound,
    /// 101: a `prevIndex`/`prevValue` precondition did not hold.
    CompareFailed,
    /// 102: a file operation was applied to a directory.
    NotAFile,
    /// 104: a directory operation was applied to a file.
    NotADirectory,
    /// 105: `prevExist=false` and the key is present.
    NodeExists,
    /// 107: the store root cannot be modified.
    RootReadOnly,
    /// 108: a non-recursive directory delete found children.
    DirNotEmpty,
    /// 110: the caller lacks permission for the key.
    Unauthorized,
    /// Any other store-coded error.
    Other(u32),
}

impl StoreErrorKind {
    /// Classify a numeric store error code.
    pub fn from_code(code: u32) -> Self {
        match code {
            100 => StoreErrorKind::KeyNotFound,
            101 => StoreErrorKind::CompareFailed,
            102 => StoreErrorKind::NotAFile,
            104 => StoreErrorKind::NotADirectory,
            105 => StoreErrorKind::NodeExists,
            107 => StoreErrorKind::RootReadOnly,
            108 => StoreErrorKind::DirNotEmpty,
            110 => StoreErrorKind::Unauthorized,
            other => StoreErrorKind::Other(other),
        }
    }

    /// The numeric store error code.
    pub fn code(&self) -> u32 {
        match self {
            StoreErrorKind::KeyNotFound => 100,
            StoreErrorKind::CompareFailed => 101,
            StoreErrorKind::NotAFile => 102,
            StoreErrorKind::NotADirectory => 104,
            StoreErrorKind::NodeExists => 105,
            StoreErrorKind::RootReadOnly => 107,
            StoreErrorKind::DirNotEmpty => 108,
            StoreErrorKind::Unauthorized => 110,
            StoreErrorKind::Other(code) => *code,
        }
    }
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StoreErrorKind::KeyNotFound => "key not found",
            StoreErrorKind::CompareFailed => "compare failed",
            StoreErrorKind::NotAFile => "not a file",
            StoreErrorKind::NotADirectory => "not a directory",
            StoreErrorKind::NodeExists => "key already exists",
            StoreErrorKind::RootReadOnly => "root is read only",
            StoreErrorKind::DirNotEmpty => "directory not empty",
            StoreErrorKind::Unauthorized => "insufficient permissions",
            StoreErrorKind::Other(_) => "store error",
        };
        write!(f, "{} ({})", text, self.code())
    }
}

/// Errors that can occur in store operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The store answered with a coded error.
    #[error("Store error {kind} on '{cause}': {message}")]
    Remote {
        kind: StoreErrorKind,
        message: String,
        cause: String,
    },

    /// The store could not be reached.
    #[error("Connection to store at '{endpoint}' failed")]
    ConnectionFailed {
        endpoint: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The request did not complete within the client timeout.
    #[error("Store request '{operation}' timed out for key: {key}")]
    Timeout { operation: String, key: String },

    /// The store answered with something that is not a valid response.
    #[error("Malformed store response: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Build a coded store error.
    pub fn remote(kind: StoreErrorKind, message: impl Into<String>, cause: impl Into<String>) -> Self {
        StoreError::Remote {
            kind,
            message: message.into(),
            cause: cause.into(),
        }
    }

    /// The coded kind, if the store itself reported this error.
    pub fn kind(&self) -> Option<StoreErrorKind> {
        match self {
            StoreError::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true if the store reported that the key does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind() == Some(StoreErrorKind::KeyNotFound)
    }
}
