//! Bridge between synchronous FUSE callbacks and the async store client.
//!
//! FUSE callbacks are synchronous, but store operations are async.
//! Every callback blocks its own thread on a shared runtime.

use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Runtime};

/// Global tokio runtime for FUSE callbacks.
///
/// Stores the result of runtime creation so that initialization errors are
/// propagated without panicking.
static RUNTIME: OnceLock<Result<Runtime, String>> = OnceLock::new();

/// Initialize the async runtime for FUSE operations.
pub fn init_runtime() -> Result<&'static Runtime, FuseError> {
    let result = RUNTIME.get_or_init(|| {
        Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("etcdfs-worker")
            .enable_all()
            .build()
            .map_err(|e| e.to_string())
    });
    match result {
        Ok(rt) => Ok(rt),
        Err(e) => Err(FuseError::RuntimeInit(e.clone())),
    }
}

/// Get the FUSE async runtime, returning an error if not initialized.
pub fn runtime() -> Result<&'static Runtime, FuseError> {
    match RUNTIME.get() {
        Some(Ok(rt)) => Ok(rt),
        Some(Err(e)) => Err(FuseError::RuntimeInit(e.clone())),
        None => Err(FuseError::NotInitialized),
    }
}

/// Run an async operation to completion on the calling thread.
///
/// # Example
/// ```ignore
/// let node = block_on(async { store.read(&key, ReadOptions::default()).await })??;
/// ```
pub fn block_on<F, T>(future: F) -> Result<T, FuseError>
where
    F: Future<Output = T>,
{
    let rt = runtime()?;
    Ok(rt.block_on(future))
}

/// Errors raised by the runtime bridge itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FuseError {
    /// The runtime could not be built.
    #[error("Failed to create FUSE async runtime: {0}")]
    RuntimeInit(String),
    /// `block_on` was called before `init_runtime`.
    #[error("FUSE runtime not initialized - call init_runtime first")]
    NotInitialized,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_init_idempotent() {
        let rt1 = init_runtime().unwrap();
        let rt2 = init_runtime().unwrap();
        assert!(std::ptr::eq(rt1, rt2));
    }

    #[test]
    fn test_block_on() {
        init_runtime().unwrap();
        let result = block_on(async {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            "hello"
        })
        .unwrap();
        assert_eq!(result, "hello");
    }

    #[test]
    fn test_block_on_from_multiple_threads() {
        init_runtime().unwrap();
        let handles: Vec<_> = (0..4)
            .map(|i| std::thread::spawn(move || block_on(async move { i * 2 }).unwrap()))
            .collect();
        let mut results: Vec<i32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort();
        assert_eq!(results, vec![0, 2, 4, 6]);
    }

    #[test]
    fn test_error_display() {
        assert!(FuseError::NotInitialized.to_string().contains("init_runtime"));
        assert!(FuseError::RuntimeInit("boom".to_string()).to_string().contains("boom"));
    }
}
