//! Construction-time errors for the worker pool.
//!
//! Per-job completion outcomes are *not* represented here: they travel
//! through the raw `i32` convention described in the crate's module-level
//! docs (`0` success, `-1` EOF, positive = errno), because a completion is
//! delivered through a callback, not a `Result`. This type only covers the
//! ways constructing or driving the pool itself can fail.

use std::io;

/// Errors that can occur while creating or operating the worker pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// `nthreads` was zero (after CPU autodetection) or negative, or every
    /// worker thread failed to start.
    #[error("no worker threads could be started")]
    NoWorkersStarted,

    /// A syscall needed to build a worker's readiness queue or wake pair
    /// failed.
    #[error("I/O setup failed: {0}")]
    Io(#[from] io::Error),
}

impl From<PoolError> for io::Error {
    fn from(err: PoolError) -> io::Error {
        match err {
            PoolError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
