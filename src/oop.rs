//! `Multiplexer` — an ergonomic wrapper over [`Pool`] for callers who would
//! rather hand over an `FnMut(i32)` closure than build a [`Job`] and supply
//! a separate teardown hook.
//!
//! Grounded on the optional C++ facade in `original_source/iomp.h`
//! (`iomp::IOMultiPlexer` / `iomp::AsyncIO`): that wrapper allocates a
//! fresh `AsyncIO` per call and lets its `release` override simply `delete`
//! itself, rather than reusing one allocation across resubmissions. This
//! type follows the same shape — each `read`/`write`/`accept` call builds
//! its own one-shot [`Job`], so `complete` only ever needs to know the
//! error code, not the job that produced it.

use std::io;
use std::os::unix::io::RawFd;

use crate::job::Job;
use crate::pool::Pool;

/// A safe, closure-based front end for [`Pool`].
pub struct Multiplexer {
    pool: Pool,
}

impl Multiplexer {
    /// Start a multiplexer backed by `nthreads` workers (`0` autodetects).
    pub fn new(nthreads: usize) -> io::Result<Multiplexer> {
        Ok(Multiplexer {
            pool: Pool::new(nthreads)?,
        })
    }

    /// Submit a read. `complete` receives `0` on success, `-1` on EOF, or a
    /// positive errno.
    ///
    /// # Safety
    /// Same contract as [`Job::read`]: `buf` must stay valid and
    /// exclusively owned for `nbytes` bytes until `complete` runs.
    pub unsafe fn read(
        &self,
        fildes: RawFd,
        buf: *mut u8,
        nbytes: usize,
        mut complete: impl FnMut(i32) + Send + 'static,
    ) {
        let job = Job::read(fildes, buf, nbytes, move |_job, error| complete(error), |_job| {});
        self.pool.submit_read(job);
    }

    /// Submit a write. Same completion convention as [`Multiplexer::read`].
    ///
    /// # Safety
    /// Same contract as [`Job::write`].
    pub unsafe fn write(
        &self,
        fildes: RawFd,
        buf: *const u8,
        nbytes: usize,
        mut complete: impl FnMut(i32) + Send + 'static,
    ) {
        let job = Job::write(fildes, buf, nbytes, move |_job, error| complete(error), |_job| {});
        self.pool.submit_write(job);
    }

    /// Submit an accept. `complete(0)` fires once per ready-to-accept
    /// event; call this again from inside `complete` to keep accepting.
    pub fn accept(&self, fildes: RawFd, mut complete: impl FnMut(i32) + Send + 'static) {
        let job = Job::accept(fildes, move |_job, error| complete(error), |_job| {});
        self.pool.submit_accept(job);
    }

    /// Block until every worker has drained and exited.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
