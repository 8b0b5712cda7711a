//! The per-request state machine (`Job`).
//!
//! A `Job` is a cheap, `Copy` handle around a heap-allocated, refcounted
//! [`JobInner`] — the same shape the design notes call for: "model the Job
//! as a shared handle (atomic refcount) whose raw pointer is stashed as the
//! readiness cookie; reconstitute the handle on wake." The allocation is
//! created once by [`Job::read`]/[`Job::write`]/[`Job::accept`] and torn
//! down by the pool exactly when the refcount reaches zero, mirroring
//! `IOMP_COMPLETE` in the original C sources.

use std::fmt;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Mutex;

/// What kind of operation a job drives. Fixed at construction; untouched by
/// resubmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Read,
    Write,
    Accept,
    /// The pool's internal shutdown sentinel. Never user-constructed.
    Stop,
}

struct Callbacks {
    complete: Box<dyn FnMut(Job, i32) + Send>,
    /// Taken (and thus fired) exactly once, when the refcount reaches zero.
    release: Option<Box<dyn FnOnce(Job) + Send>>,
}

pub(crate) struct JobInner {
    /// Intrusive FIFO linkage used by [`crate::queue::JobQueue`]. `null`
    /// means "not currently the tail's successor" / "unlinked".
    pub(crate) link: AtomicPtr<JobInner>,
    fildes: RawFd,
    buf: Option<NonNull<u8>>,
    nbytes: usize,
    timeout_ms: i32,
    /// Bytes already transferred. Only ever written by whichever worker
    /// currently owns the job (queue -> worker -> readiness registration ->
    /// worker), so a plain atomic (not a lock) is enough to let `Job::offset`
    /// be read safely from anywhere.
    offset: AtomicUsize,
    kind: Kind,
    refcnt: AtomicUsize,
    /// `None` only for the Stop sentinel, which never completes through the
    /// ordinary callback path.
    callbacks: Option<Mutex<Callbacks>>,
}

// SAFETY: `JobInner` is only ever mutated (beyond the atomics) by whichever
// single subsystem currently owns the job, per the handoff discipline in
// the crate's concurrency model (queue -> worker -> readiness queue ->
// worker). The `buf` pointer is never dereferenced except by that owner.
unsafe impl Send for JobInner {}
unsafe impl Sync for JobInner {}

/// A handle to an in-flight (or not-yet-submitted) asynchronous operation.
///
/// `Job` is `Copy`: every copy refers to the same underlying allocation.
/// The allocation is freed automatically once its refcount reaches zero
/// (after `complete` returns and, if supplied, `release` has run) — there
/// is no `Drop` impl on `Job` itself, since an arbitrary number of `Copy`
/// handles to the same job may be outstanding at once (on the queue, in a
/// readiness registration, in a worker's hand).
#[derive(Clone, Copy)]
pub struct Job(pub(crate) NonNull<JobInner>);

unsafe impl Send for Job {}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("fildes", &self.fildes())
            .field("nbytes", &self.nbytes())
            .field("offset", &self.offset())
            .finish()
    }
}

impl Job {
    fn new(
        kind: Kind,
        fildes: RawFd,
        buf: Option<NonNull<u8>>,
        nbytes: usize,
        complete: Box<dyn FnMut(Job, i32) + Send>,
        release: Box<dyn FnOnce(Job) + Send>,
    ) -> Job {
        let inner = Box::new(JobInner {
            link: AtomicPtr::new(std::ptr::null_mut()),
            fildes,
            buf,
            nbytes,
            timeout_ms: -1,
            offset: AtomicUsize::new(0),
            kind,
            refcnt: AtomicUsize::new(0),
            callbacks: Some(Mutex::new(Callbacks {
                complete,
                release: Some(release),
            })),
        });
        Job(NonNull::new(Box::into_raw(inner)).expect("Box pointer is never null"))
    }

    /// Build a read job.
    ///
    /// # Safety
    ///
    /// `buf` must be valid for reads and writes of `nbytes` bytes and must
    /// remain exclusively owned by this job — not touched by any other
    /// code — until `complete` is invoked. `fildes` must already be
    /// non-blocking; the core never calls `fcntl` on behalf of the caller.
    pub unsafe fn read(
        fildes: RawFd,
        buf: *mut u8,
        nbytes: usize,
        complete: impl FnMut(Job, i32) + Send + 'static,
        release: impl FnOnce(Job) + Send + 'static,
    ) -> Job {
        Job::new(
            Kind::Read,
            fildes,
            NonNull::new(buf),
            nbytes,
            Box::new(complete),
            Box::new(release),
        )
    }

    /// Build a write job. Same safety contract as [`Job::read`], except the
    /// core only reads through `buf`.
    pub unsafe fn write(
        fildes: RawFd,
        buf: *const u8,
        nbytes: usize,
        complete: impl FnMut(Job, i32) + Send + 'static,
        release: impl FnOnce(Job) + Send + 'static,
    ) -> Job {
        Job::new(
            Kind::Write,
            fildes,
            NonNull::new(buf as *mut u8),
            nbytes,
            Box::new(complete),
            Box::new(release),
        )
    }

    /// Build an accept job. No buffer is involved, so this constructor is
    /// safe: `fildes` must be a non-blocking listening socket.
    pub fn accept(
        fildes: RawFd,
        complete: impl FnMut(Job, i32) + Send + 'static,
        release: impl FnOnce(Job) + Send + 'static,
    ) -> Job {
        Job::new(
            Kind::Accept,
            fildes,
            None,
            0,
            Box::new(complete),
            Box::new(release),
        )
    }

    /// Create the pool's single stop sentinel. Not part of the public API:
    /// the sentinel never goes through `complete`/`release`.
    pub(crate) fn new_stop() -> Job {
        let inner = Box::new(JobInner {
            link: AtomicPtr::new(std::ptr::null_mut()),
            fildes: -1,
            buf: None,
            nbytes: 0,
            timeout_ms: -1,
            offset: AtomicUsize::new(0),
            kind: Kind::Stop,
            refcnt: AtomicUsize::new(0),
            callbacks: None,
        });
        Job(NonNull::new(Box::into_raw(inner)).expect("Box pointer is never null"))
    }

    /// Free the pool's stop sentinel. The sentinel carries no callbacks and
    /// is never submitted through the ordinary refcounted path, so it never
    /// goes through [`Job::finish`] — the pool owns it directly and must
    /// free it explicitly once every worker has observed it and exited.
    ///
    /// # Safety
    /// Caller must ensure no worker can still reach this job (i.e. every
    /// worker thread has already exited) and that this is called at most
    /// once.
    pub(crate) unsafe fn free_stop(self) {
        debug_assert_eq!(self.kind(), Kind::Stop, "only the stop sentinel frees this way");
        drop(Box::from_raw(self.0.as_ptr()));
    }

    #[inline]
    pub(crate) fn inner(&self) -> &JobInner {
        // SAFETY: a `Job` handle is only ever constructed from a live
        // allocation, and the allocation is freed only by `Job::finish`
        // after the last handle's use (see module docs).
        unsafe { self.0.as_ref() }
    }

    pub(crate) fn kind(&self) -> Kind {
        self.inner().kind
    }

    /// The descriptor this job operates on.
    pub fn fildes(&self) -> RawFd {
        self.inner().fildes
    }

    /// The requested transfer size (`0` for accept jobs).
    pub fn nbytes(&self) -> usize {
        self.inner().nbytes
    }

    /// Whether this job carries a non-null buffer. `false` for accept jobs
    /// and for a read/write job built with a null pointer — both of which
    /// the facade rejects with `EINVAL` before ever dispatching the job.
    pub(crate) fn has_buf(&self) -> bool {
        self.inner().buf.is_some()
    }

    /// Bytes already transferred. Monotonically non-decreasing.
    pub fn offset(&self) -> usize {
        self.inner().offset.load(Ordering::Acquire)
    }

    /// The reserved per-job timeout. Never enforced by the core (see
    /// DESIGN.md): surfaced for callers who want to build their own
    /// deadline layer on top.
    pub fn timeout_ms(&self) -> i32 {
        self.inner().timeout_ms
    }

    pub(crate) fn set_offset(&self, offset: usize) {
        self.inner().offset.store(offset, Ordering::Release);
    }

    /// Raw pointer into the job's buffer at the current offset, valid for
    /// `nbytes - offset` bytes.
    ///
    /// # Safety
    /// Caller must uphold the aliasing contract documented on
    /// [`Job::read`]/[`Job::write`]. Panics if this is an accept job.
    pub(crate) unsafe fn buf_ptr_at_offset(&self) -> *mut u8 {
        let inner = self.inner();
        let base = inner.buf.expect("accept jobs have no buffer").as_ptr();
        base.add(inner.offset.load(Ordering::Acquire))
    }

    pub(crate) fn remaining(&self) -> usize {
        self.nbytes() - self.offset()
    }

    /// One atomic acquire of a reference. Called by `submit_*` (including
    /// resubmission from inside `complete`).
    pub(crate) fn retain(&self) {
        self.inner().refcnt.fetch_add(1, Ordering::AcqRel);
    }

    /// Intrusive link accessor used by [`crate::queue::JobQueue`].
    pub(crate) fn link(&self) -> &AtomicPtr<JobInner> {
        &self.inner().link
    }

    pub(crate) fn as_raw(&self) -> *mut JobInner {
        self.0.as_ptr()
    }

    /// # Safety
    /// `ptr` must have come from [`Job::as_raw`] on a still-live job.
    pub(crate) unsafe fn from_raw(ptr: *mut JobInner) -> Job {
        Job(NonNull::new_unchecked(ptr))
    }

    /// Invoke `complete(self, error)` exactly once, then release one
    /// reference; if that was the last one, run the user's `release` hook
    /// and free the allocation. This is the sole teardown path for every
    /// job: every `retain` must be balanced by exactly one `finish`.
    pub(crate) fn finish(self, error: i32) {
        debug_assert_ne!(self.kind(), Kind::Stop, "the stop sentinel never completes");
        {
            let cb_lock = self
                .inner()
                .callbacks
                .as_ref()
                .expect("non-stop jobs always carry callbacks");
            let mut cb = cb_lock.lock().unwrap_or_else(|e| e.into_inner());
            (cb.complete)(self, error);
        }
        if self.inner().refcnt.fetch_sub(1, Ordering::AcqRel) == 1 {
            let release = {
                let cb_lock = self.inner().callbacks.as_ref().unwrap();
                let mut cb = cb_lock.lock().unwrap_or_else(|e| e.into_inner());
                cb.release.take()
            };
            if let Some(release) = release {
                release(self);
            }
            // SAFETY: refcount is zero, so no other handle can observe or
            // reach this allocation from here on; we are the sole owner.
            unsafe {
                drop(Box::from_raw(self.0.as_ptr()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn accessors_reflect_construction() {
        let mut buf = [0u8; 4];
        let job = unsafe {
            Job::read(
                7,
                buf.as_mut_ptr(),
                buf.len(),
                |_job, _err| {},
                |_job| {},
            )
        };
        assert_eq!(job.fildes(), 7);
        assert_eq!(job.nbytes(), 4);
        assert_eq!(job.offset(), 0);
        job.retain();
        job.finish(0);
    }

    #[test]
    fn complete_runs_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_complete = calls.clone();
        let job = Job::accept(
            -1,
            move |_job, _err| {
                calls_in_complete.fetch_add(1, Ordering::SeqCst);
            },
            |_job| {},
        );
        job.retain();
        job.finish(0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_runs_only_after_last_reference() {
        let released = Arc::new(AtomicUsize::new(0));
        let released_in_release = released.clone();
        let job = Job::accept(
            -1,
            |_job, _err| {},
            move |_job| {
                released_in_release.fetch_add(1, Ordering::SeqCst);
            },
        );

        // Two references outstanding, as if the job were submitted twice
        // (e.g. resubmitted from inside a prior completion) before either
        // completion ran.
        job.retain();
        job.retain();

        job.finish(0);
        assert_eq!(released.load(Ordering::SeqCst), 0, "release must wait for the second reference");

        job.finish(0);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resubmission_pattern_keeps_allocation_alive() {
        // Mirrors what `Pool::submit_read` does: `retain` then hand the
        // job to the queue. Resubmitting from inside `complete` should
        // keep the same allocation alive across multiple completions.
        let completions = Arc::new(AtomicUsize::new(0));
        let job = Job::accept(-1, |_job, _err| {}, |_job| {});
        job.retain();

        for _ in 0..3 {
            completions.fetch_add(1, Ordering::SeqCst);
            job.retain(); // fresh reference for the "next" submission
            job.finish(0); // release this submission's reference
        }

        assert_eq!(completions.load(Ordering::SeqCst), 3);
        // Drop the final outstanding reference.
        job.finish(0);
    }
}
