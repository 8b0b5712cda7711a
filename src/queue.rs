//! The pool's FIFO of pending jobs.
//!
//! An intrusive singly linked list: the link pointer lives inside each
//! [`JobInner`] allocation (see `job.rs`) rather than in a separate node, so
//! pushing and popping never allocates. This type carries no lock of its
//! own — `pool.rs` guards it with the same mutex that also guards the
//! active/blocked worker roster, exactly as `iomp_core.lock` covers both
//! the job list and the thread sets in the original source. A single
//! combined lock is what makes "queue is empty, so park" atomic with
//! "mark myself blocked"; two separate locks would open a lost-wakeup
//! window between those two checks.

use std::ptr;
use std::sync::atomic::Ordering;

use crate::job::{Job, JobInner};

pub(crate) struct JobQueue {
    head: *mut JobInner,
    tail: *mut JobInner,
    len: usize,
}

// SAFETY: a `JobQueue` is only ever reached through the pool's mutex; the
// raw pointers inside point at `JobInner` allocations that are themselves
// `Send`/`Sync` (see job.rs).
unsafe impl Send for JobQueue {}

impl JobQueue {
    pub(crate) fn new() -> JobQueue {
        JobQueue {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            len: 0,
        }
    }

    /// Insert at the tail. Caller holds the pool's lock.
    pub(crate) fn push(&mut self, job: Job) {
        job.link().store(ptr::null_mut(), Ordering::Relaxed);
        let raw = job.as_raw();
        if self.tail.is_null() {
            self.head = raw;
        } else {
            // SAFETY: `tail` is a live job owned by this queue until popped.
            unsafe { (*self.tail).link.store(raw, Ordering::Relaxed) };
        }
        self.tail = raw;
        self.len += 1;
    }

    /// Remove from the head, if any. Caller holds the pool's lock.
    pub(crate) fn pop(&mut self) -> Option<Job> {
        if self.head.is_null() {
            return None;
        }
        let raw = self.head;
        // SAFETY: `raw` is a live job owned by this queue.
        let next = unsafe { (*raw).link.load(Ordering::Relaxed) };
        self.head = next;
        if next.is_null() {
            self.tail = ptr::null_mut();
        }
        self.len -= 1;
        // SAFETY: `raw` was pushed as a valid job and has not been freed;
        // popping does not run `finish`, so the refcount is untouched here.
        Some(unsafe { Job::from_raw(raw) })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}
