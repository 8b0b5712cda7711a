//! Drain-loop executors shared between a job's first attempt (right after
//! it is popped off the job queue) and a resumed attempt (the worker's
//! readiness queue reported the descriptor ready again).
//!
//! Grounded directly on `do_read`/`do_write` in `iomp.c` (the first-attempt
//! path, which registers on `EAGAIN`) and `on_read`/`on_write` in
//! `iomp_epoll.c` (the resumed path, which leaves the edge-triggered
//! registration armed on `EAGAIN` and unregisters on completion).

use std::io;

use crate::job::Job;
use crate::log::{log_debug, log_warn};
use crate::readiness::ReadinessQueue;

enum Drained {
    Done(i32),
    WouldBlock,
}

fn drain_read(job: Job) -> Drained {
    loop {
        let remaining = job.remaining();
        if remaining == 0 {
            return Drained::Done(0);
        }
        // SAFETY: the buffer is exclusively owned by this job until
        // `complete` fires, per the safety contract on `Job::read`.
        let ptr = unsafe { job.buf_ptr_at_offset() };
        let n = unsafe { libc::read(job.fildes(), ptr as *mut libc::c_void, remaining) };
        if n > 0 {
            job.set_offset(job.offset() + n as usize);
            continue;
        }
        if n == 0 {
            return Drained::Done(-1);
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => return Drained::WouldBlock,
            io::ErrorKind::Interrupted => continue,
            _ => return Drained::Done(err.raw_os_error().unwrap_or(-1)),
        }
    }
}

fn drain_write(job: Job) -> Drained {
    loop {
        let remaining = job.remaining();
        if remaining == 0 {
            return Drained::Done(0);
        }
        // SAFETY: see `Job::write`'s safety contract.
        let ptr = unsafe { job.buf_ptr_at_offset() };
        let n = unsafe { libc::write(job.fildes(), ptr as *const libc::c_void, remaining) };
        if n > 0 {
            job.set_offset(job.offset() + n as usize);
            continue;
        }
        if n == 0 {
            return Drained::Done(-1);
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock => return Drained::WouldBlock,
            io::ErrorKind::Interrupted => continue,
            _ => return Drained::Done(err.raw_os_error().unwrap_or(-1)),
        }
    }
}

/// First attempt at a read job. On `EAGAIN` it registers with the worker's
/// readiness queue instead of blocking — jobs that complete synchronously
/// here never touch the kernel event queue at all (the fast path).
pub(crate) fn start_read(job: Job, readiness: &ReadinessQueue) {
    match drain_read(job) {
        Drained::Done(err) => job.finish(err),
        Drained::WouldBlock => {
            if let Err(e) = readiness.register_read(job.fildes(), job) {
                log_warn!("failed to register read on fd {}: {e}", job.fildes());
                job.finish(e.raw_os_error().unwrap_or(-1));
            }
        }
    }
}

pub(crate) fn start_write(job: Job, readiness: &ReadinessQueue) {
    match drain_write(job) {
        Drained::Done(err) => job.finish(err),
        Drained::WouldBlock => {
            if let Err(e) = readiness.register_write(job.fildes(), job) {
                log_warn!("failed to register write on fd {}: {e}", job.fildes());
                job.finish(e.raw_os_error().unwrap_or(-1));
            }
        }
    }
}

/// Accept jobs are always registered, never attempted synchronously: a
/// listening socket's backlog state at submission time tells us nothing
/// useful, so there is no fast path to try first.
pub(crate) fn start_accept(job: Job, readiness: &ReadinessQueue) {
    if let Err(e) = readiness.register_accept(job.fildes(), job) {
        log_warn!("failed to register accept on fd {}: {e}", job.fildes());
        job.finish(e.raw_os_error().unwrap_or(-1));
    }
}

/// Resume a read job the readiness queue reported ready again.
pub(crate) fn resume_read(job: Job, readiness: &ReadinessQueue) {
    match drain_read(job) {
        Drained::Done(err) => {
            let _ = readiness.unregister_read(job.fildes());
            job.finish(err);
        }
        Drained::WouldBlock => {
            log_debug!("read on fd {} still not ready, staying armed", job.fildes());
        }
    }
}

pub(crate) fn resume_write(job: Job, readiness: &ReadinessQueue) {
    match drain_write(job) {
        Drained::Done(err) => {
            let _ = readiness.unregister_write(job.fildes());
            job.finish(err);
        }
        Drained::WouldBlock => {
            log_debug!("write on fd {} still not ready, staying armed", job.fildes());
        }
    }
}

/// An accept job became readable. Unregister first: accept registration is
/// single-use at this layer, and a caller who wants the next connection
/// resubmits from inside `complete`, which registers afresh.
pub(crate) fn resume_accept(job: Job, readiness: &ReadinessQueue) {
    let _ = readiness.unregister_accept(job.fildes());
    job.finish(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::RawFd;

    /// A nonblocking pipe: `(read_fd, write_fd)`.
    fn nonblocking_pipe() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0, "pipe() failed: {}", io::Error::last_os_error());
        for fd in fds {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
            let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
            assert_eq!(rc, 0, "fcntl() failed: {}", io::Error::last_os_error());
        }
        (fds[0], fds[1])
    }

    /// A read whose data is already buffered must drain synchronously
    /// (`Done`), never reporting `WouldBlock` — the fast path the pool
    /// relies on to skip registering with the readiness queue entirely.
    #[test]
    fn drain_read_completes_fast_path_when_data_already_buffered() {
        let (read_fd, write_fd) = nonblocking_pipe();
        let payload = b"hello";
        let n = unsafe { libc::write(write_fd, payload.as_ptr() as *const libc::c_void, payload.len()) };
        assert_eq!(n as usize, payload.len());

        let mut buf = [0u8; 5];
        let job = unsafe {
            Job::read(read_fd, buf.as_mut_ptr(), buf.len(), |_job, _err| {}, |_job| {})
        };
        job.retain();
        match drain_read(job) {
            Drained::Done(0) => {}
            Drained::Done(other) => panic!("expected success, got code {other}"),
            Drained::WouldBlock => panic!("expected the fast path, got WouldBlock"),
        }
        assert_eq!(&buf, payload);
        job.finish(0);

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    /// A read on an empty nonblocking pipe must report `WouldBlock` rather
    /// than blocking the calling thread.
    #[test]
    fn drain_read_reports_would_block_on_empty_pipe() {
        let (read_fd, write_fd) = nonblocking_pipe();
        let mut buf = [0u8; 5];
        let job = unsafe {
            Job::read(read_fd, buf.as_mut_ptr(), buf.len(), |_job, _err| {}, |_job| {})
        };
        job.retain();
        match drain_read(job) {
            Drained::WouldBlock => {}
            Drained::Done(code) => panic!("expected WouldBlock, got completion code {code}"),
        }
        job.finish(0);

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    /// Reading past the writer's close reports EOF (`-1`), not an error.
    #[test]
    fn drain_read_reports_eof_after_writer_closes() {
        let (read_fd, write_fd) = nonblocking_pipe();
        unsafe { libc::close(write_fd) };

        let mut buf = [0u8; 5];
        let job = unsafe {
            Job::read(read_fd, buf.as_mut_ptr(), buf.len(), |_job, _err| {}, |_job| {})
        };
        job.retain();
        match drain_read(job) {
            Drained::Done(-1) => {}
            Drained::Done(code) => panic!("expected EOF (-1), got completion code {code}"),
            Drained::WouldBlock => panic!("expected EOF (-1), got WouldBlock"),
        }
        job.finish(-1);

        unsafe { libc::close(read_fd) };
    }
}
