//! Edge-triggered backend over `epoll`, grounded on the modern selector in
//! this workspace's epoll backend and on `iomp_epoll.c`'s registration
//! contract (one `epoll_ctl(ADD)` per direction, self-pipe style wake).
//!
//! The kernel wake primitive is an `eventfd` rather than the original's
//! `socketpair` + `EPOLLONESHOT` dance: an eventfd's counter always drains
//! to zero in a single read, so there is nothing to re-arm.

use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

use crate::job::{Job, JobInner};
use crate::readiness::ReadyEvent;

macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* )) => {{
        let res = unsafe { libc::$fn($($arg),*) };
        if res == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

/// Cookie value reserved for the wake descriptor; never a valid `JobInner`
/// pointer since `Box` allocations are never at address zero.
const WAKE_TOKEN: u64 = 0;

pub(crate) struct Selector {
    epfd: OwnedFd,
    waker: OwnedFd,
}

impl Selector {
    pub(crate) fn new() -> io::Result<Selector> {
        let epfd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?;
        // SAFETY: `epoll_create1` returns a fresh, owned descriptor on success.
        let epfd = unsafe { OwnedFd::from_raw_fd(epfd) };

        let waker = syscall!(eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK))?;
        // SAFETY: `eventfd` returns a fresh, owned descriptor on success.
        let waker = unsafe { OwnedFd::from_raw_fd(waker) };

        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        syscall!(epoll_ctl(
            epfd.as_raw_fd(),
            libc::EPOLL_CTL_ADD,
            waker.as_raw_fd(),
            &mut ev
        ))?;

        Ok(Selector { epfd, waker })
    }

    fn ctl(&self, op: i32, fd: RawFd, events: u32, cookie: *mut JobInner) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events,
            u64: cookie as u64,
        };
        syscall!(epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut ev)).map(|_| ())
    }

    /// Add a registration, promoting to `EPOLL_CTL_MOD` if the descriptor
    /// is already registered under this epoll instance.
    fn add_or_modify(&self, fd: RawFd, events: u32, cookie: *mut JobInner) -> io::Result<()> {
        match self.ctl(libc::EPOLL_CTL_ADD, fd, events, cookie) {
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                self.ctl(libc::EPOLL_CTL_MOD, fd, events, cookie)
            }
            other => other,
        }
    }

    pub(crate) fn register_read(&self, fd: RawFd, job: Job) -> io::Result<()> {
        self.add_or_modify(fd, (libc::EPOLLIN | libc::EPOLLET) as u32, job.as_raw())
    }

    pub(crate) fn register_write(&self, fd: RawFd, job: Job) -> io::Result<()> {
        self.add_or_modify(fd, (libc::EPOLLOUT | libc::EPOLLET) as u32, job.as_raw())
    }

    /// Level-triggered: the caller drains the accept backlog in a loop, so
    /// the event must keep firing while it is non-empty.
    pub(crate) fn register_accept(&self, fd: RawFd, job: Job) -> io::Result<()> {
        self.add_or_modify(fd, libc::EPOLLIN as u32, job.as_raw())
    }

    fn unregister(&self, fd: RawFd) -> io::Result<()> {
        match syscall!(epoll_ctl(
            self.epfd.as_raw_fd(),
            libc::EPOLL_CTL_DEL,
            fd,
            ptr::null_mut()
        )) {
            Ok(_) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn unregister_read(&self, fd: RawFd) -> io::Result<()> {
        self.unregister(fd)
    }

    pub(crate) fn unregister_write(&self, fd: RawFd) -> io::Result<()> {
        self.unregister(fd)
    }

    pub(crate) fn unregister_accept(&self, fd: RawFd) -> io::Result<()> {
        self.unregister(fd)
    }

    pub(crate) fn wait(&self, events: &mut Vec<ReadyEvent>, capacity: usize) -> io::Result<()> {
        events.clear();
        let mut raw = vec![unsafe { mem::zeroed::<libc::epoll_event>() }; capacity];
        let n = loop {
            match syscall!(epoll_wait(
                self.epfd.as_raw_fd(),
                raw.as_mut_ptr(),
                capacity as i32,
                -1
            )) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };

        for ev in &raw[..n as usize] {
            if ev.u64 == WAKE_TOKEN {
                self.drain_wake();
                continue;
            }
            // SAFETY: the cookie was stashed by `register_*` from a live
            // `Job`, and registrations are removed before a job is freed.
            let job = unsafe { Job::from_raw(ev.u64 as *mut JobInner) };
            let flags = ev.events as i32;
            events.push(ReadyEvent {
                job,
                readable: flags & (libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLHUP) != 0,
                writable: flags & libc::EPOLLOUT != 0,
                // `EPOLLHUP` folds into `error` (not just `readable`): a
                // write job that only ever sees a bare hang-up, with no
                // `EPOLLOUT` or `EPOLLERR`, must still be resumed so its
                // drain loop can observe the hang-up as `EPIPE`/EOF instead
                // of staying armed forever.
                error: flags & (libc::EPOLLERR | libc::EPOLLHUP) != 0,
            });
        }
        Ok(())
    }

    pub(crate) fn interrupt(&self) -> io::Result<()> {
        let one: u64 = 1;
        loop {
            let res = syscall!(write(
                self.waker.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                mem::size_of::<u64>()
            ));
            match res {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn drain_wake(&self) {
        let mut buf = [0u8; 8];
        loop {
            let res = syscall!(read(
                self.waker.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len()
            ));
            match res {
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}
