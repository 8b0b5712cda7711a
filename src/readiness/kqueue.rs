//! Level/edge-mixed backend over `kqueue`, grounded on the modern selector
//! in this workspace's kqueue backend (`kevent!`, `EV_CLEAR`/`EV_RECEIPT`
//! usage, `EVFILT_USER` waker) applied to the registration contract from
//! `iomp_epoll.c` (one registration per direction, cookie-carrying events).

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

const WAKE_IDENT: libc::uintptr_t = 0;

pub(crate) struct Selector {
    kq: OwnedFd,
}

fn kevent_zeroed() -> libc::kevent {
    // SAFETY: an all-zero `kevent` is a valid (inert) bit pattern.
    unsafe { mem::zeroed() }
}

impl Selector {
    pub(crate) fn new() -> io::Result<Selector> {
        let kq = syscall!(kqueue())?;
        // SAFETY: `kqueue()` returns a fresh, owned descriptor on success.
        let kq = unsafe { OwnedFd::from_raw_fd(kq) };
        let selector = Selector { kq };
        selector.arm_waker()?;
        Ok(selector)
    }

    fn arm_waker(&self) -> io::Result<()> {
        let kev = libc::kevent {
            ident: WAKE_IDENT,
            filter: libc::EVFILT_USER,
            flags: libc::EV_ADD | libc::EV_CLEAR | libc::EV_RECEIPT,
            fflags: 0,
            data: 0,
            udata: ptr::null_mut(),
        };
        self.apply(&[kev])
    }

    fn apply(&self, changes: &[libc::kevent]) -> io::Result<()> {
        let mut out = vec![kevent_zeroed(); changes.len()];
        syscall!(kevent(
            self.kq.as_raw_fd(),
            changes.as_ptr(),
            changes.len() as i32,
            out.as_mut_ptr(),
            out.len() as i32,
            ptr::null(),
        ))?;
        // `EV_RECEIPT` turns every change into a receipt event; `EV_ERROR`
        // is set on all of them, with `data == 0` meaning success.
        for kev in &out {
            if kev.flags & libc::EV_ERROR != 0 && kev.data != 0 {
                return Err(io::Error::from_raw_os_error(kev.data as i32));
            }
        }
        Ok(())
    }

    fn register(&self, fd: RawFd, filter: i16, clear: bool, job: Job) -> io::Result<()> {
        let mut flags = libc::EV_ADD | libc::EV_RECEIPT;
        if clear {
            flags |= libc::EV_CLEAR;
        }
        let kev = libc::kevent {
            ident: fd as libc::uintptr_t,
            filter,
            flags,
            fflags: 0,
            data: 0,
            udata: job.as_raw() as *mut libc::c_void,
        };
        self.apply(&[kev])
    }

    pub(crate) fn register_read(&self, fd: RawFd, job: Job) -> io::Result<()> {
        self.register(fd, libc::EVFILT_READ, true, job)
    }

    pub(crate) fn register_write(&self, fd: RawFd, job: Job) -> io::Result<()> {
        self.register(fd, libc::EVFILT_WRITE, true, job)
    }

    /// Level-triggered (no `EV_CLEAR`): the caller drains the accept
    /// backlog in a loop, so the event must keep firing while non-empty.
    pub(crate) fn register_accept(&self, fd: RawFd, job: Job) -> io::Result<()> {
        self.register(fd, libc::EVFILT_READ, false, job)
    }

    fn delete(&self, fd: RawFd, filter: i16) -> io::Result<()> {
        let kev = libc::kevent {
            ident: fd as libc::uintptr_t,
            filter,
            flags: libc::EV_DELETE | libc::EV_RECEIPT,
            fflags: 0,
            data: 0,
            udata: ptr::null_mut(),
        };
        match self.apply(&[kev]) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn unregister_read(&self, fd: RawFd) -> io::Result<()> {
        self.delete(fd, libc::EVFILT_READ)
    }

    pub(crate) fn unregister_write(&self, fd: RawFd) -> io::Result<()> {
        self.delete(fd, libc::EVFILT_WRITE)
    }

    pub(crate) fn unregister_accept(&self, fd: RawFd) -> io::Result<()> {
        self.delete(fd, libc::EVFILT_READ)
    }

    pub(crate) fn wait(&self, events: &mut Vec<ReadyEvent>, capacity: usize) -> io::Result<()> {
        events.clear();
        let mut raw = vec![kevent_zeroed(); capacity];
        let n = loop {
            match syscall!(kevent(
                self.kq.as_raw_fd(),
                ptr::null(),
                0,
                raw.as_mut_ptr(),
                capacity as i32,
                ptr::null(),
            )) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };

        for kev in &raw[..n as usize] {
            if kev.filter == libc::EVFILT_USER {
                continue;
            }
            // SAFETY: `udata` was stashed by `register_*` from a live
            // `Job`, and registrations are removed before a job is freed.
            let job = unsafe { Job::from_raw(kev.udata as *mut JobInner) };
            events.push(ReadyEvent {
                job,
                readable: kev.filter == libc::EVFILT_READ,
                writable: kev.filter == libc::EVFILT_WRITE,
                error: kev.flags & libc::EV_ERROR != 0
                    || (kev.flags & libc::EV_EOF != 0 && kev.fflags != 0),
            });
        }
        Ok(())
    }

    pub(crate) fn interrupt(&self) -> io::Result<()> {
        let kev = libc::kevent {
            ident: WAKE_IDENT,
            filter: libc::EVFILT_USER,
            flags: libc::EV_RECEIPT,
            fflags: libc::NOTE_TRIGGER,
            data: 0,
            udata: ptr::null_mut(),
        };
        self.apply(&[kev])
    }
}
