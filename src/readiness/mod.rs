//! Platform-neutral readiness queue.
//!
//! Exactly one backend compiles in per target: edge-triggered epoll on
//! Linux/Android, kqueue with `EV_CLEAR` on the BSD/Darwin family. Both
//! expose the same inherent methods, so `pool.rs` never has to branch on
//! platform — the dispatch below (`epoll`/`kqueue` module selection) is the
//! only place that does, the same split `mio`'s selector module uses.

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) use epoll::Selector;

#[cfg(any(
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "ios",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "tvos",
    target_os = "watchos",
))]
mod kqueue;
#[cfg(any(
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "ios",
    target_os = "macos",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "tvos",
    target_os = "watchos",
))]
pub(crate) use kqueue::Selector;

use crate::job::Job;

/// A single kernel-reported readiness event, translated back to the `Job`
/// whose pointer was stashed as the event's cookie (`data.ptr`/`udata`).
pub(crate) struct ReadyEvent {
    pub(crate) job: Job,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) error: bool,
}

/// Owns one backend event descriptor plus the self-wake mechanism used to
/// interrupt a blocked `wait` from another thread. One instance per worker.
pub(crate) struct ReadinessQueue {
    selector: Selector,
}

impl ReadinessQueue {
    pub(crate) fn new() -> std::io::Result<ReadinessQueue> {
        Ok(ReadinessQueue {
            selector: Selector::new()?,
        })
    }

    pub(crate) fn register_read(&self, fd: std::os::unix::io::RawFd, job: Job) -> std::io::Result<()> {
        self.selector.register_read(fd, job)
    }

    pub(crate) fn register_write(&self, fd: std::os::unix::io::RawFd, job: Job) -> std::io::Result<()> {
        self.selector.register_write(fd, job)
    }

    pub(crate) fn register_accept(&self, fd: std::os::unix::io::RawFd, job: Job) -> std::io::Result<()> {
        self.selector.register_accept(fd, job)
    }

    pub(crate) fn unregister_read(&self, fd: std::os::unix::io::RawFd) -> std::io::Result<()> {
        self.selector.unregister_read(fd)
    }

    pub(crate) fn unregister_write(&self, fd: std::os::unix::io::RawFd) -> std::io::Result<()> {
        self.selector.unregister_write(fd)
    }

    pub(crate) fn unregister_accept(&self, fd: std::os::unix::io::RawFd) -> std::io::Result<()> {
        self.selector.unregister_accept(fd)
    }

    /// Block until at least one registered descriptor is ready or
    /// [`ReadinessQueue::interrupt`] is called from another thread.
    /// `events` is cleared and refilled; `capacity` bounds how many events
    /// are harvested in one call (`PoolConfig::events_capacity`).
    pub(crate) fn wait(&self, events: &mut Vec<ReadyEvent>, capacity: usize) -> std::io::Result<()> {
        self.selector.wait(events, capacity)
    }

    /// Wake a thread blocked in [`ReadinessQueue::wait`]. Safe to call from
    /// any thread, including signal-unsafe contexts is not claimed — this
    /// is a plain threaded wake, not an async-signal-safe one.
    pub(crate) fn interrupt(&self) -> std::io::Result<()> {
        self.selector.interrupt()
    }
}
