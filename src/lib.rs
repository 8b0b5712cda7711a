//! `iomp` is an asynchronous byte-stream I/O multiplexer: a small pool of
//! worker threads that carries non-blocking read, write, and accept
//! requests on file descriptors to completion, using an edge-triggered
//! readiness-notification backend (`epoll` on Linux, `kqueue` with
//! `EV_CLEAR` on the BSD/Darwin family).
//!
//! The core API is a thin, C-ABI-shaped facade:
//!
//! ```no_run
//! use std::os::unix::io::AsRawFd;
//! use iomp::{Job, Pool};
//!
//! let pool = Pool::new(0)?; // 0 = autodetect worker count
//! let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
//! listener.set_nonblocking(true)?;
//!
//! let job = Job::accept(
//!     listener.as_raw_fd(),
//!     |_job, error| {
//!         if error == 0 {
//!             // accept4() the connection here.
//!         }
//!     },
//!     |_job| {},
//! );
//! pool.submit_accept(job);
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! Callers who would rather work with closures than build [`Job`] values
//! directly can reach for [`Multiplexer`] instead, a safe wrapper that
//! mirrors the optional C++ facade the original C library shipped
//! alongside its C ABI.
//!
//! A job's `complete` callback is invoked exactly once, from a worker
//! thread, with one of: `0` (success — the requested bytes were
//! transferred or the connection accepted), `-1` (EOF), or a positive
//! errno. The pool never opens, closes, or sets `O_NONBLOCK` on a
//! descriptor on the caller's behalf; that lifecycle is entirely the
//! caller's responsibility.

mod error;
mod exec;
mod job;
mod log;
mod oop;
mod pool;
mod queue;
mod readiness;

pub use error::PoolError;
pub use job::Job;
pub use oop::Multiplexer;
pub use pool::{Pool, PoolConfig};

/// Render the current time as `YYYY-MM-DD HH:MM:SS.uuuuuu`, UTC — the
/// format the original C sink used. Exposed for callers wiring up their
/// own `log` backend who want matching timestamps.
pub use log::timestamp;
