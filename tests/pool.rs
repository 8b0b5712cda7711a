//! End-to-end tests driving a real [`Pool`] over real file descriptors
//! (Unix domain socket pairs and pipes). Unix-only, matching the crate's
//! Unix-only readiness backends.
#![cfg(unix)]

use std::os::unix::io::RawFd;
use std::sync::mpsc;
use std::sync::Once;
use std::time::Duration;

use iomp::{Job, Pool};

fn init_logger() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        env_logger::try_init().expect("unable to initialise logger");
    });
}

fn nonblocking_socketpair() -> (RawFd, RawFd) {
    let mut fds = [0 as RawFd; 2];
    let rc = unsafe {
        libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr())
    };
    assert_eq!(rc, 0, "socketpair() failed: {}", std::io::Error::last_os_error());
    for fd in fds {
        set_nonblocking(fd);
    }
    (fds[0], fds[1])
}

fn nonblocking_pipe() -> (RawFd, RawFd) {
    let mut fds = [0 as RawFd; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    assert_eq!(rc, 0, "pipe() failed: {}", std::io::Error::last_os_error());
    for fd in fds {
        set_nonblocking(fd);
    }
    (fds[0], fds[1])
}

fn set_nonblocking(fd: RawFd) {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    assert!(flags >= 0);
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    assert_eq!(rc, 0);
}

fn close(fd: RawFd) {
    unsafe { libc::close(fd) };
}

#[test]
fn read_write_loopback_over_socketpair() {
    init_logger();
    let pool = Pool::new(2).expect("pool should start");
    let (a, b) = nonblocking_socketpair();

    let payload: &'static [u8] = b"the quick brown fox";
    let mut recv_buf = Box::new([0u8; 19]);
    let recv_ptr = recv_buf.as_mut_ptr();

    let (write_tx, write_rx) = mpsc::channel::<i32>();
    let (read_tx, read_rx) = mpsc::channel::<i32>();

    let read_job = unsafe {
        Job::read(
            b,
            recv_ptr,
            payload.len(),
            move |_job, error| {
                let _ = read_tx.send(error);
            },
            |_job| {},
        )
    };
    pool.submit_read(read_job);

    let write_job = unsafe {
        Job::write(
            a,
            payload.as_ptr(),
            payload.len(),
            move |_job, error| {
                let _ = write_tx.send(error);
            },
            |_job| {},
        )
    };
    pool.submit_write(write_job);

    assert_eq!(write_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
    assert_eq!(read_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 0);
    assert_eq!(&*recv_buf, payload);

    close(a);
    close(b);
}

#[test]
fn eof_is_reported_when_peer_closes() {
    init_logger();
    let pool = Pool::new(1).expect("pool should start");
    let (read_fd, write_fd) = nonblocking_pipe();
    close(write_fd); // no writer will ever show up

    let (tx, rx) = mpsc::channel::<i32>();
    let mut buf = Box::new([0u8; 8]);
    let ptr = buf.as_mut_ptr();
    let job = unsafe {
        Job::read(read_fd, ptr, buf.len(), move |_job, error| {
            let _ = tx.send(error);
        }, |_job| {})
    };
    pool.submit_read(job);

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), -1);
    close(read_fd);
}

#[test]
fn write_to_a_closed_peer_reports_epipe() {
    init_logger();
    // libc::write() on a pipe/socket with no reader raises SIGPIPE by
    // default; the pool never installs a handler on the caller's behalf
    // (descriptor and signal disposition are the caller's responsibility),
    // so the test does it here.
    unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };

    let pool = Pool::new(1).expect("pool should start");
    let (a, b) = nonblocking_socketpair();
    close(b); // nobody will ever read from `a` again

    let (tx, rx) = mpsc::channel::<i32>();
    let payload: &'static [u8] = b"orphaned";
    let job = unsafe {
        Job::write(a, payload.as_ptr(), payload.len(), move |_job, error| {
            let _ = tx.send(error);
        }, |_job| {})
    };
    pool.submit_write(job);

    let error = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(error, libc::EPIPE);
    close(a);
}

#[test]
fn shutdown_does_not_hang_on_an_unfulfillable_registration() {
    init_logger();
    let pool = Pool::new(1).expect("pool should start");
    let (read_fd, write_fd) = nonblocking_pipe();
    // Nothing is ever written, so this read will sit registered forever.
    let mut buf = Box::new([0u8; 8]);
    let ptr = buf.as_mut_ptr();
    let job = unsafe { Job::read(read_fd, ptr, buf.len(), |_job, _error| {}, |_job| {}) };
    pool.submit_read(job);

    // Give the worker a moment to pop the job and register it.
    std::thread::sleep(Duration::from_millis(50));

    pool.shutdown(); // must return promptly, not hang on the pending read
    close(read_fd);
    close(write_fd);
}

#[test]
fn autodetected_pool_starts_at_least_one_worker() {
    init_logger();
    let pool = Pool::new(0).expect("pool should start");
    assert!(pool.worker_count() >= 1);
}

#[test]
fn shutdown_does_not_hang_with_multiple_idle_workers() {
    // Every worker parks in `wait(-1)` with nothing submitted; shutdown's
    // sentinel cascade must wake each one in turn rather than stalling
    // after the first, or `pool.shutdown()`/`Drop` would hang joining the
    // rest.
    init_logger();
    let pool = Pool::new(4).expect("pool should start");
    std::thread::sleep(Duration::from_millis(20));
    pool.shutdown();
}

#[test]
fn null_buffer_is_rejected_with_einval() {
    init_logger();
    let pool = Pool::new(1).expect("pool should start");
    let (read_fd, write_fd) = nonblocking_pipe();

    let (tx, rx) = mpsc::channel::<i32>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let job = unsafe {
        Job::read(
            read_fd,
            std::ptr::null_mut(),
            8,
            move |_job, error| {
                let _ = tx.send(error);
            },
            move |_job| {
                let _ = release_tx.send(());
            },
        )
    };
    pool.submit_read(job);

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), libc::EINVAL);
    release_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("an EINVAL-rejected job must still run its release hook");
    close(read_fd);
    close(write_fd);
}

#[test]
fn zero_length_request_is_rejected_with_einval() {
    init_logger();
    let pool = Pool::new(1).expect("pool should start");
    let (read_fd, write_fd) = nonblocking_pipe();

    let (tx, rx) = mpsc::channel::<i32>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let mut buf = [0u8; 1];
    let job = unsafe {
        Job::read(
            read_fd,
            buf.as_mut_ptr(),
            0,
            move |_job, error| {
                let _ = tx.send(error);
            },
            move |_job| {
                let _ = release_tx.send(());
            },
        )
    };
    pool.submit_read(job);

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), libc::EINVAL);
    release_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("an EINVAL-rejected job must still run its release hook");
    close(read_fd);
    close(write_fd);
}
