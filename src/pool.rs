//! The worker pool: N threads, one shared job queue, one readiness queue
//! per thread, and the active/blocked bookkeeping that lets a freshly
//! submitted job wake exactly one parked worker.
//!
//! Grounded on `iomp_core`/`iomp_thread_run`/`do_post`/`do_stop` in
//! `iomp.c`: a single mutex guards both the job queue and the active/
//! blocked thread sets (see `queue.rs`'s module docs for why those two
//! can't be split across separate locks), and shutdown is a sentinel job
//! that each worker re-enqueues for the next one until all have seen it.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::PoolError;
use crate::exec;
use crate::job::{Job, Kind};
use crate::log::{log_debug, log_error, log_notice, log_warn};
use crate::queue::JobQueue;
use crate::readiness::{ReadinessQueue, ReadyEvent};

/// Tunables for [`Pool::with_config`]. No other configuration surface
/// exists: no environment variables, no config files, matching the
/// original's lack of a runtime configuration layer.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Worker thread count. `0` autodetects via
    /// `std::thread::available_parallelism` (the original used
    /// `sysconf(_SC_NPROCESSORS_ONLN)` on Linux, `sysctl(HW_NCPU)` on BSD).
    pub nthreads: usize,
    /// Events harvested per `wait` call by each worker's readiness queue.
    /// Corresponds to `IOMP_EVENT_LIMIT` in the original source.
    pub events_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> PoolConfig {
        PoolConfig {
            nthreads: 0,
            events_capacity: 1024,
        }
    }
}

struct Roster {
    queue: JobQueue,
    active: Vec<usize>,
    blocked: Vec<usize>,
    nthreads: usize,
}

struct Shared {
    roster: Mutex<Roster>,
    readiness: Vec<Arc<ReadinessQueue>>,
    stop: Job,
    stop_initiated: AtomicBool,
}

impl Shared {
    /// Insert `job` at the tail of the queue; if every worker is currently
    /// active (none parked), wake the one worker that's already blocked —
    /// there is nothing useful to wake if `blocked` is empty too, since
    /// every worker is already busy and will see this job on its own.
    fn push_and_wake(&self, job: Job) {
        let wake = {
            let mut roster = self.roster.lock().unwrap_or_else(|e| e.into_inner());
            roster.queue.push(job);
            if roster.active.is_empty() {
                roster.blocked.first().copied()
            } else {
                None
            }
        };
        if let Some(id) = wake {
            if let Err(e) = self.readiness[id].interrupt() {
                log_warn!("failed to interrupt worker {id}: {e}");
            }
        }
    }

    /// Re-enqueue the stop sentinel during the shutdown cascade and
    /// unconditionally wake a blocked worker, if any. The worker running
    /// this cascade step is itself still `active` by construction (it
    /// reached here by popping a job off the queue, not by parking), so
    /// `push_and_wake`'s `active.is_empty()` gate would never fire here —
    /// it was written for ordinary submits, where the submitter is not
    /// itself a worker, and the wake still has to happen regardless.
    fn push_and_wake_for_stop(&self, job: Job) {
        let wake = {
            let mut roster = self.roster.lock().unwrap_or_else(|e| e.into_inner());
            roster.queue.push(job);
            roster.blocked.first().copied()
        };
        if let Some(id) = wake {
            if let Err(e) = self.readiness[id].interrupt() {
                log_warn!("failed to interrupt worker {id}: {e}");
            }
        }
    }
}

/// A pool of worker threads driving asynchronous read/write/accept
/// requests to completion.
pub struct Pool {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Pool {
    /// Start a pool with `nthreads` workers (`0` autodetects the CPU
    /// count). Mirrors `iomp_new`'s signature, but surfaces failure as a
    /// `Result` rather than a null pointer.
    pub fn new(nthreads: usize) -> io::Result<Pool> {
        Pool::with_config(PoolConfig {
            nthreads,
            ..PoolConfig::default()
        })
        .map_err(Into::into)
    }

    /// Start a pool with full control over [`PoolConfig`].
    pub fn with_config(config: PoolConfig) -> Result<Pool, PoolError> {
        let requested = if config.nthreads == 0 {
            thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            config.nthreads
        };

        let mut readiness = Vec::with_capacity(requested);
        for _ in 0..requested {
            readiness.push(Arc::new(ReadinessQueue::new()?));
        }

        let shared = Arc::new(Shared {
            roster: Mutex::new(Roster {
                queue: JobQueue::new(),
                active: Vec::new(),
                blocked: Vec::new(),
                nthreads: 0,
            }),
            readiness,
            stop: Job::new_stop(),
            stop_initiated: AtomicBool::new(false),
        });

        let mut handles = Vec::with_capacity(requested);
        for id in 0..requested {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("iomp-worker-{id}"))
                .spawn(move || worker_loop(worker_shared, id, config));
            match spawned {
                Ok(handle) => {
                    handles.push(handle);
                    let mut roster = shared.roster.lock().unwrap_or_else(|e| e.into_inner());
                    roster.active.push(id);
                    roster.nthreads += 1;
                }
                Err(e) => log_warn!("failed to spawn worker thread {id}: {e}"),
            }
        }

        if handles.is_empty() {
            return Err(PoolError::NoWorkersStarted);
        }

        log_notice!("pool started with {} worker thread(s)", handles.len());

        Ok(Pool {
            shared,
            handles: Mutex::new(handles),
        })
    }

    fn submit(&self, job: Job) {
        // Retain before validating, matching `iomp_read`/`iomp_write`'s
        // `iomp_addref` ahead of the `EINVAL` check: `finish` always
        // releases one reference, so a job that fails validation still
        // needs the reference `finish` is about to drop.
        job.retain();
        if matches!(job.kind(), Kind::Read | Kind::Write) && (job.nbytes() == 0 || !job.has_buf()) {
            job.finish(libc::EINVAL);
            return;
        }
        self.shared.push_and_wake(job);
    }

    /// Submit a read job built with [`Job::read`].
    pub fn submit_read(&self, job: Job) {
        debug_assert_eq!(job.kind(), Kind::Read, "submit_read given a non-read job");
        self.submit(job);
    }

    /// Submit a write job built with [`Job::write`].
    pub fn submit_write(&self, job: Job) {
        debug_assert_eq!(job.kind(), Kind::Write, "submit_write given a non-write job");
        self.submit(job);
    }

    /// Submit an accept job built with [`Job::accept`].
    pub fn submit_accept(&self, job: Job) {
        debug_assert_eq!(job.kind(), Kind::Accept, "submit_accept given a non-accept job");
        self.submit(job);
    }

    /// Number of worker threads actually running. Useful for confirming
    /// what CPU autodetection (`nthreads: 0`) picked.
    pub fn worker_count(&self) -> usize {
        self.handles.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Request shutdown and block until every worker has drained and
    /// exited. Idempotent: calling it more than once (or letting `Drop`
    /// call it again) is a no-op after the first call.
    pub fn shutdown(&self) {
        if self.shared.stop_initiated.swap(true, Ordering::AcqRel) {
            return;
        }
        log_debug!("pool shutdown requested");
        self.shared.push_and_wake(self.shared.stop);
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        // SAFETY: every worker thread has just been joined, so nothing can
        // still reach the sentinel, and `stop_initiated` ensures this runs
        // at most once per pool.
        unsafe { self.shared.stop.free_stop() };
        log_notice!("pool shutdown complete");
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn move_between(from: &mut Vec<usize>, to: &mut Vec<usize>, id: usize) {
    if let Some(pos) = from.iter().position(|&x| x == id) {
        from.remove(pos);
        to.push(id);
    }
}

fn dispatch_ready(ev: ReadyEvent, readiness: &ReadinessQueue) {
    let job = ev.job;
    match job.kind() {
        Kind::Read if ev.readable || ev.error => exec::resume_read(job, readiness),
        Kind::Write if ev.writable || ev.error => exec::resume_write(job, readiness),
        Kind::Accept => exec::resume_accept(job, readiness),
        Kind::Read | Kind::Write => {
            log_debug!("spurious readiness wakeup on fd {}", job.fildes());
        }
        Kind::Stop => unreachable!("the stop sentinel is never registered with a readiness queue"),
    }
}

fn execute_first(job: Job, readiness: &ReadinessQueue) {
    match job.kind() {
        Kind::Read => exec::start_read(job, readiness),
        Kind::Write => exec::start_write(job, readiness),
        Kind::Accept => exec::start_accept(job, readiness),
        Kind::Stop => unreachable!("callers handle the stop sentinel before dispatch"),
    }
}

/// Returns `true` if this was the last worker to see the stop sentinel.
fn handle_stop(shared: &Shared, sentinel: Job) -> bool {
    let last = {
        let mut roster = shared.roster.lock().unwrap_or_else(|e| e.into_inner());
        roster.nthreads -= 1;
        roster.nthreads == 0
    };
    if !last {
        shared.push_and_wake_for_stop(sentinel);
    }
    last
}

fn drain_remaining(shared: &Shared) {
    loop {
        let job = {
            let mut roster = shared.roster.lock().unwrap_or_else(|e| e.into_inner());
            roster.queue.pop()
        };
        match job {
            Some(job) if job.kind() != Kind::Stop => {
                log_warn!("draining unfinished job on fd {} at pool shutdown", job.fildes());
                job.finish(-1);
            }
            Some(_) => continue,
            None => break,
        }
    }
}

fn worker_loop(shared: Arc<Shared>, id: usize, config: PoolConfig) {
    let readiness = Arc::clone(&shared.readiness[id]);
    let mut events = Vec::with_capacity(config.events_capacity);

    loop {
        loop {
            let mut roster = shared.roster.lock().unwrap_or_else(|e| e.into_inner());
            if !roster.queue.is_empty() {
                break;
            }
            move_between(&mut roster.active, &mut roster.blocked, id);
            drop(roster);

            if let Err(e) = readiness.wait(&mut events, config.events_capacity) {
                log_error!("worker {id} readiness wait failed: {e}");
            } else {
                for ev in events.drain(..) {
                    dispatch_ready(ev, &readiness);
                }
            }

            let mut roster = shared.roster.lock().unwrap_or_else(|e| e.into_inner());
            move_between(&mut roster.blocked, &mut roster.active, id);
        }

        let job = {
            let mut roster = shared.roster.lock().unwrap_or_else(|e| e.into_inner());
            roster.queue.pop()
        };
        let Some(job) = job else { continue };

        if job.kind() == Kind::Stop {
            let last = handle_stop(&shared, job);
            if last {
                drain_remaining(&shared);
            }
            break;
        }

        execute_first(job, &readiness);
    }
}
