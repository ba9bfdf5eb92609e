//! Worker pool for preemptively scheduled work items.
//!
//! This module provides the [`WorkerPool`]: a set of interchangeable worker threads sharing
//! one pending-work queue. Work items are submitted with [`WorkerPool::submit`], which never
//! blocks and returns a [`Future`] of the item's result, or fire-and-forget with
//! [`WorkerPool::spawn_detached`].
//!
//! Workers have no identity worth returning to: code running on them sees
//! [`Current::Worker`], and continuations registered there capture nothing.
//!
//! ## Blocking compensation
//!
//! A worker that enters [`Current::block_on`] is unavailable until the awaited future is
//! terminal. If no other worker is idle at that moment, the pool starts an extra worker so
//! that the items the blocked one may be waiting for still get picked up. This is what lets
//! a pool of size 1 run "offload, then block on the worker" patterns. Confined contexts get
//! no such compensation.

use std::{
    cell::RefCell,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use confine_common::Result;

use crate::{
    current::Current,
    future::{Future, run_guarded},
    work_queue::{self, Receiver, Sender},
};

/// A pool of worker threads executing submitted work items.
///
/// ## Cloning
///
/// `WorkerPool` implements [`Clone`] and all clones share the same workers. The workers
/// exit once every clone is dropped and the pending items are drained.
#[derive(Clone)]
pub struct WorkerPool(Arc<PoolHandle>);

/// A boxed work item executed by a worker thread.
type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// Upper bound on workers started by blocking compensation, per pool.
const MAX_COMPENSATION_WORKERS: usize = 64;

impl WorkerPool {
    /// Creates a new `WorkerPool` with the specified number of worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `num_threads` is 0 or if the OS refuses to start a thread.
    pub fn new(num_threads: usize) -> Self {
        Self::with_thread_name(num_threads, |i| format!("confine-worker-{i}"))
    }

    /// Creates a new `WorkerPool` whose threads are named by `thread_name`.
    ///
    /// `thread_name` receives the 0-based index of the worker, including workers started
    /// later by blocking compensation. An empty name leaves the thread unnamed.
    ///
    /// # Panics
    ///
    /// Panics if `num_threads` is 0 or if the OS refuses to start a thread.
    pub fn with_thread_name(
        num_threads: usize,
        thread_name: impl Fn(usize) -> String + Send + Sync + 'static,
    ) -> Self {
        assert_ne!(num_threads, 0);

        let (tx, rx) = work_queue::channel::<TaskFn>();
        let stats = Arc::new(PoolStats {
            threads: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            blocked: AtomicUsize::new(0),
            compensations: AtomicUsize::new(0),
            thread_name: Box::new(thread_name),
        });
        for _ in 0..num_threads {
            stats
                .start_worker(rx.clone())
                .expect("spawn worker thread");
        }

        WorkerPool(Arc::new(PoolHandle { queue: tx, stats }))
    }

    /// Configures the size of the global `WorkerPool`.
    ///
    /// Must be called before the first call to [`global()`](Self::global) to take effect.
    /// Values less than 1 are clamped to 1.
    pub fn configure_global_pool_size(pool_size: usize) {
        let pool_size = pool_size.max(1);
        GLOBAL_POOL_SIZE.store(pool_size, Ordering::SeqCst);
    }

    /// Returns the process-wide `WorkerPool`, creating it on first use.
    ///
    /// The number of workers is the value passed to
    /// [`configure_global_pool_size()`](Self::configure_global_pool_size), or
    /// `(available_parallelism * 3) / 2` rounded up, or 8 if parallelism is unknown.
    pub fn global() -> &'static WorkerPool {
        static POOL: OnceLock<WorkerPool> = OnceLock::new();
        POOL.get_or_init(|| WorkerPool::new(Self::get_global_pool_size()))
    }

    /// Submits a work item and returns a future of its result. Never blocks.
    ///
    /// `action` runs on some worker, with [`Current::Worker`]. The future is completed with
    /// its value, or faulted with its error or panic; continuations registered without a
    /// capture run on that worker right after.
    pub fn submit<T, F>(&self, action: F) -> Future<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&Current) -> Result<T> + Send + 'static,
    {
        let (promise, future) = Future::pending();
        self.spawn_detached(move || {
            let current = Current::Worker;
            let outcome = run_guarded(|| action(&current));
            promise.resolve(&current, outcome);
        });
        future
    }

    /// Submits a work item without any way to observe its completion.
    pub fn spawn_detached<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // Workers only disappear with the last handle, and `self` is one.
        let _ = self.0.queue.send(Box::new(f));
    }

    /// Current number of worker threads, including compensation workers.
    pub fn thread_count(&self) -> usize {
        self.0.stats.threads.load(Ordering::SeqCst)
    }

    /// Number of workers currently inside a blocking wait.
    pub fn blocked_workers(&self) -> usize {
        self.0.stats.blocked.load(Ordering::SeqCst)
    }

    /// Total number of workers started by blocking compensation.
    pub fn compensation_count(&self) -> usize {
        self.0.stats.compensations.load(Ordering::SeqCst)
    }

    /// Number of items submitted and not yet picked up by a worker.
    pub fn pending_items(&self) -> usize {
        self.0.queue.len()
    }

    fn get_global_pool_size() -> usize {
        let size = GLOBAL_POOL_SIZE.load(Ordering::SeqCst);
        if size == 0 {
            std::thread::available_parallelism()
                .map(|n| (n.get() * 3).div_ceil(2))
                .unwrap_or(8)
        } else {
            size
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.thread_count())
            .field("pending_items", &self.pending_items())
            .finish()
    }
}

/// Marks the calling worker as blocked until dropped. Returns `None` off the pool.
pub(crate) fn enter_blocking() -> Option<BlockingScope> {
    WORKER.with(|slot| {
        let slot = slot.borrow();
        let slot = slot.as_ref()?;
        let stats = slot.stats.clone();
        stats.blocked.fetch_add(1, Ordering::SeqCst);
        if stats.idle.load(Ordering::SeqCst) == 0
            && stats.compensations.load(Ordering::SeqCst) < MAX_COMPENSATION_WORKERS
        {
            match stats.start_worker(slot.rx.clone()) {
                Ok(()) => {
                    stats.compensations.fetch_add(1, Ordering::SeqCst);
                    log::debug!("worker blocked with no idle peer, started a replacement");
                }
                Err(e) => log::debug!("failed to start a compensation worker: {e}"),
            }
        }
        Some(BlockingScope { stats })
    })
}

pub(crate) struct BlockingScope {
    stats: Arc<PoolStats>,
}

impl Drop for BlockingScope {
    fn drop(&mut self) {
        self.stats.blocked.fetch_sub(1, Ordering::SeqCst);
    }
}

static GLOBAL_POOL_SIZE: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static WORKER: RefCell<Option<WorkerSlot>> = const { RefCell::new(None) };
}

struct WorkerSlot {
    rx: Receiver<TaskFn>,
    stats: Arc<PoolStats>,
}

struct PoolHandle {
    queue: Sender<TaskFn>,
    stats: Arc<PoolStats>,
}

struct PoolStats {
    threads: AtomicUsize,
    idle: AtomicUsize,
    blocked: AtomicUsize,
    compensations: AtomicUsize,
    thread_name: Box<dyn Fn(usize) -> String + Send + Sync>,
}

impl PoolStats {
    fn start_worker(self: &Arc<Self>, rx: Receiver<TaskFn>) -> std::io::Result<()> {
        let index = self.threads.fetch_add(1, Ordering::SeqCst);
        let mut builder = thread::Builder::new();
        let name = (self.thread_name)(index);
        if !name.is_empty() {
            builder = builder.name(name);
        }
        let stats = self.clone();
        builder
            .spawn(move || Self::thread_fn(stats, rx))
            .map(|_| ())
            .inspect_err(|_| {
                self.threads.fetch_sub(1, Ordering::SeqCst);
            })
    }

    fn thread_fn(stats: Arc<PoolStats>, rx: Receiver<TaskFn>) {
        log::trace!("worker starting");
        WORKER.with(|slot| {
            *slot.borrow_mut() = Some(WorkerSlot {
                rx: rx.clone(),
                stats: stats.clone(),
            })
        });
        loop {
            stats.idle.fetch_add(1, Ordering::SeqCst);
            let task = rx.recv();
            stats.idle.fetch_sub(1, Ordering::SeqCst);
            let Ok(task) = task else {
                break;
            };
            // Items built by `submit` never unwind; raw detached items might.
            let _ = panic::catch_unwind(AssertUnwindSafe(task));
        }
        WORKER.with(|slot| slot.borrow_mut().take());
        stats.threads.fetch_sub(1, Ordering::SeqCst);
        log::trace!("worker exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::Mutex,
        time::{Duration, Instant},
    };

    use confine_common::{Error, ErrorKind};

    use crate::{combinators::when_all, future::FutureState};

    const WAIT: Duration = Duration::from_secs(5);

    fn join<T: Clone + Send + 'static>(f: &Future<T>) -> T {
        f.wait_timeout(WAIT).expect("timed out").expect("faulted")
    }

    #[test]
    fn test_new_worker_pool() {
        let pool = WorkerPool::new(2);
        assert_eq!(pool.thread_count(), 2);
        drop(pool);
    }

    #[test]
    #[should_panic]
    fn test_new_worker_pool_zero_threads() {
        WorkerPool::new(0);
    }

    #[test]
    fn test_submit_simple_task() {
        let pool = WorkerPool::new(2);
        let f = pool.submit(|_| Ok(42));
        assert_eq!(join(&f), 42);
    }

    #[test]
    fn test_submit_runs_on_worker() {
        let pool = WorkerPool::new(2);
        let caller = std::thread::current().id();
        let f = pool.submit(|current| Ok((current.id(), std::thread::current().id())));
        let (context, thread) = join(&f);
        assert_eq!(context, crate::context::ContextId::Worker);
        assert_ne!(thread, caller);
    }

    #[test]
    fn test_submit_many_tasks() {
        let pool = WorkerPool::new(4);
        let futures: Vec<_> = (0..1000).map(|i| pool.submit(move |_| Ok(i))).collect();
        for (expected, f) in futures.iter().enumerate() {
            assert_eq!(join(f), expected);
        }
    }

    #[test]
    fn test_error_faults_future() {
        let pool = WorkerPool::new(2);
        let f: Future<u32> = pool.submit(|_| Err(Error::failed("nope")));
        let err = f.wait_timeout(WAIT).unwrap().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Failed { .. }));
        assert_eq!(f.state(), FutureState::Faulted);

        // The worker survived the fault.
        assert_eq!(join(&pool.submit(|_| Ok(1))), 1);
    }

    #[test]
    fn test_panic_faults_future_and_pool_survives() {
        let pool = WorkerPool::new(1);
        let f: Future<u32> = pool.submit(|_| panic!("worker panic"));
        assert!(f.wait_timeout(WAIT).unwrap().unwrap_err().is_panic());
        pool.spawn_detached(|| panic!("detached panic"));
        assert_eq!(join(&pool.submit(|_| Ok(2))), 2);
        assert_eq!(pool.thread_count(), 1);
    }

    #[test]
    fn test_spawn_detached() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(Mutex::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            pool.spawn_detached(move || {
                *counter.lock().unwrap() += 1;
            });
        }
        let deadline = Instant::now() + WAIT;
        while *counter.lock().unwrap() < 10 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_concurrent_task_execution() {
        let pool = WorkerPool::new(4);
        let start_time = Instant::now();
        let sleep_duration = Duration::from_millis(50);
        let futures: Vec<_> = (0..4)
            .map(|_| {
                pool.submit(move |_| {
                    std::thread::sleep(sleep_duration);
                    Ok(42)
                })
            })
            .collect();
        let all = when_all(&Current::Worker, futures);
        assert_eq!(join(&all), vec![42; 4]);
        // Four workers run the four sleeps side by side.
        assert!(start_time.elapsed() < sleep_duration * 3);
    }

    #[test]
    fn test_worker_pool_clone() {
        let pool1 = WorkerPool::new(2);
        let pool2 = pool1.clone();
        let f1 = pool1.submit(|_| Ok("from pool1"));
        let f2 = pool2.submit(|_| Ok("from pool2"));
        assert_eq!(join(&f1), "from pool1");
        assert_eq!(join(&f2), "from pool2");
    }

    #[test]
    fn test_global_worker_pool() {
        let global1 = WorkerPool::global();
        let global2 = WorkerPool::global();
        assert!(std::ptr::eq(global1, global2));
        assert_eq!(join(&global1.submit(|_| Ok("global task"))), "global task");
    }

    #[test]
    fn test_configure_global_pool_size() {
        WorkerPool::configure_global_pool_size(0);
        assert_eq!(WorkerPool::get_global_pool_size(), 1);
        WorkerPool::configure_global_pool_size(3);
        assert_eq!(WorkerPool::get_global_pool_size(), 3);
    }

    #[test]
    fn test_blocking_on_single_worker_is_compensated() {
        let pool = WorkerPool::new(1);
        let inner_pool = pool.clone();
        let f = pool.submit(move |current| {
            // The only worker waits for an item queued behind it.
            let inner = inner_pool.submit(|_| Ok(100));
            Ok(current.block_on(&inner)? + 50)
        });
        assert_eq!(join(&f), 150);
        assert!(pool.compensation_count() >= 1);
        assert!(pool.thread_count() >= 2);
        assert_eq!(pool.blocked_workers(), 0);
    }

    #[test]
    fn test_block_on_off_pool_does_not_compensate() {
        let pool = WorkerPool::new(1);
        let f = pool.submit(|_| Ok(1));
        assert_eq!(Current::Worker.block_on(&f).unwrap(), 1);
        assert_eq!(pool.compensation_count(), 0);
    }

    #[test]
    fn test_inline_continuation_runs_on_completing_worker() {
        let pool = WorkerPool::new(2);
        let (release, gate) = Future::<()>::pending();
        let work = pool.submit(move |current| {
            current.block_on(&gate)?;
            Ok(std::thread::current().id())
        });
        let follow = work.then(&Current::Worker, None, |_, worker| {
            Ok((worker?, std::thread::current().id()))
        });
        release.complete(&Current::Worker, ());
        let (worker, continuation) = join(&follow);
        assert_eq!(worker, continuation);
    }
}
