//! Confined execution contexts.
//!
//! A [`ConfinedContext`] models a UI-like thread: a single dedicated physical thread that
//! pumps a private FIFO queue of continuations, one at a time. Code running on it sees
//! [`Current::Confined`] and, by default, asks to resume on it after every asynchronous
//! hop.
//!
//! The pump cycles `Idle -> Pumping -> Idle`. A continuation that issues a blocking wait
//! moves it to `Blocked` until the awaited future is terminal. While `Blocked` the queue
//! still accepts enqueues (other threads keep posting captured continuations), but nothing
//! is dequeued, because the only thread allowed to dequeue is the one that is blocked.
//! When the awaited future can only complete through one of those queued continuations,
//! the context never leaves `Blocked`.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, OnceLock, Weak,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    thread::{self, ThreadId},
};

use confine_common::{Error, Result};

use crate::{
    current::Current,
    future::{Future, run_guarded},
    work_queue::{self, Receiver, Sender},
};

/// Identity of one confined context, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfinedId(u64);

/// Where a piece of code runs, as far as resumption is concerned.
///
/// Workers are interchangeable, so `Worker` carries no identity: resuming "on a worker"
/// never means resuming on the same worker. Any thread that is not a confined context's
/// pump thread (a harness thread, a timer thread) also counts as `Worker`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextId {
    Confined(ConfinedId),
    Worker,
}

impl ContextId {
    pub fn is_confined(&self) -> bool {
        matches!(self, ContextId::Confined(_))
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextId::Confined(id) => write!(f, "confined#{}", id.0),
            ContextId::Worker => write!(f, "worker"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    /// Waiting for the next queued continuation.
    Idle,
    /// Running a continuation.
    Pumping,
    /// Inside a blocking wait issued by the running continuation.
    Blocked,
}

/// Point-in-time snapshot of a context, see [`ConfinedContext::diagnose`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Diagnosis {
    pub id: ContextId,
    pub pump_state: PumpState,
    /// Continuations enqueued but not yet taken by the pump.
    pub queued: usize,
}

impl Diagnosis {
    /// The context is blocked while continuations captured to it are waiting.
    ///
    /// This is the observable half of the deadlock condition: if the future the context is
    /// blocked on depends on any of the queued continuations, the stall is permanent.
    pub fn is_stalled(&self) -> bool {
        self.pump_state == PumpState::Blocked && self.queued > 0
    }
}

/// A job queued on a confined context; it receives the context as its [`Current`].
pub(crate) type Job = Box<dyn FnOnce(&Current) + Send + 'static>;

/// Handle to a confined context. Clones refer to the same context.
///
/// The pump thread exits once every handle is dropped and the queue is drained.
#[derive(Clone)]
pub struct ConfinedContext(Arc<ContextInner>);

impl ConfinedContext {
    /// Creates a context and starts its pump thread, named `name`.
    pub fn new(name: impl Into<String>) -> Result<ConfinedContext> {
        let name = name.into();
        let (queue, rx) = work_queue::channel::<Job>();
        let inner = Arc::new(ContextInner {
            id: ConfinedId(NEXT_CONFINED_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.clone(),
            queue,
            state: Mutex::new(PumpState::Idle),
            queued: AtomicUsize::new(0),
            thread: OnceLock::new(),
        });
        let weak = Arc::downgrade(&inner);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || Self::pump(weak, rx))?;
        let _ = inner.thread.set(handle.thread().id());
        Ok(ConfinedContext(inner))
    }

    pub fn id(&self) -> ContextId {
        ContextId::Confined(self.0.id)
    }

    /// The physical thread that pumps this context.
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.0.thread.get().copied()
    }

    /// Returns `true` when called from this context's pump thread.
    pub fn is_current_thread(&self) -> bool {
        self.thread_id() == Some(thread::current().id())
    }

    pub fn pump_state(&self) -> PumpState {
        *self.0.state.lock().unwrap()
    }

    pub fn queued(&self) -> usize {
        self.0.queued.load(Ordering::SeqCst)
    }

    pub fn diagnose(&self) -> Diagnosis {
        Diagnosis {
            id: self.id(),
            pump_state: self.pump_state(),
            queued: self.queued(),
        }
    }

    /// Queues `action` on this context and returns a future of its result.
    ///
    /// The action runs on the pump thread after everything queued before it. An error or a
    /// panic inside `action` faults the returned future; the pump keeps running.
    pub fn post<T, F>(&self, action: F) -> Future<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&Current) -> Result<T> + Send + 'static,
    {
        let (promise, future) = Future::pending();
        let job: Job = Box::new(move |current: &Current| {
            let outcome = run_guarded(|| action(current));
            promise.resolve(current, outcome);
        });
        // A rejected job drops its promise, which faults the future as abandoned.
        let _ = self.enqueue(job);
        future
    }

    /// Appends a continuation to the queue. Accepted in every pump state.
    pub(crate) fn enqueue(&self, job: Job) -> std::result::Result<(), Job> {
        self.0.queued.fetch_add(1, Ordering::SeqCst);
        self.0.queue.send(job).inspect_err(|_| {
            self.0.queued.fetch_sub(1, Ordering::SeqCst);
        })
    }

    /// Marks the context as blocked until the returned guard is dropped.
    ///
    /// Only the pump thread may block its own context; any other thread gets
    /// `InvalidOperation`.
    pub(crate) fn enter_blocking(&self) -> Result<BlockedGuard<'_>> {
        if !self.is_current_thread() {
            return Err(Error::invalid_operation(format!(
                "blocking wait on {} from a thread that does not pump it",
                self.id()
            )));
        }
        let previous = std::mem::replace(&mut *self.0.state.lock().unwrap(), PumpState::Blocked);
        Ok(BlockedGuard {
            ctx: self,
            previous,
        })
    }

    fn set_state(&self, state: PumpState) {
        *self.0.state.lock().unwrap() = state;
    }

    fn pump(inner: Weak<ContextInner>, rx: Receiver<Job>) {
        log::trace!("confined pump starting");
        while let Ok(job) = rx.recv() {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let ctx = ConfinedContext(inner);
            ctx.0.queued.fetch_sub(1, Ordering::SeqCst);
            ctx.set_state(PumpState::Pumping);
            let current = Current::Confined(ctx.clone());
            // Jobs built by this crate never unwind; this keeps the pump alive regardless.
            let _ = panic::catch_unwind(AssertUnwindSafe(|| job(&current)));
            ctx.set_state(PumpState::Idle);
        }
        log::trace!("confined pump exiting");
    }
}

impl std::fmt::Debug for ConfinedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfinedContext")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .finish()
    }
}

/// Restores the previous pump state when a blocking wait ends.
pub(crate) struct BlockedGuard<'a> {
    ctx: &'a ConfinedContext,
    previous: PumpState,
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        self.ctx.set_state(self.previous);
    }
}

static NEXT_CONFINED_ID: AtomicU64 = AtomicU64::new(1);

struct ContextInner {
    id: ConfinedId,
    name: String,
    queue: Sender<Job>,
    state: Mutex<PumpState>,
    queued: AtomicUsize,
    thread: OnceLock<ThreadId>,
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use confine_common::ErrorKind;

    use super::{ConfinedContext, ContextId, PumpState};
    use crate::{current::Current, future::Future};

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_context_send_sync() {
        fn is_send_sync<T: Send + Sync>() {}
        is_send_sync::<ConfinedContext>();
    }

    #[test]
    fn test_ids_are_unique() {
        let a = ConfinedContext::new("a").unwrap();
        let b = ConfinedContext::new("b").unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.clone().id());
        assert!(a.id().is_confined());
        assert_eq!(ContextId::Worker.to_string(), "worker");
        assert!(a.id().to_string().starts_with("confined#"));
    }

    #[test]
    fn test_post_runs_on_pump_thread() {
        let ctx = ConfinedContext::new("pump").unwrap();
        let expected = ctx.thread_id();
        let id = ctx.id();
        let f = ctx.post(move |current| {
            assert_eq!(current.id(), id);
            Ok(std::thread::current().id())
        });
        assert_eq!(Some(f.wait_timeout(WAIT).unwrap().unwrap()), expected);
        assert!(!ctx.is_current_thread());
    }

    #[test]
    fn test_fifo_never_interleaved() {
        let ctx = ConfinedContext::new("fifo").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let futures: Vec<_> = (0..20)
            .map(|i| {
                let log = log.clone();
                ctx.post(move |_| {
                    log.lock().unwrap().push(("begin", i));
                    std::thread::sleep(Duration::from_millis(fastrand::u64(0..3)));
                    log.lock().unwrap().push(("end", i));
                    Ok(i)
                })
            })
            .collect();
        for f in &futures {
            f.wait_timeout(WAIT).unwrap().unwrap();
        }
        let expected: Vec<_> = (0..20).flat_map(|i| [("begin", i), ("end", i)]).collect();
        assert_eq!(*log.lock().unwrap(), expected);
    }

    #[test]
    fn test_fault_does_not_stop_pump() {
        let ctx = ConfinedContext::new("faulty").unwrap();
        let bad: Future<u32> = ctx.post(|_| panic!("in pump"));
        let good = ctx.post(|_| Ok(1u32));
        assert!(bad.wait_timeout(WAIT).unwrap().unwrap_err().is_panic());
        assert_eq!(good.wait_timeout(WAIT).unwrap().unwrap(), 1);
    }

    #[test]
    fn test_pump_states() {
        let ctx = ConfinedContext::new("states").unwrap();
        assert_eq!(ctx.pump_state(), PumpState::Idle);

        let (release, gate) = Future::<()>::pending();
        let ctx_clone = ctx.clone();
        let observed = ctx.post(move |current| {
            let running = ctx_clone.pump_state();
            current.block_on(&gate)?;
            Ok(running)
        });

        let deadline = std::time::Instant::now() + WAIT;
        while ctx.pump_state() != PumpState::Blocked {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }

        // Enqueues are accepted while blocked but nothing is dequeued.
        let queued = ctx.post(|_| Ok(()));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ctx.queued(), 1);
        assert!(ctx.diagnose().is_stalled());
        assert!(!queued.is_terminal());

        release.complete(&Current::Worker, ());
        assert_eq!(
            observed.wait_timeout(WAIT).unwrap().unwrap(),
            PumpState::Pumping
        );
        queued.wait_timeout(WAIT).unwrap().unwrap();
        assert_eq!(ctx.queued(), 0);
        assert!(!ctx.diagnose().is_stalled());
    }

    #[test]
    fn test_block_from_foreign_thread_is_rejected() {
        let ctx = ConfinedContext::new("foreign").unwrap();
        let current = Current::Confined(ctx.clone());
        let err = current.block_on(&Future::ready(1u32)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidOperation { .. }));
        assert_eq!(ctx.pump_state(), PumpState::Idle);
    }
}
