//! Single-assignment deferred results with continuation capture.
//!
//! A [`Future`] is the read side of a computation that completes exactly once, either
//! with a value or with an [`Error`]. Its write side is a [`Promise`]. Code that wants to
//! react to completion registers a continuation via [`Future::then`], naming explicitly
//! where the continuation must run:
//!
//! - `capture = Some(ctx)`: the continuation is posted to `ctx`'s queue and runs when that
//!   confined context pumps it.
//! - `capture = None`: the continuation runs inline on whichever thread observes the
//!   completion (the completer, or the registrar when the future is already terminal).
//!
//! ## State transitions
//!
//! - `Pending` -> `Completed(T)` when a value is delivered
//! - `Pending` -> `Faulted(Error)` when an error is delivered or the promise is dropped
//!
//! Terminal states are immutable. Registration and completion run under the same mutex, so
//! a continuation is either queued before the drain or dispatched by the registrar itself;
//! no wake-up can be lost.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use confine_common::{Error, Result};

use crate::{
    context::{ConfinedContext, ContextId},
    current::Current,
};

/// Externally visible lifecycle of a [`Future`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    Pending,
    Completed,
    Faulted,
}

/// The read side of a single-assignment deferred result.
///
/// Cloning a `Future` yields another handle to the same result; every handle observes the
/// same terminal state.
pub struct Future<T>(Arc<FutureCell<T>>);

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future(self.0.clone())
    }
}

impl<T> std::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future")
            .field("state", &self.0.lock().kind())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    /// Creates a pending future together with the promise that completes it.
    pub fn pending() -> (Promise<T>, Future<T>) {
        let cell = Arc::new(FutureCell::new(State::Pending(Vec::new())));
        (Promise { cell: Some(cell.clone()) }, Future(cell))
    }

    /// Creates a future that is already completed with `value`.
    pub fn ready(value: T) -> Future<T> {
        Future(Arc::new(FutureCell::new(State::Completed(value))))
    }

    /// Creates a future that is already faulted with `error`.
    pub fn faulted(error: Error) -> Future<T> {
        Future(Arc::new(FutureCell::new(State::Faulted(error))))
    }

    pub fn state(&self) -> FutureState {
        self.0.lock().kind()
    }

    pub fn is_terminal(&self) -> bool {
        self.state() != FutureState::Pending
    }

    /// Returns the stored outcome without blocking, or `None` while pending.
    pub fn try_outcome(&self) -> Option<Result<T>> {
        self.0.lock().outcome()
    }

    /// Capture targets of the continuations registered and not yet dispatched, in
    /// registration order. `None` entries resume on whichever thread completes the future.
    pub fn pending_captures(&self) -> Vec<Option<ContextId>> {
        match &*self.0.lock() {
            State::Pending(waiters) => waiters
                .iter()
                .map(|w| w.capture.as_ref().map(ConfinedContext::id))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Registers `f` to run once this future is terminal and returns a future of its result.
    ///
    /// `here` describes the registering caller and is used when the future is already
    /// terminal and `capture` is `None`: the continuation then runs immediately on the
    /// caller's thread. A panic inside `f` faults the returned future.
    pub fn then<U, F>(&self, here: &Current, capture: Option<&ConfinedContext>, f: F) -> Future<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(&Current, Result<T>) -> Result<U> + Send + 'static,
    {
        let (promise, next) = Future::pending();
        self.0.subscribe(
            here,
            capture.cloned(),
            Box::new(move |current: &Current, outcome: Result<T>| {
                let res = run_guarded(|| f(current, outcome));
                promise.resolve(current, res);
            }),
        );
        next
    }

    /// Like [`then`](Self::then), but `f` starts another asynchronous step; the returned
    /// future completes when that step does.
    pub fn then_future<U, F>(
        &self,
        here: &Current,
        capture: Option<&ConfinedContext>,
        f: F,
    ) -> Future<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(&Current, Result<T>) -> Future<U> + Send + 'static,
    {
        let (promise, next) = Future::pending();
        self.0.subscribe(
            here,
            capture.cloned(),
            Box::new(move |current: &Current, outcome: Result<T>| {
                match panic::catch_unwind(AssertUnwindSafe(|| f(current, outcome))) {
                    Ok(inner) => inner.forward_to(current, promise),
                    Err(payload) => {
                        promise.resolve(current, Err(Error::panicked(payload.as_ref())))
                    }
                }
            }),
        );
        next
    }

    /// Blocks the calling thread until the future is terminal, with no context bookkeeping.
    ///
    /// Confined code must go through [`Current::block_on`] instead so that the context is
    /// marked as blocked for the duration.
    pub(crate) fn wait(&self) -> Result<T> {
        let guard = self.0.lock();
        let guard = self
            .0
            .condvar
            .wait_while(guard, |state| state.is_pending())
            .unwrap();
        guard.outcome().expect("terminal state")
    }

    /// Waits for the future from a thread that belongs to no context (a test harness, a
    /// presentation layer). Returns `None` if the future is still pending after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T>> {
        let guard = self.0.lock();
        let (guard, _) = self
            .0
            .condvar
            .wait_timeout_while(guard, timeout, |state| state.is_pending())
            .unwrap();
        guard.outcome()
    }

    /// Registers a raw completion callback. `callback` must not unwind.
    pub(crate) fn on_complete(
        &self,
        here: &Current,
        capture: Option<ConfinedContext>,
        callback: Callback<T>,
    ) {
        self.0.subscribe(here, capture, callback);
    }

    fn forward_to(&self, here: &Current, promise: Promise<T>) {
        self.0.subscribe(
            here,
            None,
            Box::new(move |current: &Current, outcome: Result<T>| {
                promise.resolve(current, outcome)
            }),
        );
    }
}

/// The write side of a [`Future`].
///
/// Dropping a promise without resolving it faults the future with
/// [`ErrorKind::Abandoned`](confine_common::ErrorKind::Abandoned); continuations that run
/// inline as a consequence observe [`Current::Worker`].
pub struct Promise<T: Send + 'static> {
    cell: Option<Arc<FutureCell<T>>>,
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// Delivers the outcome and dispatches every registered continuation.
    ///
    /// `here` describes the completing thread; continuations registered with
    /// `capture = None` run inline on it.
    pub fn resolve(mut self, here: &Current, outcome: Result<T>) {
        if let Some(cell) = self.cell.take() {
            cell.settle(here, outcome);
        }
    }

    pub fn complete(self, here: &Current, value: T) {
        self.resolve(here, Ok(value))
    }

    pub fn fault(self, here: &Current, error: Error) {
        self.resolve(here, Err(error))
    }
}

impl<T: Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            cell.settle_fault(&Current::Worker, Error::abandoned());
        }
    }
}

/// Runs `f`, converting a panic into a faulted outcome.
pub(crate) fn run_guarded<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(Error::panicked(payload.as_ref())))
}

pub(crate) type Callback<T> = Box<dyn FnOnce(&Current, Result<T>) + Send + 'static>;

struct FutureCell<T> {
    state: Mutex<State<T>>,
    condvar: Condvar,
}

impl<T> FutureCell<T> {
    fn new(state: State<T>) -> FutureCell<T> {
        FutureCell {
            state: Mutex::new(state),
            condvar: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State<T>> {
        self.state.lock().unwrap()
    }
}

impl<T: Send + 'static> FutureCell<T> {
    /// Faults a pending cell. Needs no `T: Clone`, so it is usable from `Promise::drop`.
    fn settle_fault(&self, here: &Current, error: Error) -> bool {
        let waiters = {
            let mut state = self.lock();
            let State::Pending(waiters) = &mut *state else {
                return false;
            };
            let waiters = std::mem::take(waiters);
            *state = State::Faulted(error.clone());
            waiters
        };
        self.condvar.notify_all();
        for waiter in waiters {
            waiter.dispatch(here, Err(error.clone()));
        }
        true
    }
}

impl<T: Clone + Send + 'static> FutureCell<T> {
    fn settle(&self, here: &Current, outcome: Result<T>) -> bool {
        let waiters = {
            let mut state = self.lock();
            let State::Pending(waiters) = &mut *state else {
                return false;
            };
            let waiters = std::mem::take(waiters);
            *state = match &outcome {
                Ok(value) => State::Completed(value.clone()),
                Err(error) => State::Faulted(error.clone()),
            };
            waiters
        };
        self.condvar.notify_all();
        for waiter in waiters {
            waiter.dispatch(here, outcome.clone());
        }
        true
    }

    fn subscribe(&self, here: &Current, capture: Option<ConfinedContext>, callback: Callback<T>) {
        let mut state = self.lock();
        let outcome = match &mut *state {
            State::Pending(waiters) => {
                waiters.push(Waiter { capture, callback });
                return;
            }
            State::Completed(value) => Ok(value.clone()),
            State::Faulted(error) => Err(error.clone()),
        };
        drop(state);
        Waiter { capture, callback }.dispatch(here, outcome);
    }
}

struct Waiter<T> {
    capture: Option<ConfinedContext>,
    callback: Callback<T>,
}

impl<T: Send + 'static> Waiter<T> {
    fn dispatch(self, here: &Current, outcome: Result<T>) {
        let callback = self.callback;
        match self.capture {
            // If the context is gone the job is dropped together with the promise it owns,
            // which faults the downstream future as abandoned.
            Some(ctx) => {
                let _ = ctx.enqueue(Box::new(move |current: &Current| {
                    callback(current, outcome)
                }));
            }
            None => callback(here, outcome),
        }
    }
}

enum State<T> {
    Pending(Vec<Waiter<T>>),
    Completed(T),
    Faulted(Error),
}

impl<T> State<T> {
    fn is_pending(&self) -> bool {
        matches!(self, State::Pending(_))
    }

    fn kind(&self) -> FutureState {
        match self {
            State::Pending(_) => FutureState::Pending,
            State::Completed(_) => FutureState::Completed,
            State::Faulted(_) => FutureState::Faulted,
        }
    }
}

impl<T: Clone> State<T> {
    fn outcome(&self) -> Option<Result<T>> {
        match self {
            State::Pending(_) => None,
            State::Completed(value) => Some(Ok(value.clone())),
            State::Faulted(error) => Some(Err(error.clone())),
        }
    }
}
