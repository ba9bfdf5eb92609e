//! The two ways of consuming a [`Future`]: blocking the thread or suspending the caller.
//!
//! Every piece of code that runs under this crate's executors receives a [`Current`]
//! describing where it runs. It is passed explicitly rather than looked up from thread-local
//! state, so the capture decision made by [`Current::suspend`] is visible at every call
//! site:
//!
//! - on a confined context, `suspend` captures that context and the remainder is posted
//!   back to its queue;
//! - on a worker, `suspend` captures nothing and the remainder runs wherever the awaited
//!   future completes.
//!
//! [`Current::block_on`] occupies the calling thread instead. On a confined context that
//! marks the context as blocked, which is where deadlocks come from: a blocked context
//! cannot pump the remainders captured to it.

use confine_common::Result;

use crate::{
    context::{ConfinedContext, ContextId},
    future::Future,
    worker_pool,
};

/// The execution context a continuation is running on.
#[derive(Debug, Clone)]
pub enum Current {
    /// The pump thread of a confined context.
    Confined(ConfinedContext),
    /// A pool worker, or any other thread that belongs to no confined context.
    Worker,
}

/// Resumption policy for [`Current::suspend_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resume {
    /// Resume on the suspending confined context, if any.
    #[default]
    OnCaptured,
    /// Resume on whichever thread completes the awaited future.
    Anywhere,
}

impl Current {
    pub fn id(&self) -> ContextId {
        match self {
            Current::Confined(ctx) => ctx.id(),
            Current::Worker => ContextId::Worker,
        }
    }

    pub fn confined(&self) -> Option<&ConfinedContext> {
        match self {
            Current::Confined(ctx) => Some(ctx),
            Current::Worker => None,
        }
    }

    /// The context a continuation registered from here resumes on under `resume`.
    ///
    /// Only confined contexts are ever captured; a worker has no identity to return to.
    pub fn capture(&self, resume: Resume) -> Option<&ConfinedContext> {
        match resume {
            Resume::OnCaptured => self.confined(),
            Resume::Anywhere => None,
        }
    }

    /// Blocks the calling thread until `future` is terminal and returns its outcome.
    ///
    /// On a confined context the context is `Blocked` for the duration and pumps nothing.
    /// On a worker no context state changes; if no other worker is idle, the pool starts a
    /// replacement so that work queued behind this wait can still run.
    ///
    /// There is no timeout: a wait whose future depends on a continuation captured to the
    /// blocked context never returns.
    pub fn block_on<T>(&self, future: &Future<T>) -> Result<T>
    where
        T: Clone + Send + 'static,
    {
        match self {
            Current::Confined(ctx) => {
                let _blocked = ctx.enter_blocking()?;
                future.wait()
            }
            Current::Worker => {
                let _compensated = worker_pool::enter_blocking();
                future.wait()
            }
        }
    }

    /// Suspends the caller until `future` is terminal, then runs `remainder`.
    ///
    /// Does not block: `remainder` is registered as a continuation and control returns to
    /// whatever is driving the caller. The remainder resumes on this context if it is
    /// confined, and anywhere otherwise.
    pub fn suspend<T, U, F>(&self, future: &Future<T>, remainder: F) -> Future<U>
    where
        T: Clone + Send + 'static,
        U: Clone + Send + 'static,
        F: FnOnce(&Current, Result<T>) -> Result<U> + Send + 'static,
    {
        self.suspend_with(future, Resume::OnCaptured, remainder)
    }

    /// [`suspend`](Self::suspend) with an explicit resumption policy.
    pub fn suspend_with<T, U, F>(
        &self,
        future: &Future<T>,
        resume: Resume,
        remainder: F,
    ) -> Future<U>
    where
        T: Clone + Send + 'static,
        U: Clone + Send + 'static,
        F: FnOnce(&Current, Result<T>) -> Result<U> + Send + 'static,
    {
        future.then(self, self.capture(resume), remainder)
    }

    /// Suspends until `future` is terminal, then continues with another asynchronous step.
    pub fn suspend_future<T, U, F>(
        &self,
        future: &Future<T>,
        resume: Resume,
        remainder: F,
    ) -> Future<U>
    where
        T: Clone + Send + 'static,
        U: Clone + Send + 'static,
        F: FnOnce(&Current, Result<T>) -> Future<U> + Send + 'static,
    {
        future.then_future(self, self.capture(resume), remainder)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use confine_common::Error;

    use super::{Current, Resume};
    use crate::{
        context::{ConfinedContext, ContextId},
        future::Future,
        worker_pool::WorkerPool,
    };

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_capture_rules() {
        let ctx = ConfinedContext::new("capture").unwrap();
        let confined = Current::Confined(ctx.clone());
        assert_eq!(
            confined.capture(Resume::OnCaptured).map(|c| c.id()),
            Some(ctx.id())
        );
        assert!(confined.capture(Resume::Anywhere).is_none());
        assert!(Current::Worker.capture(Resume::OnCaptured).is_none());
        assert_eq!(Current::Worker.id(), ContextId::Worker);
    }

    #[test]
    fn test_suspend_on_confined_registers_capture() {
        let ctx = ConfinedContext::new("suspend").unwrap();
        let (promise, gate) = Future::<u32>::pending();
        let gate_clone = gate.clone();
        let remainder = ctx.post(move |current| {
            let next = current.suspend(&gate_clone, |current, v| Ok((current.id(), v? + 1)));
            Ok(next)
        });
        let next = remainder.wait_timeout(WAIT).unwrap().unwrap();
        assert_eq!(gate.pending_captures(), vec![Some(ctx.id())]);

        promise.complete(&Current::Worker, 1);
        let (resumed_on, value) = next.wait_timeout(WAIT).unwrap().unwrap();
        assert_eq!(resumed_on, ctx.id());
        assert_eq!(value, 2);
    }

    #[test]
    fn test_suspend_on_worker_captures_nothing() {
        let pool = WorkerPool::new(2);
        let (promise, gate) = Future::<u32>::pending();
        let gate_clone = gate.clone();
        let next = pool
            .submit(move |current| {
                Ok(current.suspend(&gate_clone, |current, v| Ok((current.id(), v?))))
            })
            .wait_timeout(WAIT)
            .unwrap()
            .unwrap();
        assert_eq!(gate.pending_captures(), vec![None]);
        promise.complete(&Current::Worker, 4);
        assert_eq!(
            next.wait_timeout(WAIT).unwrap().unwrap(),
            (ContextId::Worker, 4)
        );
    }

    #[test]
    fn test_block_on_worker_reraises_fault() {
        let error = Error::failed("worker fault");
        let faulted = Future::<u32>::faulted(error.clone());
        let err = Current::Worker.block_on(&faulted).unwrap_err();
        assert!(err.same_as(&error));
    }

    #[test]
    fn test_nested_block_on_confined_restores_pumping() {
        let ctx = ConfinedContext::new("nested").unwrap();
        let ctx_clone = ctx.clone();
        let f = ctx.post(move |current| {
            current.block_on(&Future::ready(()))?;
            Ok(ctx_clone.pump_state())
        });
        assert_eq!(
            f.wait_timeout(WAIT).unwrap().unwrap(),
            crate::context::PumpState::Pumping
        );
    }
}
