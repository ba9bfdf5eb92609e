//! Execution primitives for reproducing confined-context deadlocks.
//!
//! This crate models the interaction between one "UI-like" thread and a pool of worker
//! threads when deferred results are consumed either by blocking or by suspending.
//!
//! # Key Components
//!
//! ## Executors
//!
//! - [`worker_pool::WorkerPool`] - interchangeable worker threads sharing one pending-work
//!   queue; no ordering between items
//! - [`context::ConfinedContext`] - a single pump thread draining a private FIFO queue, with
//!   explicit `Idle`/`Pumping`/`Blocked` states
//!
//! ## Deferred results
//!
//! - [`future::Future`] / [`future::Promise`] - single-assignment results with continuation
//!   registration; [`future::Future::then`] takes the capture target explicitly
//! - [`combinators`] - [`when_all`](combinators::when_all) and timer-backed
//!   [`delay`](combinators::delay)
//!
//! ## Consumption
//!
//! - [`current::Current::block_on`] - occupies the calling thread (blocks a confined context)
//! - [`current::Current::suspend`] - registers the remainder and returns; resumes on the
//!   confined context it was called from, or anywhere when called from a worker
//!
//! A confined context that blocks on a future whose completion needs a continuation
//! captured to that same context never resumes. Nothing here detects or reports that; it is
//! observable only as a wait that does not return, and through
//! [`context::ConfinedContext::diagnose`].

pub mod combinators;
pub mod context;
pub mod current;
pub mod future;
pub(crate) mod work_queue;
pub mod worker_pool;

pub use combinators::{delay, when_all};
pub use context::{ConfinedContext, ContextId, PumpState};
pub use current::{Current, Resume};
pub use future::{Future, FutureState, Promise};
pub use worker_pool::WorkerPool;
