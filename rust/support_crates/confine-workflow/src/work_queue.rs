//! Unbounded, blocking, multi-producer multi-consumer queue of pending work.
//!
//! The same queue backs both executors in this crate:
//!
//! - the [`WorkerPool`](crate::worker_pool::WorkerPool), where every worker thread holds a
//!   [`Receiver`] clone and any idle worker may take any item;
//! - a [`ConfinedContext`](crate::context::ConfinedContext), where exactly one pump thread
//!   holds the only [`Receiver`] and items therefore run strictly in FIFO order.
//!
//! Items are handed out in insertion order. When several consumers compete, the order in
//! which they *finish* items is unspecified.
//!
//! The queue is "half-closed" once every [`Sender`] is dropped: consumers drain what is left
//! and then observe [`Disconnected`]. It is closed once every [`Receiver`] is dropped:
//! remaining items are discarded and further sends are rejected.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

/// Creates a connected sender/receiver pair for a new, empty queue.
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(QueueState {
            items: VecDeque::new(),
            producers: 1,
            consumers: 1,
        }),
        not_empty: Condvar::new(),
    });
    (Sender(shared.clone()), Receiver(shared))
}

/// Returned by [`Receiver::recv`] once the queue is empty and every sender is gone.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Disconnected;

impl std::fmt::Display for Disconnected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "work queue is empty and disconnected")
    }
}

impl std::error::Error for Disconnected {}

/// The producing half of the queue.
pub struct Sender<T>(Arc<Shared<T>>);

impl<T> Sender<T> {
    /// Appends `item` and wakes one waiting consumer. Never blocks.
    ///
    /// Returns the item back if every receiver has been dropped.
    pub fn send(&self, item: T) -> Result<(), T> {
        let mut state = self.0.state.lock().unwrap();
        if state.consumers == 0 {
            return Err(item);
        }
        state.items.push_back(item);
        drop(state);
        self.0.not_empty.notify_one();
        Ok(())
    }

    /// Number of items waiting to be taken.
    pub fn len(&self) -> usize {
        self.0.state.lock().unwrap().items.len()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.0.state.lock().unwrap().producers += 1;
        Sender(self.0.clone())
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock().unwrap();
        state.producers -= 1;
        if state.producers == 0 {
            // Let blocked consumers observe the disconnect.
            self.0.not_empty.notify_all();
        }
    }
}

/// The consuming half of the queue. Clone it to add consumers.
pub struct Receiver<T>(Arc<Shared<T>>);

impl<T> Receiver<T> {
    /// Takes the oldest item, blocking while the queue is empty and still connected.
    pub fn recv(&self) -> Result<T, Disconnected> {
        let mut state = self.0.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            if state.producers == 0 {
                return Err(Disconnected);
            }
            state = self.0.not_empty.wait(state).unwrap();
        }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.0.state.lock().unwrap().consumers += 1;
        Receiver(self.0.clone())
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock().unwrap();
        state.consumers -= 1;
        if state.consumers == 0 {
            state.items.clear();
        }
    }
}

struct QueueState<T> {
    items: VecDeque<T>,
    producers: usize,
    consumers: usize,
}

struct Shared<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
}
