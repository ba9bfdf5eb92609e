//! Aggregate waits and timer-backed futures.

use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use confine_common::Result;

use crate::{
    current::Current,
    future::{Future, Promise},
};

/// Returns a future that completes once every input future is terminal.
///
/// The inputs keep running concurrently; nothing here waits for one before starting on the
/// next, so the aggregate completes after roughly the slowest input. Values are returned in
/// input order. If any input faulted, the aggregate faults with the fault of the first such
/// input, but only after all inputs are terminal.
///
/// No capture is involved: the aggregate completes on the thread that finishes the last
/// input (or on the caller's, described by `here`, if every input is already terminal).
pub fn when_all<T>(here: &Current, futures: impl IntoIterator<Item = Future<T>>) -> Future<Vec<T>>
where
    T: Clone + Send + 'static,
{
    let futures: Vec<_> = futures.into_iter().collect();
    if futures.is_empty() {
        return Future::ready(Vec::new());
    }

    let (promise, aggregate) = Future::pending();
    let gather = Arc::new(Mutex::new(Gather {
        slots: (0..futures.len()).map(|_| None).collect(),
        remaining: futures.len(),
        promise: Some(promise),
    }));
    for (index, future) in futures.iter().enumerate() {
        let gather = gather.clone();
        future.on_complete(
            here,
            None,
            Box::new(move |current: &Current, outcome: Result<T>| {
                let finished = {
                    let mut gather = gather.lock().unwrap();
                    gather.slots[index] = Some(outcome);
                    gather.remaining -= 1;
                    if gather.remaining == 0 {
                        gather
                            .promise
                            .take()
                            .map(|p| (p, std::mem::take(&mut gather.slots)))
                    } else {
                        None
                    }
                };
                if let Some((promise, slots)) = finished {
                    let outcome = slots.into_iter().flatten().collect::<Result<Vec<T>>>();
                    promise.resolve(current, outcome);
                }
            }),
        );
    }
    aggregate
}

/// Returns a future that completes with `()` after `duration`.
///
/// The delay is served by a dedicated timer thread, which belongs to no confined context;
/// continuations registered without a capture run on it.
pub fn delay(duration: Duration) -> Future<()> {
    let (promise, future) = Future::pending();
    let spawned = thread::Builder::new()
        .name("confine-delay".to_string())
        .spawn(move || {
            thread::sleep(duration);
            promise.complete(&Current::Worker, ());
        });
    // On failure the closure, and the promise with it, is dropped: the future faults as
    // abandoned.
    if let Err(e) = spawned {
        log::debug!("failed to start a delay timer: {e}");
    }
    future
}

struct Gather<T: Send + 'static> {
    slots: Vec<Option<Result<T>>>,
    remaining: usize,
    promise: Option<Promise<Vec<T>>>,
}
