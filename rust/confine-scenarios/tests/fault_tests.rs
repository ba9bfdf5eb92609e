use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use confine_common::{Error, ErrorKind};
use confine_scenarios::{Lab, LabConfig, Mode, Scenario, Verdict};
use confine_workflow::{Current, Future, FutureState, WorkerPool};

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_pool_fault_is_reraised_by_blocking_wait() {
    let pool = WorkerPool::new(2);
    let error = Error::failed("broken item");
    let raised = error.clone();
    let failed = pool.submit(move |_| Err::<u32, _>(raised));
    let err = pool
        .submit(move |current| current.block_on(&failed))
        .wait_timeout(WAIT)
        .unwrap()
        .unwrap_err();
    assert!(err.same_as(&error));
}

#[test]
fn test_pool_panic_faults_the_future() {
    let pool = WorkerPool::new(1);
    let panicked: Future<()> = pool.submit(|_| panic!("boom"));
    let err = panicked.wait_timeout(WAIT).unwrap().unwrap_err();
    assert!(err.is_panic());
    // The worker survives.
    let value = pool.submit(|_| Ok(7)).wait_timeout(WAIT).unwrap().unwrap();
    assert_eq!(value, 7);
}

/// A fault nobody waits on stays in its own future: the item ran and failed, yet the
/// worker and the items queued behind it carry on as if nothing happened.
#[test]
fn test_discarded_fault_stays_local() {
    let pool = WorkerPool::new(1);
    let threads = pool.thread_count();
    let ran = Arc::new(AtomicUsize::new(0));
    {
        let ran = ran.clone();
        let _discarded = pool.submit(move |_| -> confine_common::Result<()> {
            ran.fetch_add(1, Ordering::SeqCst);
            Err(Error::failed("nobody is listening"))
        });
    }
    let next = pool.submit(|_| Ok(()));
    next.wait_timeout(WAIT).unwrap().unwrap();
    assert_eq!(next.state(), FutureState::Completed);
    // A single worker takes items in order, so the discarded one has already run.
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(pool.thread_count(), threads);
    assert_eq!(pool.compensation_count(), 0);
}

#[test]
fn test_scenario_fault_reaches_every_mode() {
    for mode in Mode::ALL {
        let lab = Lab::new(LabConfig::default().with_timeout(WAIT)).unwrap();
        let report = lab.run(Scenario::FaultingTask, mode);
        let Verdict::Faulted(err) = &report.verdict else {
            panic!("{mode}: expected a fault, got {:?}", report.verdict);
        };
        assert!(
            matches!(err.kind(), ErrorKind::Failed { .. }),
            "{mode}: {err}"
        );
        assert!(report.journal.find("after wait").is_none());
    }
}

#[test]
fn test_dropped_promise_faults_as_abandoned() {
    let (promise, future) = Future::<u32>::pending();
    drop(promise);
    let err = Current::Worker.block_on(&future).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Abandoned));
}
