//! Records of where each step of a scenario ran.

use std::{
    sync::{Arc, Condvar, Mutex},
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use confine_workflow::{ContextId, Current};

/// One recorded step: a label, the context it ran on and the physical thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub label: &'static str,
    pub context: ContextId,
    pub thread: ThreadId,
    /// Time since the journal was created.
    pub offset: Duration,
}

/// Shared, append-only log of [`Step`]s. Clones append to the same log.
///
/// Steps may be recorded from any thread, including after the run that created the journal
/// has been reported; [`Journal::wait_for`] observes those late steps.
#[derive(Debug, Clone)]
pub struct Journal(Arc<JournalInner>);

#[derive(Debug)]
struct JournalInner {
    origin: Instant,
    steps: Mutex<Vec<Step>>,
    appended: Condvar,
}

impl Journal {
    pub fn new() -> Journal {
        Journal(Arc::new(JournalInner {
            origin: Instant::now(),
            steps: Mutex::new(Vec::new()),
            appended: Condvar::new(),
        }))
    }

    /// Appends a step for the calling thread, running on `current`.
    pub fn record(&self, label: &'static str, current: &Current) {
        let step = Step {
            label,
            context: current.id(),
            thread: thread::current().id(),
            offset: self.0.origin.elapsed(),
        };
        log::trace!("{label} on {} ({:?})", step.context, step.thread);
        self.0.steps.lock().unwrap().push(step);
        self.0.appended.notify_all();
    }

    /// Snapshot of the steps recorded so far, in recording order.
    pub fn steps(&self) -> Vec<Step> {
        self.0.steps.lock().unwrap().clone()
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.0
            .steps
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.label)
            .collect()
    }

    /// The first step recorded under `label`.
    pub fn find(&self, label: &str) -> Option<Step> {
        self.0
            .steps
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.label == label)
            .cloned()
    }

    /// Waits up to `timeout` for a step labelled `label` to be recorded.
    pub fn wait_for(&self, label: &str, timeout: Duration) -> Option<Step> {
        let guard = self.0.steps.lock().unwrap();
        let (guard, _) = self
            .0
            .appended
            .wait_timeout_while(guard, timeout, |steps| {
                !steps.iter().any(|s| s.label == label)
            })
            .unwrap();
        guard.iter().find(|s| s.label == label).cloned()
    }
}

impl Default for Journal {
    fn default() -> Self {
        Journal::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use confine_workflow::{ContextId, Current};

    use super::Journal;

    #[test]
    fn test_record_and_find() {
        let journal = Journal::new();
        journal.record("first", &Current::Worker);
        journal.record("second", &Current::Worker);
        assert_eq!(journal.labels(), vec!["first", "second"]);

        let step = journal.find("second").unwrap();
        assert_eq!(step.context, ContextId::Worker);
        assert_eq!(step.thread, thread::current().id());
        assert!(journal.find("third").is_none());
    }

    #[test]
    fn test_wait_for_late_step() {
        let journal = Journal::new();
        let writer = journal.clone();
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            writer.record("late", &Current::Worker);
        });
        let step = journal.wait_for("late", Duration::from_secs(5)).unwrap();
        assert_ne!(step.thread, thread::current().id());
        h.join().unwrap();
    }

    #[test]
    fn test_wait_for_times_out() {
        let journal = Journal::new();
        let step = journal.wait_for("never", Duration::from_millis(10));
        assert!(step.is_none());
    }
}
