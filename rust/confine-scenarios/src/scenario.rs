//! The catalog of scenarios a [`Lab`](crate::lab::Lab) can run.
//!
//! Every scenario is an asynchronous operation started from some [`Current`]: it returns a
//! future right away and records its steps in the run's [`Journal`]. Whether a scenario
//! deadlocks depends only on how that future is consumed and where it was started, which is
//! chosen by the [`Mode`] of the run.

use std::{fmt, str::FromStr, thread};

use confine_common::{Error, Result};
use confine_workflow::{Current, Future, Resume, WorkerPool, delay, when_all};

use crate::{config::LabConfig, journal::Journal, lab::Mode};

/// What a scenario needs while it runs.
#[derive(Debug, Clone)]
pub struct ScenarioEnv {
    pub pool: WorkerPool,
    pub journal: Journal,
    pub config: LabConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    /// A single pool item; nothing is resumed after it.
    ThreadCheck,
    /// A pool item followed by a remainder that asks to resume on the caller's context.
    CaptureThenReturn,
    /// The same chain, with the remainder allowed to resume anywhere.
    ResumeAnywhere,
    /// Two timers and a pool item awaited together.
    WhenAll,
    /// Two timers and a pool item awaited one after another.
    SequentialAwaits,
    /// Starts the capture-free chain and returns without waiting for it.
    FireAndForget,
    /// A pool item that fails.
    FaultingTask,
}

impl Scenario {
    pub const ALL: [Scenario; 7] = [
        Scenario::ThreadCheck,
        Scenario::CaptureThenReturn,
        Scenario::ResumeAnywhere,
        Scenario::WhenAll,
        Scenario::SequentialAwaits,
        Scenario::FireAndForget,
        Scenario::FaultingTask,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::ThreadCheck => "thread-check",
            Scenario::CaptureThenReturn => "capture-then-return",
            Scenario::ResumeAnywhere => "resume-anywhere",
            Scenario::WhenAll => "when-all",
            Scenario::SequentialAwaits => "sequential-awaits",
            Scenario::FireAndForget => "fire-and-forget",
            Scenario::FaultingTask => "faulting-task",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Scenario::ThreadCheck => "runs one pool item and reports where it ran",
            Scenario::CaptureThenReturn => {
                "awaits a pool item, then resumes on the calling context"
            }
            Scenario::ResumeAnywhere => "awaits a pool item, then resumes on any thread",
            Scenario::WhenAll => "awaits two timers and a pool item together",
            Scenario::SequentialAwaits => "awaits two timers and a pool item in sequence",
            Scenario::FireAndForget => "starts a capture-free chain without awaiting it",
            Scenario::FaultingTask => "awaits a pool item that fails",
        }
    }

    /// Starts the scenario from `current` and returns a future of its completion.
    ///
    /// Nothing here blocks. Remainders registered from a confined `current` capture it
    /// unless the scenario explicitly resumes anywhere.
    pub fn start(&self, current: &Current, env: &ScenarioEnv) -> Future<()> {
        match self {
            Scenario::ThreadCheck => {
                env.journal.record("before task", current);
                pool_task(env)
            }
            Scenario::CaptureThenReturn => async_method(current, env, Resume::OnCaptured),
            Scenario::ResumeAnywhere => async_method(current, env, Resume::Anywhere),
            Scenario::WhenAll => {
                env.journal.record("before task", current);
                let all = when_all(
                    current,
                    [
                        delay(env.config.timer_delay),
                        delay(env.config.timer_delay),
                        pool_task(env),
                    ],
                );
                let journal = env.journal.clone();
                current.suspend_with(&all, Resume::Anywhere, move |current, outcome| {
                    outcome?;
                    journal.record("after task", current);
                    Ok(())
                })
            }
            Scenario::SequentialAwaits => {
                env.journal.record("before task", current);
                let second_timer = env.config.timer_delay;
                let task_env = env.clone();
                let journal = env.journal.clone();
                let first = delay(env.config.timer_delay);
                let timers = current.suspend_future(&first, Resume::Anywhere, move |_, outcome| {
                    outcome.map_or_else(Future::faulted, |()| delay(second_timer))
                });
                let task = current.suspend_future(&timers, Resume::Anywhere, move |_, outcome| {
                    outcome.map_or_else(Future::faulted, |()| pool_task(&task_env))
                });
                current.suspend_with(&task, Resume::Anywhere, move |current, outcome| {
                    outcome?;
                    journal.record("after task", current);
                    Ok(())
                })
            }
            Scenario::FireAndForget => {
                let _discarded = async_method(current, env, Resume::Anywhere);
                env.journal.record("returned", current);
                Future::ready(())
            }
            Scenario::FaultingTask => {
                env.journal.record("before task", current);
                let journal = env.journal.clone();
                let failing = env.pool.submit(move |current| -> Result<()> {
                    journal.record("on task", current);
                    Err(Error::failed("simulated task failure"))
                });
                let journal = env.journal.clone();
                current.suspend_with(&failing, Resume::Anywhere, move |current, outcome| {
                    outcome?;
                    journal.record("after task", current);
                    Ok(())
                })
            }
        }
    }

    /// Whether a run in `mode` is expected never to return.
    pub fn expect_hang(&self, mode: Mode) -> bool {
        *self == Scenario::CaptureThenReturn && mode == Mode::Blocking
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = Error;

    fn from_str(s: &str) -> Result<Scenario> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| Error::invalid_arg("scenario", format!("unknown scenario '{s}'")))
    }
}

/// A pool item that records where it ran and then simulates `work_delay` of work.
fn pool_task(env: &ScenarioEnv) -> Future<()> {
    let journal = env.journal.clone();
    let work = env.config.work_delay;
    env.pool.submit(move |current| {
        journal.record("on task", current);
        thread::sleep(work);
        Ok(())
    })
}

/// Records a step, awaits a pool item, and records another step wherever `resume` puts the
/// remainder.
fn async_method(current: &Current, env: &ScenarioEnv, resume: Resume) -> Future<()> {
    env.journal.record("before task", current);
    let task = pool_task(env);
    let journal = env.journal.clone();
    current.suspend_with(&task, resume, move |current, outcome| {
        outcome?;
        journal.record("after task", current);
        Ok(())
    })
}
