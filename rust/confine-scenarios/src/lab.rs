//! The harness: one confined context, one worker pool, and a bounded wait per run.

use std::{
    fmt,
    str::FromStr,
    time::{Duration, Instant},
};

use confine_common::{Error, Result};
use confine_workflow::{ConfinedContext, Current, Future, WorkerPool, context::Diagnosis};

use crate::{
    button::Button,
    config::LabConfig,
    journal::Journal,
    scenario::{Scenario, ScenarioEnv},
};

/// How the confined context consumes a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Start the scenario on the confined context and block it until the scenario finishes.
    Blocking,
    /// Start the scenario on a worker, block that worker on it, and block the confined
    /// context on the worker item.
    Offloaded,
    /// Start the scenario on the confined context and suspend instead of blocking.
    Suspended,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Blocking, Mode::Offloaded, Mode::Suspended];

    pub fn name(&self) -> &'static str {
        match self {
            Mode::Blocking => "blocking",
            Mode::Offloaded => "offloaded",
            Mode::Suspended => "suspended",
        }
    }

    /// Runs on the confined context. The returned future completes with the time from the
    /// start of this call to the end of the run.
    fn invoke(
        &self,
        scenario: Scenario,
        current: &Current,
        env: &ScenarioEnv,
    ) -> Result<Future<Duration>> {
        let start = Instant::now();
        match self {
            Mode::Blocking => {
                let done = scenario.start(current, env);
                current.block_on(&done)?;
            }
            Mode::Offloaded => {
                let worker_env = env.clone();
                let done = env.pool.submit(move |worker| {
                    let done = scenario.start(worker, &worker_env);
                    worker.block_on(&done)
                });
                current.block_on(&done)?;
            }
            Mode::Suspended => {
                let done = scenario.start(current, env);
                let journal = env.journal.clone();
                return Ok(current.suspend(&done, move |current, outcome| {
                    outcome?;
                    journal.record("after wait", current);
                    Ok(start.elapsed())
                }));
            }
        }
        env.journal.record("after wait", current);
        Ok(Future::ready(start.elapsed()))
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Mode> {
        Mode::ALL
            .into_iter()
            .find(|mode| mode.name() == s)
            .ok_or_else(|| Error::invalid_arg("mode", format!("unknown mode '{s}'")))
    }
}

/// How a run ended, as seen from the harness.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// The run completed; the duration is measured on the confined context.
    Returned(Duration),
    /// The scenario faulted and the fault reached the confined context.
    Faulted(Error),
    /// Nothing came back within the configured timeout. The snapshot is taken at the
    /// moment the harness gave up.
    Hung(Diagnosis),
}

#[derive(Debug, Clone)]
pub struct Report {
    pub scenario: Scenario,
    pub mode: Mode,
    pub verdict: Verdict,
    /// Steps of this run. Detached work may keep appending to it after the report is made.
    pub journal: Journal,
}

impl Report {
    pub fn elapsed(&self) -> Option<Duration> {
        match self.verdict {
            Verdict::Returned(elapsed) => Some(elapsed),
            _ => None,
        }
    }

    pub fn is_hung(&self) -> bool {
        matches!(self.verdict, Verdict::Hung(_))
    }
}

/// A confined context and a worker pool on which scenarios are run.
///
/// A run that hangs leaves the confined context blocked for good: every later run on the
/// same lab hangs too. Use a fresh lab after a [`Verdict::Hung`].
pub struct Lab {
    ctx: ConfinedContext,
    pool: WorkerPool,
    config: LabConfig,
}

impl Lab {
    pub fn new(config: LabConfig) -> Result<Lab> {
        config.validate()?;
        let ctx = ConfinedContext::new("confine-ui")?;
        let pool = WorkerPool::new(config.workers);
        Ok(Lab { ctx, pool, config })
    }

    pub fn context(&self) -> &ConfinedContext {
        &self.ctx
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    /// Posts a run of `scenario` to the confined context and waits for it, bounded by the
    /// configured timeout.
    pub fn run(&self, scenario: Scenario, mode: Mode) -> Report {
        let env = ScenarioEnv {
            pool: self.pool.clone(),
            journal: Journal::new(),
            config: self.config.clone(),
        };
        log::debug!("running {scenario} ({mode}) on {}", self.ctx.id());
        let run_env = env.clone();
        let posted = self
            .ctx
            .post(move |current| mode.invoke(scenario, current, &run_env));
        let done = posted.then_future(&Current::Worker, None, |_, outcome| match outcome {
            Ok(done) => done,
            Err(e) => Future::faulted(e),
        });
        let verdict = match done.wait_timeout(self.config.timeout) {
            Some(Ok(elapsed)) => Verdict::Returned(elapsed),
            Some(Err(e)) => Verdict::Faulted(e),
            None => Verdict::Hung(self.ctx.diagnose()),
        };
        log::debug!("{scenario} ({mode}): {verdict:?}");
        Report {
            scenario,
            mode,
            verdict,
            journal: env.journal,
        }
    }

    /// Runs the named scenario in [`Mode::Blocking`].
    pub fn run_blocking(&self, name: &str) -> Result<Report> {
        Ok(self.run(name.parse()?, Mode::Blocking))
    }

    /// Runs the named scenario in [`Mode::Offloaded`].
    pub fn run_offloaded(&self, name: &str) -> Result<Report> {
        Ok(self.run(name.parse()?, Mode::Offloaded))
    }

    pub fn press(&self, button: Button) -> Report {
        let (scenario, mode) = button.binding();
        self.run(scenario, mode)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use confine_common::ErrorKind;
    use confine_workflow::{ContextId, PumpState};

    use super::{Lab, Mode, Verdict};
    use crate::{config::LabConfig, scenario::Scenario};

    fn lab() -> Lab {
        Lab::new(
            LabConfig::default()
                .with_work_delay(Duration::from_millis(20))
                .with_timer_delay(Duration::from_millis(20))
                .with_timeout(Duration::from_millis(500)),
        )
        .unwrap()
    }

    #[test]
    fn test_mode_names_round_trip() {
        for mode in Mode::ALL {
            assert_eq!(mode.name().parse::<Mode>().unwrap(), mode);
        }
        assert!("sideways".parse::<Mode>().is_err());
    }

    #[test]
    fn test_new_rejects_zero_workers() {
        let err = Lab::new(LabConfig::default().with_workers(0))
            .err()
            .unwrap();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    }

    #[test]
    fn test_run_by_unknown_name() {
        assert!(lab().run_blocking("nope").is_err());
    }

    #[test]
    fn test_thread_check_records_after_wait_on_confined() {
        let lab = lab();
        let report = lab.run_blocking("thread-check").unwrap();
        assert!(report.elapsed().is_some());
        let after = report.journal.find("after wait").unwrap();
        assert_eq!(after.context, lab.context().id());
        assert_eq!(Some(after.thread), lab.context().thread_id());
        assert_eq!(
            report.journal.find("on task").unwrap().context,
            ContextId::Worker
        );
    }

    #[test]
    fn test_suspended_capture_resumes_on_confined() {
        let lab = lab();
        let report = lab.run(Scenario::CaptureThenReturn, Mode::Suspended);
        assert!(report.elapsed().is_some());
        assert_eq!(
            report.journal.find("after task").unwrap().context,
            lab.context().id()
        );
        assert_eq!(
            report.journal.find("after wait").unwrap().context,
            lab.context().id()
        );
        assert_ne!(lab.context().pump_state(), PumpState::Blocked);
    }

    #[test]
    fn test_blocking_capture_hangs_and_stalls() {
        let lab = lab();
        let report = lab.run(Scenario::CaptureThenReturn, Mode::Blocking);
        match report.verdict {
            Verdict::Hung(diagnosis) => {
                assert_eq!(diagnosis.pump_state, PumpState::Blocked);
                assert!(diagnosis.is_stalled());
            }
            other => panic!("expected a hang, got {other:?}"),
        }
        assert!(report.journal.find("after task").is_none());
    }

    #[test]
    fn test_faulting_task_is_reported() {
        let report = lab().run(Scenario::FaultingTask, Mode::Blocking);
        match report.verdict {
            Verdict::Faulted(e) => assert!(matches!(e.kind(), ErrorKind::Failed { .. })),
            other => panic!("expected a fault, got {other:?}"),
        }
    }
}
