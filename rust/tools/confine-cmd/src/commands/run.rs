//! Run command implementation

use anyhow::Result;
use confine_scenarios::{LabConfig, Mode, Scenario};

use crate::commands::{new_lab, print_report};

pub fn run(config: LabConfig, scenario: Scenario, mode: Mode, json: bool) -> Result<()> {
    let lab = new_lab(config)?;
    if scenario.expect_hang(mode) {
        log::info!(
            "{scenario} ({mode}) is expected to hang; giving up after {:?}",
            lab.config().timeout
        );
    }
    let report = lab.run(scenario, mode);
    print_report(&report, json)?;

    if report.scenario == Scenario::FireAndForget && !json {
        // The discarded chain is still running; show where it ends up.
        if let Some(step) = report.journal.wait_for("after task", lab.config().timeout) {
            println!(
                "background chain finished at {:?} on {} ({:?})",
                step.offset, step.context, step.thread
            );
        }
    }
    Ok(())
}
