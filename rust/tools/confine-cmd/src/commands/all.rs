//! All command implementation

use anyhow::{Context, Result};
use confine_scenarios::{LabConfig, Mode, Scenario};

use crate::commands::{ReportSummary, describe, new_lab};

pub fn run(config: LabConfig, json: bool) -> Result<()> {
    let mut summaries = Vec::new();
    for scenario in Scenario::ALL {
        for mode in Mode::ALL {
            // A hung run leaves its confined context blocked, so each run gets a fresh lab.
            let lab = new_lab(config.clone())?;
            log::info!("running {scenario} ({mode})");
            let report = lab.run(scenario, mode);
            if json {
                summaries.push(ReportSummary::from(&report));
            } else {
                let expected = if scenario.expect_hang(mode) {
                    "hang"
                } else {
                    "return"
                };
                println!(
                    "{:<22} {:<10} expected {expected:<7} {}",
                    scenario.name(),
                    mode.name(),
                    describe(&report.verdict)
                );
            }
        }
    }

    if json {
        let text = serde_json::to_string_pretty(&summaries)
            .context("Failed to serialize reports")?;
        println!("{text}");
    }
    Ok(())
}
