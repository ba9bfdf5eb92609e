//! Press command implementation

use anyhow::Result;
use confine_scenarios::{Button, LabConfig};

use crate::commands::{new_lab, print_report};

pub fn run(config: LabConfig, button: Button, json: bool) -> Result<()> {
    let lab = new_lab(config)?;
    let (scenario, mode) = button.binding();
    log::info!("{button} runs {scenario} ({mode})");
    let report = lab.press(button);
    print_report(&report, json)
}
