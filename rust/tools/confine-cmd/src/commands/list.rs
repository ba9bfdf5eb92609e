//! List command implementation

use anyhow::Result;
use confine_scenarios::{Button, Mode, Scenario};

pub fn run() -> Result<()> {
    println!("Scenarios:");
    for scenario in Scenario::ALL {
        println!("  {:<22} {}", scenario.name(), scenario.description());
    }

    println!("Modes:");
    for mode in Mode::ALL {
        println!("  {}", mode.name());
    }

    println!("Buttons:");
    for button in Button::ALL {
        let (scenario, mode) = button.binding();
        let outcome = if button.expect_hang() {
            "hangs"
        } else {
            "returns"
        };
        println!("  {:<28} {scenario} ({mode}), {outcome}", button.name());
    }
    Ok(())
}
