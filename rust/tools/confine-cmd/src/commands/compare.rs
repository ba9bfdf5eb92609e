//! Compare command implementation

use anyhow::{Result, bail};
use confine_scenarios::{LabConfig, Mode, Scenario};

use crate::commands::{describe, new_lab};

pub fn run(config: LabConfig) -> Result<()> {
    let lab = new_lab(config)?;
    let together = lab.run(Scenario::WhenAll, Mode::Blocking);
    let in_sequence = lab.run(Scenario::SequentialAwaits, Mode::Blocking);

    println!("{:<20} {}", together.scenario, describe(&together.verdict));
    println!("{:<20} {}", in_sequence.scenario, describe(&in_sequence.verdict));

    let (Some(together), Some(in_sequence)) = (together.elapsed(), in_sequence.elapsed()) else {
        bail!("Comparison runs did not both return");
    };
    println!(
        "awaiting together was {:.1}x faster",
        in_sequence.as_secs_f64() / together.as_secs_f64()
    );
    Ok(())
}
