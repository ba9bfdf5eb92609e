use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use confine_scenarios::{Button, LabConfig, Mode, Scenario};
use std::time::Duration;

mod commands;

#[derive(Parser)]
#[command(name = "confine-cmd")]
#[command(about = "Reproduces confined-context deadlocks and their workarounds")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    lab: LabArgs,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LabArgs {
    /// Number of pool workers
    #[arg(long, global = true, default_value_t = 2)]
    workers: usize,

    /// Simulated work per pool item, in milliseconds
    #[arg(long, global = true, default_value_t = 100)]
    work_delay_ms: u64,

    /// Duration of each timer delay, in milliseconds
    #[arg(long, global = true, default_value_t = 100)]
    timer_delay_ms: u64,

    /// How long to wait for a run before reporting it as hung, in milliseconds
    #[arg(long, global = true, default_value_t = 2000)]
    timeout_ms: u64,
}

impl LabArgs {
    fn config(&self) -> LabConfig {
        LabConfig::default()
            .with_workers(self.workers)
            .with_work_delay(Duration::from_millis(self.work_delay_ms))
            .with_timer_delay(Duration::from_millis(self.timer_delay_ms))
            .with_timeout(Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List scenarios, modes and buttons
    List,

    /// Run one scenario
    Run {
        /// Scenario name, see `list`
        scenario: Scenario,

        /// How the confined context consumes the scenario
        #[arg(long, default_value_t = Mode::Blocking)]
        mode: Mode,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Press one of the window's buttons
    Press {
        /// Button name, see `list`
        button: Button,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compare awaiting together with awaiting in sequence
    Compare,

    /// Run every scenario in every mode
    All {
        /// Print the reports as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = cli.lab.config();
    match cli.command {
        Commands::List => commands::list::run(),
        Commands::Run {
            scenario,
            mode,
            json,
        } => commands::run::run(config, scenario, mode, json),
        Commands::Press { button, json } => commands::press::run(config, button, json),
        Commands::Compare => commands::compare::run(config),
        Commands::All { json } => commands::all::run(config, json),
    }
}
