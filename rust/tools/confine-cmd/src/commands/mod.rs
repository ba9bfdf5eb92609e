//! Command implementations for confine-cmd

use anyhow::{Context, Result};
use confine_scenarios::{Lab, LabConfig, Report, Step, Verdict};
use serde::Serialize;

pub mod all;
pub mod compare;
pub mod list;
pub mod press;
pub mod run;

#[derive(Serialize)]
pub struct ReportSummary {
    scenario: String,
    mode: String,
    verdict: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stall: Option<StallInfo>,
    steps: Vec<StepInfo>,
}

#[derive(Serialize)]
struct StallInfo {
    context: String,
    pump_state: String,
    queued: usize,
    stalled: bool,
}

#[derive(Serialize)]
struct StepInfo {
    label: &'static str,
    context: String,
    thread: String,
    offset_ms: f64,
}

impl From<&Step> for StepInfo {
    fn from(step: &Step) -> Self {
        StepInfo {
            label: step.label,
            context: step.context.to_string(),
            thread: format!("{:?}", step.thread),
            offset_ms: millis(step.offset),
        }
    }
}

impl From<&Report> for ReportSummary {
    fn from(report: &Report) -> Self {
        let (verdict, elapsed_ms, error, stall) = match &report.verdict {
            Verdict::Returned(elapsed) => ("returned", Some(millis(*elapsed)), None, None),
            Verdict::Faulted(e) => ("faulted", None, Some(e.to_string()), None),
            Verdict::Hung(diagnosis) => (
                "hung",
                None,
                None,
                Some(StallInfo {
                    context: diagnosis.id.to_string(),
                    pump_state: format!("{:?}", diagnosis.pump_state),
                    queued: diagnosis.queued,
                    stalled: diagnosis.is_stalled(),
                }),
            ),
        };
        ReportSummary {
            scenario: report.scenario.to_string(),
            mode: report.mode.to_string(),
            verdict: verdict.to_string(),
            elapsed_ms,
            error,
            stall,
            steps: report.journal.steps().iter().map(StepInfo::from).collect(),
        }
    }
}

pub fn new_lab(config: LabConfig) -> Result<Lab> {
    Lab::new(config).context("Failed to create lab")
}

pub fn print_report(report: &Report, json: bool) -> Result<()> {
    let summary = ReportSummary::from(report);
    if json {
        let text = serde_json::to_string_pretty(&summary)
            .context("Failed to serialize report")?;
        println!("{text}");
        return Ok(());
    }

    println!("{} ({}): {}", summary.scenario, summary.mode, describe(&report.verdict));
    for step in &summary.steps {
        println!(
            "  {:>9.1} ms  {:<12} {:<12} {}",
            step.offset_ms, step.label, step.context, step.thread
        );
    }
    Ok(())
}

pub fn describe(verdict: &Verdict) -> String {
    match verdict {
        Verdict::Returned(elapsed) => format!("returned after {:.1} ms", millis(*elapsed)),
        Verdict::Faulted(e) => format!("faulted: {e}"),
        Verdict::Hung(diagnosis) => format!(
            "no return; {} is {:?} with {} queued continuation(s)",
            diagnosis.id, diagnosis.pump_state, diagnosis.queued
        ),
    }
}

fn millis(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
