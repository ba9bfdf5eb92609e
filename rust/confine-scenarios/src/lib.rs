//! Reproducible deadlock scenarios on top of `confine-workflow`.
//!
//! A [`Lab`] owns one confined context (standing in for a UI thread) and one worker pool.
//! Each run posts a [`Scenario`] to the confined context in a given [`Mode`] and waits for
//! it from the outside with a timeout, so that a deadlock shows up as [`Verdict::Hung`]
//! instead of wedging the caller. Every step of a run is recorded in a [`Journal`] together
//! with the context and thread it ran on.

pub mod button;
pub mod config;
pub mod journal;
pub mod lab;
pub mod scenario;

pub use button::Button;
pub use config::LabConfig;
pub use journal::{Journal, Step};
pub use lab::{Lab, Mode, Report, Verdict};
pub use scenario::{Scenario, ScenarioEnv};
