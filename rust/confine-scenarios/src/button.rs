//! Named entry points, one per button of the demonstration window.

use std::{fmt, str::FromStr};

use confine_common::{Error, Result};

use crate::{lab::Mode, scenario::Scenario};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    ThreadCheck,
    DeadLockAsyncMethod,
    NotDeadLockAsyncMethod,
    DeadLockMethod,
    NotDeadLockMethod,
    ConfigureAwaitMethod,
}

impl Button {
    pub const ALL: [Button; 6] = [
        Button::ThreadCheck,
        Button::DeadLockAsyncMethod,
        Button::NotDeadLockAsyncMethod,
        Button::DeadLockMethod,
        Button::NotDeadLockMethod,
        Button::ConfigureAwaitMethod,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Button::ThreadCheck => "thread-check",
            Button::DeadLockAsyncMethod => "dead-lock-async-method",
            Button::NotDeadLockAsyncMethod => "not-dead-lock-async-method",
            Button::DeadLockMethod => "dead-lock-method",
            Button::NotDeadLockMethod => "not-dead-lock-method",
            Button::ConfigureAwaitMethod => "configure-await-method",
        }
    }

    /// The scenario and mode a press runs.
    ///
    /// The `*Method` buttons differ from their `*AsyncMethod` counterparts only in that the
    /// blocking wait sits inside a plain helper instead of the handler itself; both reduce
    /// to the same run.
    pub fn binding(&self) -> (Scenario, Mode) {
        match self {
            Button::ThreadCheck => (Scenario::ThreadCheck, Mode::Blocking),
            Button::DeadLockAsyncMethod | Button::DeadLockMethod => {
                (Scenario::CaptureThenReturn, Mode::Blocking)
            }
            Button::NotDeadLockAsyncMethod | Button::NotDeadLockMethod => {
                (Scenario::CaptureThenReturn, Mode::Offloaded)
            }
            Button::ConfigureAwaitMethod => (Scenario::ResumeAnywhere, Mode::Blocking),
        }
    }

    pub fn expect_hang(&self) -> bool {
        let (scenario, mode) = self.binding();
        scenario.expect_hang(mode)
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Button {
    type Err = Error;

    fn from_str(s: &str) -> Result<Button> {
        Button::ALL
            .into_iter()
            .find(|button| button.name() == s)
            .ok_or_else(|| Error::invalid_arg("button", format!("unknown button '{s}'")))
    }
}
