//! Configuration types for the scheduling strategies.

use chrono::Duration;

#[cfg(feature = "python")]
use pyo3::prelude::*;

use crate::scheduler::SchedulerError;

/// Default minimum step taken when nothing is observable.
pub const DEFAULT_GAP_MINUTES: i64 = 30;

/// Settings shared by the greedy strategies.
#[cfg_attr(feature = "python", pyclass(get_all, set_all))]
#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    /// Step taken over a stretch where no block is observable. It is also
    /// left free after every committed observing block.
    pub gap_time: Duration,
    /// Verbosity level: 0=silent, 1=changes, 2=checks, 3=debug.
    pub verbosity: u8,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            gap_time: Duration::minutes(DEFAULT_GAP_MINUTES),
            verbosity: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn with_gap_time(mut self, gap_time: Duration) -> Self {
        self.gap_time = gap_time;
        self
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Reject settings that would make the scheduling loop run backwards.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.gap_time < Duration::zero() {
            return Err(SchedulerError::InvalidConfig(format!(
                "gap_time must not be negative, got {}",
                self.gap_time
            )));
        }
        Ok(())
    }
}

#[cfg(feature = "python")]
#[pymethods]
impl SchedulerConfig {
    #[new]
    #[pyo3(signature = (gap_time=None, verbosity=None))]
    fn py_new(gap_time: Option<Duration>, verbosity: Option<u8>) -> Self {
        let defaults = Self::default();
        Self {
            gap_time: gap_time.unwrap_or(defaults.gap_time),
            verbosity: verbosity.unwrap_or(defaults.verbosity),
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "SchedulerConfig(gap_time={}, verbosity={})",
            self.gap_time, self.verbosity
        )
    }
}
