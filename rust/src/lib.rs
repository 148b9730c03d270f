//! Greedy scheduling of telescope observations.
//!
//! Observation requests ([`ObservingBlock`]) are placed into a time window by
//! one of two greedy strategies, [`SequentialScheduler`] and
//! [`SummingScheduler`]. Slews, instrument reconfigurations and idle gaps
//! appear in the result as [`TransitionBlock`]s.
//!
//! With the `python` feature the crate also builds a PyO3 extension module.

// Allow clippy warning triggered by PyO3 macro expansion
#![cfg_attr(feature = "python", allow(clippy::useless_conversion))]

pub mod config;
pub mod constraints;
pub mod logging;
pub mod models;
pub mod scheduler;
pub mod transitioner;

#[cfg(feature = "python")]
mod python;

pub use config::{SchedulerConfig, DEFAULT_GAP_MINUTES};
pub use constraints::{
    ConstantConstraint, Constraint, ConstraintError, FnConstraint, Observer,
    TimeWindowConstraint,
};
pub use models::{
    Configuration, Coordinates, ImageSet, ModelError, ObservingBlock, ScheduleEntry, Target,
    TransitionBlock, NOTHING_OBSERVABLE,
};
pub use scheduler::{
    ScheduleStrategy, Scheduler, SchedulerError, SchedulingContext, SequentialScheduler,
    SummingScheduler,
};
pub use transitioner::{
    GreatCircleSeparation, ReconfigTable, SeparationModel, Transitioner, SLEW_TIME,
};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Python module definition
#[cfg(feature = "python")]
#[pymodule]
fn obsched(m: &Bound<'_, PyModule>) -> PyResult<()> {
    python::register(m)
}
