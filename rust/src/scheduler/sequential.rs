//! Greedy scheduling by the product of all constraint scores.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::constraints::{Constraint, Observer};
use crate::models::{ObservingBlock, ScheduleEntry};
use crate::transitioner::Transitioner;

use super::core::{ScheduleStrategy, SchedulerError, SchedulingContext};

/// Picks, at each step, the block with the largest product of constraint
/// scores over all constraints and all three samples (start, middle, end).
///
/// A single zero anywhere vetoes the block for that step, so a block is only
/// considered when it is observable over its whole would-be slot.
#[derive(Clone, Debug)]
pub struct SequentialScheduler {
    context: SchedulingContext,
}

impl SequentialScheduler {
    pub fn new(
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        constraints: Vec<Arc<dyn Constraint>>,
        observer: Observer,
        transitioner: Option<Transitioner>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        let context = SchedulingContext::new(
            window_start,
            window_end,
            constraints,
            observer,
            transitioner,
            config,
        )?;
        Ok(Self { context })
    }

    /// Scheduler for a window of length `duration` centred on `center_time`.
    pub fn from_timespan(
        center_time: DateTime<Utc>,
        duration: Duration,
        constraints: Vec<Arc<dyn Constraint>>,
        observer: Observer,
        transitioner: Option<Transitioner>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        let (start, end) = SchedulingContext::window_around(center_time, duration)?;
        Self::new(start, end, constraints, observer, transitioner, config)
    }

    pub fn context(&self) -> &SchedulingContext {
        &self.context
    }
}

/// Product of every score; exactly `0.0` if any score is zero.
pub fn product_score(results: &[Vec<f64>]) -> f64 {
    let mut product = 1.0;
    for &score in results.iter().flatten() {
        if score == 0.0 {
            return 0.0;
        }
        product *= score;
    }
    product
}

impl ScheduleStrategy for SequentialScheduler {
    fn make_schedule(
        &self,
        blocks: Vec<ObservingBlock>,
    ) -> Result<(Vec<ScheduleEntry>, bool), SchedulerError> {
        let entries = self
            .context
            .run_greedy("sequential", blocks, |_, results| Ok(product_score(results)))?;
        Ok((entries, true))
    }
}
